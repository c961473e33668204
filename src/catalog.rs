//! Interfaces to the portal the layers are published in.
//!
//! The portal itself (its web API, permissions and publishing) lives outside
//! this crate; the managers only need to ask it which layers exist, where its
//! datastore is, and what the published styles look like.

use crate::error::{ManagerError, Result};
use crate::source::Locator;
use std::sync::{PoisonError, RwLock};

/// A layer the portal already serves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedLayer {
    /// Table name in the portal datastore.
    pub name: String,
    /// Name of the geometry attribute.
    pub geometry_attribute: String,
    /// Name of the default style, when the layer has one.
    pub style_name: Option<String>,
    /// Where the SLD body of the default style can be fetched.
    pub style_url: Option<String>,
}

impl PublishedLayer {
    pub fn new(name: impl Into<String>, geometry_attribute: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            geometry_attribute: geometry_attribute.into(),
            style_name: None,
            style_url: None,
        }
    }

    pub fn with_style(mut self, style_name: impl Into<String>, style_url: impl Into<String>) -> Self {
        self.style_name = Some(style_name.into());
        self.style_url = Some(style_url.into());
        self
    }
}

/// Registry of published layers.
pub trait Catalog: Send + Sync {
    /// Whether a published layer name contains `name`, ignoring case.
    fn is_layer_known(&self, name: &str) -> Result<bool>;

    /// The portal's live database.
    fn datastore(&self) -> Result<Locator>;

    /// Every published layer, in catalog order.
    fn published_layers(&self) -> Result<Vec<PublishedLayer>>;
}

/// Fetches published style documents.
pub trait StyleFetcher: Send + Sync {
    fn fetch_style_body(&self, url: &str) -> Result<String>;
}

/// In-process catalog over a fixed datastore and a list of published layers.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    datastore: Option<Locator>,
    layers: RwLock<Vec<PublishedLayer>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_datastore(mut self, datastore: Locator) -> Self {
        self.datastore = Some(datastore);
        self
    }

    pub fn with_layers<I: IntoIterator<Item = PublishedLayer>>(mut self, layers: I) -> Self {
        self.layers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(layers);
        self
    }

    /// Record a newly published layer.
    pub fn publish(&self, layer: PublishedLayer) -> Result<()> {
        self.layers
            .write()
            .map_err(|_| ManagerError::Message("catalog lock poisoned".to_string()))?
            .push(layer);
        Ok(())
    }
}

impl Catalog for StaticCatalog {
    fn is_layer_known(&self, name: &str) -> Result<bool> {
        let needle = name.to_lowercase();
        let layers = self
            .layers
            .read()
            .map_err(|_| ManagerError::Message("catalog lock poisoned".to_string()))?;
        Ok(layers
            .iter()
            .any(|layer| layer.name.to_lowercase().contains(&needle)))
    }

    fn datastore(&self) -> Result<Locator> {
        self.datastore
            .clone()
            .ok_or_else(|| ManagerError::Message("catalog has no datastore configured".to_string()))
    }

    fn published_layers(&self) -> Result<Vec<PublishedLayer>> {
        Ok(self
            .layers
            .read()
            .map_err(|_| ManagerError::Message("catalog lock poisoned".to_string()))?
            .clone())
    }
}

/// Style fetcher that never returns a body; for portals without styles.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStyles;

impl StyleFetcher for NoStyles {
    fn fetch_style_body(&self, url: &str) -> Result<String> {
        Err(ManagerError::Message(format!("style fetching is disabled: {url}")))
    }
}

/// Blocking HTTP GET with basic-auth credentials of the map server.
#[cfg(feature = "http")]
#[derive(Clone, Debug)]
pub struct HttpStyleFetcher {
    client: reqwest::blocking::Client,
    username: String,
    password: String,
}

#[cfg(feature = "http")]
impl HttpStyleFetcher {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        Self::with_timeout(username, password, 30)
    }

    pub fn with_timeout(
        username: impl Into<String>,
        password: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            username: username.into(),
            password: password.into(),
        })
    }
}

#[cfg(feature = "http")]
impl StyleFetcher for HttpStyleFetcher {
    fn fetch_style_body(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()?
            .error_for_status()?;
        let body = response.text()?;
        tracing::debug!(url, bytes = body.len(), "fetched style body");
        Ok(body)
    }
}
