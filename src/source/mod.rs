//! Open data sources: a GeoPackage file or a PostGIS database.
//!
//! [`SpatialSource`] owns the native handle and dispatches to a driver;
//! [`ScopedSource`] guarantees the handle is flushed and closed on every exit
//! path.

mod feature;
pub(crate) mod gpkg;
pub(crate) mod postgis;

pub use feature::Feature;
pub(crate) use feature::FieldIndex;

use crate::config::ConnectionParams;
use crate::error::{ManagerError, Result};
use crate::srs::SpatialRef;
use crate::types::LayerDefinition;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

const DATABASE_PREFIX: &str = "PG:";

/// Where a source lives.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    File(PathBuf),
    /// libpq connection string, without the `PG:` prefix.
    Database(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    File,
    Database,
}

impl Locator {
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Locator::File(path.into())
    }

    pub fn database(connection_string: impl Into<String>) -> Self {
        let connection_string = connection_string.into();
        match connection_string.strip_prefix(DATABASE_PREFIX) {
            Some(rest) => Locator::Database(rest.to_string()),
            None => Locator::Database(connection_string),
        }
    }

    /// `PG:...` strings are databases, everything else is a file path.
    pub fn parse(locator: &str) -> Self {
        if locator.starts_with(DATABASE_PREFIX) {
            Locator::database(locator)
        } else {
            Locator::file(locator)
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Locator::File(_) => SourceKind::File,
            Locator::Database(_) => SourceKind::Database,
        }
    }

    /// Driver DSN: the path, or the connection string prefixed with `PG:`.
    pub fn dsn(&self) -> String {
        match self {
            Locator::File(path) => path.display().to_string(),
            Locator::Database(conn) => format!("{DATABASE_PREFIX}{conn}"),
        }
    }
}

impl From<ConnectionParams> for Locator {
    fn from(params: ConnectionParams) -> Self {
        Locator::Database(params.connection_string())
    }
}

impl From<&Path> for Locator {
    fn from(path: &Path) -> Self {
        Locator::File(path.to_path_buf())
    }
}

impl From<PathBuf> for Locator {
    fn from(path: PathBuf) -> Self {
        Locator::File(path)
    }
}

// The DSN with any password masked, safe for logs and error messages.
impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::File(path) => write!(f, "{}", path.display()),
            Locator::Database(conn) => {
                let masked: Vec<String> = conn
                    .split_whitespace()
                    .map(|pair| match pair.split_once('=') {
                        Some((key, _)) if key.eq_ignore_ascii_case("password") => {
                            format!("{key}=***")
                        }
                        _ => pair.to_string(),
                    })
                    .collect();
                write!(f, "{DATABASE_PREFIX}{}", masked.join(" "))
            }
        }
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Locator({self})")
    }
}

/// Layer creation options understood by the drivers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Replace an existing layer of the same name.
    pub overwrite: bool,
    /// Create a session-scoped table (PostGIS only).
    pub temporary: bool,
    /// Lowercase table and column names and replace other characters with `_`
    /// (PostGIS only).
    pub launder: bool,
    /// Name of the geometry column in the destination.
    pub geometry_name: Option<String>,
}

impl CopyOptions {
    /// `KEY=VALUE` rendering, as logged with every copy.
    pub fn driver_options(&self) -> Vec<String> {
        let yes_no = |flag: bool| if flag { "YES" } else { "NO" };
        let mut options = vec![
            format!("OVERWRITE={}", yes_no(self.overwrite)),
            format!("TEMPORARY={}", if self.temporary { "ON" } else { "OFF" }),
            format!("LAUNDER={}", yes_no(self.launder)),
        ];
        if let Some(geometry_name) = &self.geometry_name {
            options.push(format!("GEOMETRY_NAME={geometry_name}"));
        }
        options
    }
}

/// A layer read fully into memory, ready to be written somewhere else.
#[derive(Clone, Debug)]
pub struct LayerSnapshot {
    pub definition: LayerDefinition,
    pub srs: Option<SpatialRef>,
    pub features: Vec<Feature>,
}

/// Destination column for each attribute name. A name equal to a reserved
/// column or to an earlier attribute (ignoring case) gets the first free
/// `<name>_<n>` instead.
pub(crate) fn attribute_columns<I>(names: I, reserved: &[&str]) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut taken: Vec<String> = reserved.iter().map(|name| name.to_ascii_lowercase()).collect();
    let mut columns = Vec::new();
    for name in names {
        let mut column = name.clone();
        let mut n = 1;
        while taken.contains(&column.to_ascii_lowercase()) {
            column = format!("{name}_{n}");
            n += 1;
        }
        taken.push(column.to_ascii_lowercase());
        columns.push(column);
    }
    columns
}

/// The operations every driver provides.
pub(crate) trait Driver {
    fn list_layers(&self) -> Result<Vec<String>>;
    fn layer_exists(&self, layer_name: &str) -> Result<bool>;
    fn layer_definition(&self, layer_name: &str) -> Result<LayerDefinition>;
    fn spatial_ref(&self, layer_name: &str) -> Result<Option<SpatialRef>>;
    fn read_features(&self, layer_name: &str) -> Result<Vec<Feature>>;
    fn feature_count(&self, layer_name: &str) -> Result<u64>;
    /// Write `snapshot` as a new layer and return the name it was stored under.
    fn copy_layer(
        &self,
        snapshot: &LayerSnapshot,
        layer_name: &str,
        options: &CopyOptions,
    ) -> Result<String>;
    fn delete_layer(&self, layer_name: &str) -> Result<()>;
    /// Flush pending writes and release the handle.
    fn close(self: Box<Self>) -> Result<()>;
}

/// An open (or closed) geospatial data source.
///
/// Every operation on a closed source fails with
/// [`ManagerError::SourceUnavailable`].
pub struct SpatialSource {
    locator: Locator,
    driver: Option<Box<dyn Driver>>,
}

impl SpatialSource {
    /// Open an existing GeoPackage or connect to a database.
    pub fn open(locator: Locator) -> Result<Self> {
        let driver: Box<dyn Driver> = match &locator {
            Locator::File(path) => Box::new(gpkg::GpkgDriver::open(path)?),
            Locator::Database(conn) => Box::new(postgis::PostgisDriver::connect(conn)?),
        };
        tracing::debug!(locator = %locator, "opened source");
        Ok(Self {
            locator,
            driver: Some(driver),
        })
    }

    /// Create a new, empty GeoPackage. Fails if the file already exists.
    pub fn create_gpkg<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let driver = gpkg::GpkgDriver::create(path)?;
        tracing::debug!(path = %path.display(), "created GeoPackage");
        Ok(Self {
            locator: Locator::file(path),
            driver: Some(Box::new(driver)),
        })
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn kind(&self) -> SourceKind {
        self.locator.kind()
    }

    pub fn is_open(&self) -> bool {
        self.driver.is_some()
    }

    /// Flush and release the handle. Closing an already closed source is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match self.driver.take() {
            Some(driver) => {
                driver.close()?;
                tracing::debug!(locator = %self.locator, "closed source");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn driver(&self) -> Result<&dyn Driver> {
        self.driver.as_deref().ok_or(ManagerError::SourceUnavailable)
    }

    pub fn layer_exists(&self, layer_name: &str) -> Result<bool> {
        self.driver()?.layer_exists(layer_name)
    }

    /// Names of the feature layers; the style table is never listed.
    pub fn list_layers(&self) -> Result<Vec<String>> {
        self.driver()?.list_layers()
    }

    pub fn layer_definition(&self, layer_name: &str) -> Result<LayerDefinition> {
        self.driver()?.layer_definition(layer_name)
    }

    pub fn spatial_ref(&self, layer_name: &str) -> Result<Option<SpatialRef>> {
        self.driver()?.spatial_ref(layer_name)
    }

    pub fn read_features(&self, layer_name: &str) -> Result<Vec<Feature>> {
        self.driver()?.read_features(layer_name)
    }

    pub fn feature_count(&self, layer_name: &str) -> Result<u64> {
        self.driver()?.feature_count(layer_name)
    }

    pub fn snapshot(&self, layer_name: &str) -> Result<LayerSnapshot> {
        let driver = self.driver()?;
        Ok(LayerSnapshot {
            definition: driver.layer_definition(layer_name)?,
            srs: driver.spatial_ref(layer_name)?,
            features: driver.read_features(layer_name)?,
        })
    }

    /// Write `snapshot` as `layer_name`; returns the name actually used.
    pub fn copy_layer(
        &self,
        snapshot: &LayerSnapshot,
        layer_name: &str,
        options: &CopyOptions,
    ) -> Result<String> {
        let driver = self.driver()?;
        tracing::debug!(
            layer = layer_name,
            destination = %self.locator,
            options = ?options.driver_options(),
            "copying layer"
        );
        let stored_name = driver.copy_layer(snapshot, layer_name, options)?;
        tracing::info!(
            layer = %stored_name,
            destination = %self.locator,
            features = snapshot.features.len(),
            "layer copied"
        );
        Ok(stored_name)
    }

    pub fn delete_layer(&self, layer_name: &str) -> Result<()> {
        self.driver()?.delete_layer(layer_name)?;
        tracing::info!(layer = layer_name, source = %self.locator, "layer deleted");
        Ok(())
    }
}

impl fmt::Debug for SpatialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpatialSource")
            .field("locator", &self.locator)
            .field("open", &self.is_open())
            .finish()
    }
}

/// A source that is flushed and closed when it goes out of scope.
///
/// Use [`ScopedSource::release`] to observe close errors; a close failing
/// during drop is only logged.
#[derive(Debug)]
pub struct ScopedSource {
    source: SpatialSource,
}

impl ScopedSource {
    pub fn open(locator: Locator) -> Result<Self> {
        Ok(Self::from(SpatialSource::open(locator)?))
    }

    pub fn create_gpkg<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from(SpatialSource::create_gpkg(path)?))
    }

    /// Close now and report the outcome.
    pub fn release(mut self) -> Result<()> {
        self.source.close()
    }
}

impl From<SpatialSource> for ScopedSource {
    fn from(source: SpatialSource) -> Self {
        Self { source }
    }
}

impl Deref for ScopedSource {
    type Target = SpatialSource;

    fn deref(&self) -> &SpatialSource {
        &self.source
    }
}

impl DerefMut for ScopedSource {
    fn deref_mut(&mut self) -> &mut SpatialSource {
        &mut self.source
    }
}

impl Drop for ScopedSource {
    fn drop(&mut self) {
        if let Err(err) = self.source.close() {
            tracing::warn!(locator = %self.source.locator, error = %err, "failed to close source");
        }
    }
}
