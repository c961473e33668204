//! Engine configuration: where temporary work and finished downloads go, and
//! how database connection strings are put together.

use crate::catalog::{Catalog, NoStyles, StaticCatalog, StyleFetcher};
use crate::error::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory settings shared by every manager in the process.
///
/// Nothing is created on construction; call [`EngineConfig::init`] once at
/// application startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub temp_dir: PathBuf,
    pub downloads_dir: PathBuf,
}

impl EngineConfig {
    /// `<base>/tmp_generator` for scratch work and `<base>/downloads` for artifacts.
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        let base = base.as_ref();
        Self {
            temp_dir: base.join("tmp_generator"),
            downloads_dir: base.join("downloads"),
        }
    }

    /// Create both directory trees.
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.temp_dir)?;
        std::fs::create_dir_all(&self.downloads_dir)?;
        tracing::debug!(
            temp_dir = %self.temp_dir.display(),
            downloads_dir = %self.downloads_dir.display(),
            "engine directories ready"
        );
        Ok(())
    }

    pub fn new_temp_dir(&self) -> Result<PathBuf> {
        new_unique_dir(&self.temp_dir)
    }

    pub fn new_download_dir(&self) -> Result<PathBuf> {
        new_unique_dir(&self.downloads_dir)
    }
}

/// Create `<base>/YYYY/MM/DD/HH/MM/SS/<8 hex chars>/` and return it.
pub fn new_unique_dir(base: &Path) -> Result<PathBuf> {
    let timestamp = chrono::Local::now().format("%Y/%m/%d/%H/%M/%S").to_string();
    let random = uuid::Uuid::new_v4().simple().to_string();
    let mut target = base.to_path_buf();
    for segment in timestamp.split('/') {
        target.push(segment);
    }
    target.push(&random[..8]);
    std::fs::create_dir_all(&target)?;
    Ok(target)
}

/// Credentials of a PostGIS datastore.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

impl ConnectionParams {
    pub const DEFAULT_PORT: u16 = 5432;

    pub fn new(
        host: impl Into<String>,
        dbname: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: Self::DEFAULT_PORT,
            dbname: dbname.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// libpq keyword/value connection string.
    pub fn connection_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "host={} port={} dbname={} user={} password={}",
            self.host, self.port, self.dbname, self.user, self.password
        )
    }
}

// Keep passwords out of logs.
impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Configuration plus the portal collaborators, shared by every manager.
#[derive(Clone)]
pub struct Portal {
    pub config: EngineConfig,
    pub catalog: Arc<dyn Catalog>,
    pub styles: Arc<dyn StyleFetcher>,
}

impl Portal {
    pub fn new(config: EngineConfig, catalog: Arc<dyn Catalog>, styles: Arc<dyn StyleFetcher>) -> Self {
        Self {
            config,
            catalog,
            styles,
        }
    }

    /// A portal with no published layers and no style server.
    pub fn standalone(config: EngineConfig) -> Self {
        Self::new(config, Arc::new(StaticCatalog::new()), Arc::new(NoStyles))
    }
}

impl fmt::Debug for Portal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Portal")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionParams, EngineConfig};

    #[test]
    fn builds_libpq_connection_string() {
        let params = ConnectionParams::new("127.0.0.1", "datastore", "geonode", "secret");
        assert_eq!(
            params.connection_string(),
            "host=127.0.0.1 port=5432 dbname=datastore user=geonode password=secret"
        );
        let params = params.with_port(6543);
        assert!(params.connection_string().contains("port=6543"));
        assert!(!format!("{params:?}").contains("secret"));
    }

    #[test]
    fn unique_dirs_follow_timestamp_layout() -> crate::Result<()> {
        let base = tempfile::tempdir()?;
        let config = EngineConfig::new(base.path());
        config.init()?;

        let first = config.new_temp_dir()?;
        let second = config.new_temp_dir()?;
        assert_ne!(first, second);
        assert!(first.is_dir());

        let relative = first.strip_prefix(&config.temp_dir).expect("under temp dir");
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        assert_eq!(segments.len(), 7);
        assert_eq!(segments[0].len(), 4);
        assert!(segments[1..6].iter().all(|s| s.len() == 2));
        assert_eq!(segments[6].len(), 8);
        assert!(segments[6].chars().all(|c| c.is_ascii_hexdigit()));

        let download = config.new_download_dir()?;
        assert!(download.starts_with(&config.downloads_dir));
        Ok(())
    }
}
