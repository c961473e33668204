use thiserror::Error;

/// Crate error type for layer and source operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The data source could not be opened.
    #[error("cannot open source '{locator}': {reason}")]
    Connection { locator: String, reason: String },
    /// The requested layer does not exist in the source.
    #[error("layer not found: {layer_name}")]
    LayerNotFound { layer_name: String },
    /// Export was requested in a format outside the supported set.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// The source was closed, or could not be opened, when an operation needed it.
    #[error("source is not available")]
    SourceUnavailable,
    /// A layer copy failed after the destination started receiving data.
    #[error("failed writing layer '{layer_name}': {reason}")]
    PartialWrite { layer_name: String, reason: String },
    /// A layer with the same name already exists.
    #[error("layer already exists: {layer_name}")]
    LayerAlreadyExists { layer_name: String },
    /// A geometry type in metadata could not be mapped to a supported type.
    #[error("unsupported geometry type: {0}")]
    UnsupportedGeometryType(String),
    /// A column type declared by the source is not supported.
    #[error("unsupported column type for column '{column}': {declared_type}")]
    UnsupportedColumnType {
        column: String,
        declared_type: String,
    },
    /// Invalid or mixed `z` / `m` dimension flags in GeoPackage metadata.
    #[error("invalid or mixed geometry dimension (z={z}, m={m})")]
    InvalidDimension { z: i8, m: i8 },
    /// Invalid GeoPackage geometry flags byte.
    #[error("invalid gpkg geometry flags: {0:#04x}")]
    InvalidGpkgGeometryFlags(u8),
    /// GeoPackage geometry blob is shorter than its header says.
    #[error("invalid gpkg geometry length: got {len} bytes, expected at least {minimum}")]
    InvalidGpkgGeometryLength { len: usize, minimum: usize },
    /// Referenced `srs_id` does not exist in `gpkg_spatial_ref_sys`.
    #[error("srs_id {srs_id} not found in gpkg_spatial_ref_sys")]
    MissingSpatialRefSysId { srs_id: i32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Wraps errors returned by `rusqlite`.
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
    /// Wraps errors returned by the PostgreSQL client.
    #[error(transparent)]
    Postgres(#[from] postgres::Error),
    /// Wraps errors returned by the `wkb` crate.
    #[error(transparent)]
    Wkb(#[from] wkb::error::WkbError),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
    #[cfg(feature = "http")]
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Message(String),
}

impl ManagerError {
    pub(crate) fn connection(locator: impl ToString, reason: impl ToString) -> Self {
        Self::Connection {
            locator: locator.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn layer_not_found(layer_name: impl Into<String>) -> Self {
        Self::LayerNotFound {
            layer_name: layer_name.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;
