//! Layer management for GeoPackage files and PostGIS databases.
//!
//! ## Overview
//!
//! - `SpatialSource` is an open GeoPackage or PostGIS database; `ScopedSource`
//!   closes it on every exit path.
//! - `SourceManager` owns one source and talks to the portal: it looks layers
//!   up, compares their schemas with published layers, exports packages and
//!   backs the portal up.
//! - `LayerHandle` is one layer of an open source: schema, projection,
//!   features, unique naming, copies to other sources and zipped exports.
//! - `StyleCatalog` reads and writes the `layer_styles` table of a GeoPackage.
//! - `Portal` bundles the directory configuration with the catalog and style
//!   collaborators.
//!
//! ## Short usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use gpkg_layer_manager::{EngineConfig, Locator, Portal, SourceManager};
//!
//! let config = EngineConfig::new("/var/lib/layers");
//! config.init()?;
//! let portal = Arc::new(Portal::standalone(config));
//!
//! let manager = SourceManager::open(Locator::file("upload.gpkg"), portal)?;
//! for layer in manager.layers()? {
//!     println!("{} ({} features)", layer.name(), layer.feature_count()?);
//!     for field in layer.full_schema() {
//!         println!("  {} {}", field.name, field.type_name);
//!     }
//! }
//!
//! let roads = manager.get_layer_by_name("roads")?.ok_or("no roads layer")?;
//! let archive = roads.export_as("ESRI Shapefile", "roads")?;
//! println!("download: {}", archive.display());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Publishing into PostGIS
//!
//! ```no_run
//! use std::sync::Arc;
//! use gpkg_layer_manager::{ConnectionParams, EngineConfig, Locator, Portal, SourceManager};
//!
//! let portal = Arc::new(Portal::standalone(EngineConfig::new("/var/lib/layers")));
//! let manager = SourceManager::open(Locator::file("upload.gpkg"), portal)?;
//! let params = ConnectionParams::new("db", "datastore", "geonode", "secret");
//! let stored = manager.layer_to_postgis(
//!     "roads",
//!     &params.connection_string(),
//!     false, // overwrite
//!     false, // temporary
//!     true,  // launder
//!     None,
//! )?;
//! println!("published as {stored}");
//! # Ok::<(), gpkg_layer_manager::ManagerError>(())
//! ```
mod catalog;
mod config;
mod conversions;
mod error;
mod export;
mod geometry;
mod layer;
mod manager;
mod ogc_sql;
mod schema;
mod slug;
mod source;
mod sql_functions;
mod srs;
mod style;
mod types;

#[cfg(test)]
mod test_support;

pub use catalog::{Catalog, NoStyles, PublishedLayer, StaticCatalog, StyleFetcher};
#[cfg(feature = "http")]
pub use catalog::HttpStyleFetcher;
pub use config::{ConnectionParams, EngineConfig, Portal, new_unique_dir};
pub use error::{ManagerError, Result};
pub use export::ExportFormat;
pub use geometry::Bounds;
pub use layer::{LayerHandle, LayerSummary, MAX_LAYER_NAME_LEN};
pub use manager::SourceManager;
pub use schema::{SchemaComparison, SchemaField, compare, full_schema};
pub use slug::slugify;
pub use source::{CopyOptions, Feature, LayerSnapshot, Locator, ScopedSource, SourceKind, SpatialSource};
pub use sql_functions::register_spatial_functions;
pub use srs::{Projection, SpatialRef};
pub use style::{StyleCatalog, StyleRecord};
pub use types::{FieldDefn, FieldType, GeomFieldDefn, GeometryKind, LayerDefinition, Value};

// Re-exported because it appears in public fields.
pub use wkb::reader::Dimension;
