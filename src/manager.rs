//! [`SourceManager`]: the entry point the request, task and backup layers
//! call into.

use crate::config::Portal;
use crate::error::{ManagerError, Result};
use crate::layer::LayerHandle;
use crate::schema::{self, SchemaComparison, SchemaField};
use crate::source::{CopyOptions, Feature, Locator, ScopedSource, SpatialSource};
use crate::style::StyleCatalog;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const GPKG_EXTENSION: &str = "gpkg";

/// An open source plus the portal it publishes to.
///
/// One manager per operation: the source is not shared across threads.
#[derive(Debug)]
pub struct SourceManager {
    source: ScopedSource,
    portal: Arc<Portal>,
}

/// A published layer found in the datastore during a backup.
#[derive(Debug)]
struct BackupEntry {
    table_name: String,
    geometry_attribute: String,
    style: Option<(String, String)>,
}

impl SourceManager {
    /// Open `locator` right away; fails with [`ManagerError::Connection`].
    pub fn open(locator: Locator, portal: Arc<Portal>) -> Result<Self> {
        Ok(Self {
            source: ScopedSource::open(locator)?,
            portal,
        })
    }

    pub fn source(&self) -> &SpatialSource {
        &self.source
    }

    pub fn portal(&self) -> &Portal {
        &self.portal
    }

    /// Flush and close the source, reporting close errors.
    pub fn close(self) -> Result<()> {
        self.source.release()
    }

    pub fn layer_names(&self) -> Result<Vec<String>> {
        self.source.list_layers()
    }

    pub fn layers(&self) -> Result<Vec<LayerHandle<'_>>> {
        self.layer_names()?
            .iter()
            .map(|name| LayerHandle::new(&self.source, &self.portal, name))
            .collect()
    }

    /// `None` when the source has no such layer.
    pub fn get_layer_by_name(&self, name: &str) -> Result<Option<LayerHandle<'_>>> {
        if !self.source.layer_exists(name)? {
            return Ok(None);
        }
        LayerHandle::new(&self.source, &self.portal, name).map(Some)
    }

    fn layer_or_not_found(&self, name: &str) -> Result<LayerHandle<'_>> {
        self.get_layer_by_name(name)?
            .ok_or_else(|| ManagerError::layer_not_found(name))
    }

    /// Full schema of every layer, keyed by layer name.
    pub fn read_schema(&self) -> Result<BTreeMap<String, Vec<SchemaField>>> {
        self.layers()?
            .into_iter()
            .map(|layer| Ok((layer.name().to_string(), layer.full_schema())))
            .collect()
    }

    pub fn layers_features(&self) -> Result<BTreeMap<String, Vec<Feature>>> {
        self.layers()?
            .into_iter()
            .map(|layer| Ok((layer.name().to_string(), layer.features()?)))
            .collect()
    }

    /// Compare `layer_name` of this source with `catalog_layer_name` of the
    /// portal datastore.
    pub fn check_schema_against_catalog_layer(
        &self,
        layer_name: &str,
        catalog_layer_name: &str,
        ignore_case: bool,
    ) -> Result<SchemaComparison> {
        let layer = self.layer_or_not_found(layer_name)?;
        let datastore = SourceManager::open(self.portal.catalog.datastore()?, Arc::clone(&self.portal))?;
        let published = datastore.layer_or_not_found(catalog_layer_name)?;
        let comparison = schema::compare(&layer.full_schema(), &published.full_schema(), ignore_case);
        tracing::debug!(
            layer = layer_name,
            catalog_layer = catalog_layer_name,
            compatible = comparison.compatible,
            "compared schemas"
        );
        Ok(comparison)
    }

    /// Copy all layers, or the named ones, into a new GeoPackage at
    /// `destination` (`.gpkg` is appended when missing).
    pub fn export_named_layers_as_package(
        &self,
        destination: &Path,
        layer_names: Option<&[String]>,
    ) -> Result<PathBuf> {
        let destination = with_gpkg_extension(destination);
        let target = ScopedSource::create_gpkg(&destination)?;
        let mut copied = 0;
        for name in self.layer_names()? {
            if layer_names.is_some_and(|wanted| !wanted.contains(&name)) {
                continue;
            }
            let snapshot = self.source.snapshot(&name)?;
            let options = CopyOptions {
                geometry_name: snapshot.definition.geometry.as_ref().map(|g| g.name.clone()),
                ..CopyOptions::default()
            };
            target.copy_layer(&snapshot, &name, &options)?;
            copied += 1;
        }
        target.release()?;
        tracing::info!(
            destination = %destination.display(),
            layers = copied,
            "exported package"
        );
        Ok(destination)
    }

    /// Export every published layer present in this source, with its default
    /// style, into `backup_<timestamp>.gpkg` under `destination_dir` (default:
    /// a fresh download directory).
    ///
    /// Failures are logged and turned into `None`.
    pub fn backup_portal(&self, destination_dir: Option<&Path>) -> Option<PathBuf> {
        match self.try_backup_portal(destination_dir) {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::error!(source = %self.source.locator(), error = %err, "portal backup failed");
                None
            }
        }
    }

    fn try_backup_portal(&self, destination_dir: Option<&Path>) -> Result<PathBuf> {
        let mut entries = Vec::new();
        for published in self.portal.catalog.published_layers()? {
            if !self.source.layer_exists(&published.name)? {
                tracing::debug!(layer = %published.name, "published layer not in datastore");
                continue;
            }
            let style = match (&published.style_name, &published.style_url) {
                (Some(style_name), Some(url)) => match self.portal.styles.fetch_style_body(url) {
                    Ok(body) => Some((style_name.clone(), body)),
                    Err(err) => {
                        tracing::warn!(layer = %published.name, url = %url, error = %err, "style not fetched");
                        None
                    }
                },
                _ => None,
            };
            entries.push(BackupEntry {
                table_name: published.name,
                geometry_attribute: published.geometry_attribute,
                style,
            });
        }

        let dir = match destination_dir {
            Some(dir) => dir.to_path_buf(),
            None => self.portal.config.new_download_dir()?,
        };
        let file_name = format!("backup_{}.{GPKG_EXTENSION}", chrono::Local::now().format("%Y%m%d_%H%M%S"));
        let names: Vec<String> = entries.iter().map(|e| e.table_name.clone()).collect();
        let package = self.export_named_layers_as_package(&dir.join(file_name), Some(&names))?;

        let styles = StyleCatalog::open(&package)?;
        styles.ensure_table_exists()?;
        for entry in &entries {
            if let Some((style_name, body)) = &entry.style {
                styles.add_style(&entry.table_name, &entry.geometry_attribute, style_name, body, true)?;
            }
        }
        tracing::info!(package = %package.display(), layers = entries.len(), "portal backup written");
        Ok(package)
    }

    /// Copy `layer_name` into the PostGIS database behind `connection_string`.
    pub fn layer_to_postgis(
        &self,
        layer_name: &str,
        connection_string: &str,
        overwrite: bool,
        temporary: bool,
        launder: bool,
        name: Option<&str>,
    ) -> Result<String> {
        let destination = ScopedSource::open(Locator::database(connection_string))?;
        let layer = self.layer_or_not_found(layer_name)?;
        let stored = layer.copy_to_source(&destination, overwrite, temporary, launder, name)?;
        destination.release()?;
        Ok(stored)
    }
}

fn with_gpkg_extension(path: &Path) -> PathBuf {
    let has_extension = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(GPKG_EXTENSION));
    if has_extension {
        path.to_path_buf()
    } else {
        let mut os = path.as_os_str().to_os_string();
        os.push(".");
        os.push(GPKG_EXTENSION);
        PathBuf::from(os)
    }
}

#[cfg(test)]
mod tests {
    use super::{SourceManager, with_gpkg_extension};
    use crate::Result;
    use crate::catalog::{PublishedLayer, StaticCatalog, StyleFetcher};
    use crate::config::{EngineConfig, Portal};
    use crate::error::ManagerError;
    use crate::schema::SchemaField;
    use crate::source::{Locator, SpatialSource};
    use crate::style::StyleCatalog;
    use crate::test_support::{fixture_gpkg, parcels_snapshot, quakes_snapshot, roads_snapshot};
    use crate::types::{FieldDefn, FieldType, Value};
    use std::io::Read;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    struct FixedStyles;

    impl StyleFetcher for FixedStyles {
        fn fetch_style_body(&self, url: &str) -> Result<String> {
            match url {
                "http://maps/styles/roads.sld" => Ok("<StyledLayerDescriptor/>".to_string()),
                _ => Err(ManagerError::Message(format!("404 for {url}"))),
            }
        }
    }

    fn portal(base: &Path, catalog: StaticCatalog) -> Result<Arc<Portal>> {
        let config = EngineConfig::new(base);
        config.init()?;
        Ok(Arc::new(Portal::new(config, Arc::new(catalog), Arc::new(FixedStyles))))
    }

    fn files_under(dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let Ok(entries) = std::fs::read_dir(&current) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    files.push(path);
                }
            }
        }
        files
    }

    fn roads_with_year() -> crate::source::LayerSnapshot {
        let mut roads = roads_snapshot();
        roads.definition.fields.push(FieldDefn::new("year", FieldType::Integer));
        for feature in &mut roads.features {
            feature.properties.push(Value::from(2019_i64));
        }
        roads
    }

    #[test]
    fn enumerates_layers_without_style_table() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("upload.gpkg");
        fixture_gpkg(&path, &[("roads", roads_snapshot()), ("parcels", parcels_snapshot())])?;
        let styles = StyleCatalog::open(&path)?;
        styles.ensure_table_exists()?;
        styles.add_style("roads", "geom", "roads", "<sld/>", true)?;
        drop(styles);

        let manager = SourceManager::open(Locator::file(&path), portal(dir.path(), StaticCatalog::new())?)?;
        assert_eq!(manager.layer_names()?, vec!["roads".to_string(), "parcels".to_string()]);

        let schema = manager.read_schema()?;
        assert_eq!(schema.len(), 2);
        assert_eq!(
            schema["roads"][..2],
            [
                SchemaField::new("name", "String", 4),
                SchemaField::new("length", "Real", 2)
            ]
        );
        assert_eq!(schema["parcels"][0], SchemaField::new("owner", "String", 4));

        let features = manager.layers_features()?;
        assert_eq!(features["roads"].len(), 3);
        assert!(manager.get_layer_by_name("layer_styles")?.is_none());
        assert!(manager.get_layer_by_name("rivers")?.is_none());
        Ok(())
    }

    #[test]
    fn compares_against_catalog_layer() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let upload = dir.path().join("upload.gpkg");
        let datastore = dir.path().join("datastore.gpkg");
        fixture_gpkg(&upload, &[("roads", roads_snapshot())])?;
        fixture_gpkg(&datastore, &[("roads_2019", roads_with_year())])?;

        let catalog = StaticCatalog::new().with_datastore(Locator::file(&datastore));
        let manager = SourceManager::open(Locator::file(&upload), portal(dir.path(), catalog)?)?;

        let comparison = manager.check_schema_against_catalog_layer("roads", "roads_2019", false)?;
        assert!(!comparison.compatible);
        assert_eq!(comparison.new_fields, vec![SchemaField::new("year", "Integer", 0)]);
        assert!(comparison.deleted_fields.is_empty());

        assert!(matches!(
            manager.check_schema_against_catalog_layer("rivers", "roads_2019", false),
            Err(ManagerError::LayerNotFound { layer_name }) if layer_name == "rivers"
        ));
        assert!(matches!(
            manager.check_schema_against_catalog_layer("roads", "rivers", false),
            Err(ManagerError::LayerNotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn copy_into_taken_name_gets_suffix() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let upload = dir.path().join("upload.gpkg");
        let destination = dir.path().join("destination.gpkg");
        fixture_gpkg(&upload, &[("quakes", quakes_snapshot())])?;
        fixture_gpkg(&destination, &[("quakes", quakes_snapshot())])?;

        let manager = SourceManager::open(Locator::file(&upload), portal(dir.path(), StaticCatalog::new())?)?;
        let layer = manager.get_layer_by_name("quakes")?.expect("quakes");
        let mut target = SpatialSource::open(Locator::file(&destination))?;

        let stored = layer.copy_to_source(&target, false, false, false, None)?;
        assert_ne!(stored, "quakes");
        assert!(stored.starts_with("quakes_"));
        assert_eq!(stored.len(), "quakes_".len() + 8);
        assert_eq!(target.list_layers()?.len(), 2);
        assert_eq!(target.feature_count(&stored)?, 4);

        let replaced = layer.copy_to_source(&target, true, false, false, None)?;
        assert_eq!(replaced, "quakes");
        assert_eq!(target.list_layers()?.len(), 2);

        target.close()?;
        assert!(matches!(
            layer.copy_to_source(&target, false, false, false, None),
            Err(ManagerError::SourceUnavailable)
        ));
        Ok(())
    }

    #[test]
    fn taken_explicit_name_falls_back_to_layer_name() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let upload = dir.path().join("upload.gpkg");
        let destination = dir.path().join("destination.gpkg");
        fixture_gpkg(&upload, &[("quakes", quakes_snapshot())])?;
        fixture_gpkg(&destination, &[("target", roads_snapshot())])?;

        let manager = SourceManager::open(Locator::file(&upload), portal(dir.path(), StaticCatalog::new())?)?;
        let layer = manager.get_layer_by_name("quakes")?.expect("quakes");
        let target = SpatialSource::open(Locator::file(&destination))?;

        let stored = layer.copy_to_source(&target, false, false, false, Some("target"))?;
        assert_eq!(stored, "quakes");
        assert_eq!(target.feature_count("quakes")?, 4);
        assert_eq!(target.feature_count("target")?, 3);

        let free = layer.copy_to_source(&target, false, false, false, Some("quakes_copy"))?;
        assert_eq!(free, "quakes_copy");
        Ok(())
    }

    #[test]
    fn shapefile_export_is_zipped_with_prj() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let upload = dir.path().join("upload.gpkg");
        fixture_gpkg(&upload, &[("layer1", quakes_snapshot())])?;
        let portal = portal(dir.path(), StaticCatalog::new())?;
        let manager = SourceManager::open(Locator::file(&upload), Arc::clone(&portal))?;
        let layer = manager.get_layer_by_name("layer1")?.expect("layer1");

        let archive = layer.export_as("ESRI Shapefile", "layer1")?;
        assert!(archive.starts_with(&portal.config.downloads_dir));
        assert_eq!(archive.file_name().and_then(|n| n.to_str()), Some("layer1.zip"));

        let mut zip = zip::ZipArchive::new(std::fs::File::open(&archive)?)?;
        let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(
            names,
            vec!["layer1.cpg", "layer1.dbf", "layer1.prj", "layer1.shp", "layer1.shx"]
        );
        let mut prj = String::new();
        zip.by_name("layer1.prj")?.read_to_string(&mut prj)?;
        assert!(prj.contains("WGS 84"));

        assert!(files_under(&portal.config.temp_dir).is_empty());
        Ok(())
    }

    #[test]
    fn failed_export_leaves_no_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let upload = dir.path().join("upload.gpkg");
        fixture_gpkg(&upload, &[("parcels", parcels_snapshot())])?;
        let portal = portal(dir.path(), StaticCatalog::new())?;
        let manager = SourceManager::open(Locator::file(&upload), Arc::clone(&portal))?;
        let layer = manager.get_layer_by_name("parcels")?.expect("parcels");

        assert!(matches!(
            layer.export_as("CSV", "parcels"),
            Err(ManagerError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            layer.export_as("GPX", "parcels"),
            Err(ManagerError::UnsupportedGeometryType(_))
        ));
        assert!(files_under(&portal.config.temp_dir).is_empty());
        assert!(files_under(&portal.config.downloads_dir).is_empty());
        Ok(())
    }

    #[test]
    fn gpkg_export_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let upload = dir.path().join("upload.gpkg");
        fixture_gpkg(&upload, &[("roads", roads_snapshot())])?;
        let manager = SourceManager::open(Locator::file(&upload), portal(dir.path(), StaticCatalog::new())?)?;
        let layer = manager.get_layer_by_name("roads")?.expect("roads");

        let archive = layer.export_as("GPKG", "roads")?;
        let mut zip = zip::ZipArchive::new(std::fs::File::open(&archive)?)?;
        let extracted = dir.path().join("extracted.gpkg");
        std::io::copy(
            &mut zip.by_name("roads.gpkg")?,
            &mut std::fs::File::create(&extracted)?,
        )?;

        let reopened = SourceManager::open(Locator::file(&extracted), Arc::new(manager.portal().clone()))?;
        let copy = reopened.get_layer_by_name("roads")?.expect("roads");
        assert_eq!(copy.feature_count()?, layer.feature_count()?);
        assert_eq!(copy.full_schema(), layer.full_schema());
        Ok(())
    }

    #[test]
    fn exports_named_layers_into_package() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let upload = dir.path().join("upload.gpkg");
        fixture_gpkg(
            &upload,
            &[("roads", roads_snapshot()), ("parcels", parcels_snapshot())],
        )?;
        let manager = SourceManager::open(Locator::file(&upload), portal(dir.path(), StaticCatalog::new())?)?;

        let only_parcels = manager
            .export_named_layers_as_package(&dir.path().join("subset"), Some(&["parcels".to_string()]))?;
        assert_eq!(only_parcels, dir.path().join("subset.gpkg"));
        let subset = SpatialSource::open(Locator::file(&only_parcels))?;
        assert_eq!(subset.list_layers()?, vec!["parcels".to_string()]);

        let everything = manager.export_named_layers_as_package(&dir.path().join("all.gpkg"), None)?;
        let all = SpatialSource::open(Locator::file(&everything))?;
        assert_eq!(all.list_layers()?.len(), 2);

        assert!(matches!(
            manager.export_named_layers_as_package(&dir.path().join("missing").join("x"), None),
            Err(ManagerError::Io(_))
        ));
        Ok(())
    }

    #[test]
    fn backup_writes_layers_and_styles() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let datastore = dir.path().join("datastore.gpkg");
        fixture_gpkg(
            &datastore,
            &[("roads", roads_snapshot()), ("parcels", parcels_snapshot())],
        )?;
        let catalog = StaticCatalog::new().with_layers([
            PublishedLayer::new("roads", "geom").with_style("roads", "http://maps/styles/roads.sld"),
            PublishedLayer::new("parcels", "geom").with_style("parcels", "http://maps/styles/gone.sld"),
            PublishedLayer::new("rivers", "geom"),
        ]);
        let manager = SourceManager::open(Locator::file(&datastore), portal(dir.path(), catalog)?)?;

        let backup_dir = dir.path().join("backups");
        std::fs::create_dir(&backup_dir)?;
        let package = manager.backup_portal(Some(&backup_dir)).expect("backup");
        assert!(package.starts_with(&backup_dir));
        let file_name = package.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(file_name.starts_with("backup_") && file_name.ends_with(".gpkg"));

        let backup = SpatialSource::open(Locator::file(&package))?;
        assert_eq!(backup.list_layers()?, vec!["roads".to_string(), "parcels".to_string()]);
        drop(backup);

        let styles = StyleCatalog::open(&package)?.get_styles()?;
        assert_eq!(styles.len(), 1);
        assert_eq!(styles[0].table_name.as_deref(), Some("roads"));
        assert_eq!(styles[0].use_as_default, Some(true));

        assert!(manager.backup_portal(Some(&dir.path().join("missing"))).is_none());
        Ok(())
    }

    #[test]
    fn postgis_copy_reports_connection_errors() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let upload = dir.path().join("upload.gpkg");
        fixture_gpkg(&upload, &[("roads", roads_snapshot())])?;
        let manager = SourceManager::open(Locator::file(&upload), portal(dir.path(), StaticCatalog::new())?)?;
        let result = manager.layer_to_postgis(
            "roads",
            "host=127.0.0.1 port=1 dbname=gis user=gis password=secret connect_timeout=2",
            false,
            false,
            true,
            None,
        );
        match result {
            Err(ManagerError::Connection { locator, .. }) => assert!(!locator.contains("secret")),
            other => panic!("expected a connection error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn describes_layers() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let upload = dir.path().join("upload.gpkg");
        fixture_gpkg(&upload, &[("Quakes 1776", quakes_snapshot())])?;
        let catalog = StaticCatalog::new().with_layers([PublishedLayer::new("quakes_1776", "geom")]);
        let manager = SourceManager::open(Locator::file(&upload), portal(dir.path(), catalog)?)?;
        let layer = manager.get_layer_by_name("Quakes 1776")?.expect("layer");

        assert_eq!(layer.slugged_name(), "Quakes_1776");
        assert!(layer.is_known_in_catalog(None)?);
        assert!(!layer.is_known_in_catalog(Some("rivers"))?);

        let summary = layer.describe()?;
        assert_eq!(summary.feature_count, 4);
        assert_eq!(summary.geometry_type_name, "Point");
        assert_eq!(summary.geometry_type, 1);
        assert!(summary.expected_name.starts_with("quakes_1776_"));
        let projection = summary.projection.expect("projection");
        assert_eq!(projection.geographic_crs_name.as_deref(), Some("WGS 84"));
        Ok(())
    }

    #[test]
    fn appends_gpkg_extension() {
        assert_eq!(with_gpkg_extension(Path::new("/tmp/out")), PathBuf::from("/tmp/out.gpkg"));
        assert_eq!(with_gpkg_extension(Path::new("/tmp/out.GPKG")), PathBuf::from("/tmp/out.GPKG"));
        assert_eq!(
            with_gpkg_extension(Path::new("/tmp/out.v2")),
            PathBuf::from("/tmp/out.v2.gpkg")
        );
    }

    #[test]
    fn delete_removes_layer() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let upload = dir.path().join("upload.gpkg");
        fixture_gpkg(&upload, &[("roads", roads_snapshot()), ("parcels", parcels_snapshot())])?;
        let manager = SourceManager::open(Locator::file(&upload), portal(dir.path(), StaticCatalog::new())?)?;
        manager.get_layer_by_name("roads")?.expect("roads").delete()?;
        assert_eq!(manager.layer_names()?, vec!["parcels".to_string()]);
        manager.close()
    }
}
