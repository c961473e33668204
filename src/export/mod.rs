//! Write-only drivers for the export formats and the zip packaging of their
//! output.

mod geojson;
mod gml;
mod gpx;
mod gtm;
mod kml;
mod shapefile;
mod xml;

pub(crate) use shapefile::write_prj;

use crate::error::{ManagerError, Result};
use crate::source::{CopyOptions, LayerSnapshot, SpatialSource};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

/// Formats a layer can be exported to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Gpkg,
    Kml,
    GeoJson,
    Gml,
    Gpx,
    GpsTrackMaker,
    EsriShapefile,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 7] = [
        ExportFormat::Gpkg,
        ExportFormat::Kml,
        ExportFormat::GeoJson,
        ExportFormat::Gml,
        ExportFormat::Gpx,
        ExportFormat::GpsTrackMaker,
        ExportFormat::EsriShapefile,
    ];

    /// Driver name, as accepted by [`ExportFormat::from_str`].
    pub fn driver_name(self) -> &'static str {
        match self {
            ExportFormat::Gpkg => "GPKG",
            ExportFormat::Kml => "KML",
            ExportFormat::GeoJson => "GeoJSON",
            ExportFormat::Gml => "GML",
            ExportFormat::Gpx => "GPX",
            ExportFormat::GpsTrackMaker => "GPSTrackMaker",
            ExportFormat::EsriShapefile => "ESRI Shapefile",
        }
    }

    /// Extension of the main output file, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Gpkg => "gpkg",
            ExportFormat::Kml => "kml",
            ExportFormat::GeoJson => "json",
            ExportFormat::Gml => "gml",
            ExportFormat::Gpx => "gpx",
            ExportFormat::GpsTrackMaker => "gmt",
            ExportFormat::EsriShapefile => "shp",
        }
    }
}

/// Driver names are matched ignoring ASCII case.
impl FromStr for ExportFormat {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        ExportFormat::ALL
            .into_iter()
            .find(|format| format.driver_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ManagerError::UnsupportedFormat(s.to_string()))
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.driver_name())
    }
}

/// Write `snapshot` into `dir` as `<name>.<extension>` and return the path of
/// the main file. Shapefiles also get their `.shx`, `.dbf` and `.cpg` siblings.
pub(crate) fn write_layer(
    format: ExportFormat,
    snapshot: &LayerSnapshot,
    dir: &Path,
    name: &str,
) -> Result<PathBuf> {
    let path = dir.join(format!("{name}.{}", format.extension()));
    tracing::debug!(format = %format, path = %path.display(), "writing layer");
    match format {
        ExportFormat::Gpkg => {
            let mut target = SpatialSource::create_gpkg(&path)?;
            let options = CopyOptions {
                geometry_name: snapshot.definition.geometry.as_ref().map(|g| g.name.clone()),
                ..CopyOptions::default()
            };
            let copied = target.copy_layer(snapshot, name, &options);
            target.close()?;
            copied?;
        }
        ExportFormat::GeoJson => {
            let mut out = BufWriter::new(File::create(&path)?);
            geojson::write(&mut out, snapshot, name)?;
            out.flush()?;
        }
        ExportFormat::Kml => {
            let mut out = BufWriter::new(File::create(&path)?);
            kml::write(&mut out, snapshot, name)?;
            out.flush()?;
        }
        ExportFormat::Gml => {
            let mut out = BufWriter::new(File::create(&path)?);
            gml::write(&mut out, snapshot, name)?;
            out.flush()?;
        }
        ExportFormat::Gpx => {
            let mut out = BufWriter::new(File::create(&path)?);
            gpx::write(&mut out, snapshot)?;
            out.flush()?;
        }
        ExportFormat::GpsTrackMaker => {
            let mut out = BufWriter::new(File::create(&path)?);
            gtm::write(&mut out, snapshot)?;
            out.flush()?;
        }
        ExportFormat::EsriShapefile => shapefile::write(dir, name, snapshot)?,
    }
    Ok(path)
}

/// Zip every file below `dir` into `archive`, keeping paths relative to `dir`.
pub(crate) fn zip_dir(dir: &Path, archive: &Path) -> Result<()> {
    let mut zip = zip::ZipWriter::new(BufWriter::new(File::create(archive)?));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = std::fs::read_dir(&current)?.collect::<std::io::Result<Vec<_>>>()?;
        entries.sort_by_key(|entry| entry.file_name());
        for entry in entries {
            let path = entry.path();
            let relative = relative_name(dir, &path)?;
            if entry.file_type()?.is_dir() {
                zip.add_directory(relative, options)?;
                pending.push(path);
            } else {
                zip.start_file(relative, options)?;
                std::io::copy(&mut File::open(&path)?, &mut zip)?;
            }
        }
    }
    zip.finish()?.flush()?;
    Ok(())
}

// Zip entry names always use forward slashes.
fn relative_name(base: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(base)
        .map_err(|err| ManagerError::Message(format!("{}: {err}", path.display())))?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

#[cfg(test)]
mod tests {
    use super::{ExportFormat, write_layer, zip_dir};
    use crate::Result;
    use crate::error::ManagerError;
    use crate::source::SpatialSource;
    use crate::test_support::{parcels_snapshot, quakes_snapshot, roads_snapshot};
    use std::io::Read;

    #[test]
    fn parses_driver_names() -> Result<()> {
        assert_eq!("GPKG".parse::<ExportFormat>()?, ExportFormat::Gpkg);
        assert_eq!("ESRI Shapefile".parse::<ExportFormat>()?, ExportFormat::EsriShapefile);
        assert_eq!("geojson".parse::<ExportFormat>()?, ExportFormat::GeoJson);
        assert_eq!("esri shapefile".parse::<ExportFormat>()?, ExportFormat::EsriShapefile);
        assert_eq!("GPSTrackMaker".parse::<ExportFormat>()?, ExportFormat::GpsTrackMaker);
        assert!(matches!(
            "CSV".parse::<ExportFormat>(),
            Err(ManagerError::UnsupportedFormat(name)) if name == "CSV"
        ));
        Ok(())
    }

    #[test]
    fn every_format_writes_a_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let quakes = quakes_snapshot();
        for format in ExportFormat::ALL {
            let sub = dir.path().join(format.extension());
            std::fs::create_dir(&sub)?;
            let path = write_layer(format, &quakes, &sub, "quakes")?;
            assert!(path.is_file(), "{format} did not write {}", path.display());
            assert!(std::fs::metadata(&path)?.len() > 0);
        }
        Ok(())
    }

    #[test]
    fn gpkg_export_reopens_with_same_schema() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let roads = roads_snapshot();
        let path = write_layer(ExportFormat::Gpkg, &roads, dir.path(), "roads")?;
        let source = SpatialSource::open(path.into())?;
        assert_eq!(source.list_layers()?, vec!["roads".to_string()]);
        assert_eq!(source.feature_count("roads")?, 3);
        assert_eq!(source.layer_definition("roads")?.fields, roads.definition.fields);
        Ok(())
    }

    #[test]
    fn gpx_rejects_polygons() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let result = write_layer(ExportFormat::Gpx, &parcels_snapshot(), dir.path(), "parcels");
        assert!(matches!(result, Err(ManagerError::UnsupportedGeometryType(_))));
        Ok(())
    }

    #[test]
    fn zips_relative_paths() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let content = dir.path().join("content");
        std::fs::create_dir_all(content.join("nested"))?;
        std::fs::write(content.join("a.txt"), "alpha")?;
        std::fs::write(content.join("nested").join("b.txt"), "beta")?;
        let archive = dir.path().join("out.zip");
        zip_dir(&content, &archive)?;

        let mut zip = zip::ZipArchive::new(std::fs::File::open(&archive)?)?;
        let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "nested/", "nested/b.txt"]);

        let mut body = String::new();
        zip.by_name("nested/b.txt")?.read_to_string(&mut body)?;
        assert_eq!(body, "beta");
        Ok(())
    }
}
