//! The `layer_styles` table stored next to the layers of a GeoPackage.
//!
//! The table follows the QGIS layout so desktop clients pick the styles up.
//! Reads and writes against a package without the table are no-ops: callers
//! run [`StyleCatalog::ensure_table_exists`] before each batch of inserts.

use crate::error::{ManagerError, Result};
use crate::ogc_sql::{
    SQL_CREATE_LAYER_STYLES, SQL_INSERT_LAYER_STYLE, SQL_TABLE_EXISTS, STYLES_TABLE_NAME,
    sql_select_layer_styles,
};
use quick_xml::events::{BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::Serialize;
use std::path::Path;

/// One row of `layer_styles`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StyleRecord {
    pub id: i64,
    #[serde(rename = "f_table_catalog")]
    pub table_catalog: Option<String>,
    #[serde(rename = "f_table_schema")]
    pub table_schema: Option<String>,
    #[serde(rename = "f_table_name")]
    pub table_name: Option<String>,
    #[serde(rename = "f_geometry_column")]
    pub geometry_column: Option<String>,
    #[serde(rename = "styleName")]
    pub style_name: Option<String>,
    #[serde(rename = "styleQML")]
    pub style_qml: Option<String>,
    #[serde(rename = "styleSLD")]
    pub style_sld: Option<String>,
    #[serde(rename = "useAsDefault")]
    pub use_as_default: Option<bool>,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub ui: Option<String>,
    pub update_time: Option<String>,
}

impl StyleRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            table_catalog: row.get(1)?,
            table_schema: row.get(2)?,
            table_name: row.get(3)?,
            geometry_column: row.get(4)?,
            style_name: row.get(5)?,
            style_qml: row.get(6)?,
            style_sld: row.get(7)?,
            use_as_default: row.get(8)?,
            description: row.get(9)?,
            owner: row.get(10)?,
            ui: row.get(11)?,
            update_time: row.get(12)?,
        })
    }
}

/// Style rows of one GeoPackage.
#[derive(Debug)]
pub struct StyleCatalog {
    conn: Connection,
}

impl StyleCatalog {
    /// Open the styles of an existing package.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| ManagerError::connection(path.display(), err))?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn table_exists(&self) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(SQL_TABLE_EXISTS, [STYLES_TABLE_NAME], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Create `layer_styles` unless it is already there.
    pub fn ensure_table_exists(&self) -> Result<()> {
        if self.table_exists()? {
            return Ok(());
        }
        self.conn.execute_batch(SQL_CREATE_LAYER_STYLES)?;
        tracing::debug!("created {STYLES_TABLE_NAME} table");
        Ok(())
    }

    /// Insert a style and return its row id; `None` when the table is missing.
    pub fn add_style(
        &self,
        table_name: &str,
        geometry_column: &str,
        style_name: &str,
        sld_body: &str,
        default: bool,
    ) -> Result<Option<i64>> {
        if !self.table_exists()? {
            tracing::debug!(layer = table_name, "no {STYLES_TABLE_NAME} table, style skipped");
            return Ok(None);
        }
        self.conn.execute(
            SQL_INSERT_LAYER_STYLE,
            params![table_name, geometry_column, style_name, sld_body, default],
        )?;
        Ok(Some(self.conn.last_insert_rowid()))
    }

    /// First style stored for `table_name`.
    pub fn get_style(&self, table_name: &str) -> Result<Option<StyleRecord>> {
        if !self.table_exists()? {
            return Ok(None);
        }
        let style = self
            .conn
            .query_row(
                &sql_select_layer_styles(true),
                [table_name],
                StyleRecord::from_row,
            )
            .optional()?;
        Ok(style)
    }

    pub fn get_styles(&self) -> Result<Vec<StyleRecord>> {
        if !self.table_exists()? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&sql_select_layer_styles(false))?;
        let styles = stmt
            .query_map([], StyleRecord::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(styles)
    }

    /// Lowercase the text of every `PropertyName` element of an SLD document,
    /// so the style still matches a layer whose columns were laundered.
    pub fn lowercase_property_names(sld: &str) -> Result<String> {
        let mut reader = Reader::from_str(sld);
        let mut writer = Writer::new(Vec::with_capacity(sld.len()));
        let mut in_property_name = false;
        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    in_property_name = e.local_name().as_ref() == b"PropertyName";
                    writer.write_event(Event::Start(e))?;
                }
                Event::End(e) => {
                    in_property_name = false;
                    writer.write_event(Event::End(e))?;
                }
                Event::Text(text) if in_property_name => {
                    let lowered = text.unescape()?.to_lowercase();
                    writer.write_event(Event::Text(BytesText::new(&lowered)))?;
                }
                Event::Eof => break,
                event => writer.write_event(event)?,
            }
        }
        String::from_utf8(writer.into_inner())
            .map_err(|err| ManagerError::Message(format!("SLD is not valid UTF-8: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::StyleCatalog;
    use crate::Result;
    use crate::source::SpatialSource;

    const SLD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<StyledLayerDescriptor xmlns="http://www.opengis.net/sld" xmlns:ogc="http://www.opengis.net/ogc" version="1.0.0">
  <NamedLayer><Name>roads</Name><UserStyle><FeatureTypeStyle><Rule>
    <ogc:Filter><ogc:PropertyIsEqualTo>
      <ogc:PropertyName>RoadType</ogc:PropertyName>
      <ogc:Literal>Highway</ogc:Literal>
    </ogc:PropertyIsEqualTo></ogc:Filter>
  </Rule></FeatureTypeStyle></UserStyle></NamedLayer>
</StyledLayerDescriptor>"#;

    fn empty_package(dir: &tempfile::TempDir) -> Result<std::path::PathBuf> {
        let path = dir.path().join("styles.gpkg");
        SpatialSource::create_gpkg(&path)?.close()?;
        Ok(path)
    }

    #[test]
    fn ensure_table_exists_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let catalog = StyleCatalog::open(empty_package(&dir)?)?;
        assert!(!catalog.table_exists()?);
        catalog.ensure_table_exists()?;
        catalog.ensure_table_exists()?;

        let tables: i64 = catalog.conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'layer_styles'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(tables, 1);
        Ok(())
    }

    #[test]
    fn add_then_get_style() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let catalog = StyleCatalog::open(empty_package(&dir)?)?;
        catalog.ensure_table_exists()?;

        let first = catalog.add_style("roads", "geom", "roads_style", SLD, true)?;
        let second = catalog.add_style("roads", "geom", "roads_alt", "<sld/>", false)?;
        assert!(first.is_some() && second.is_some());
        assert_ne!(first, second);

        let style = catalog.get_style("roads")?.expect("style");
        assert_eq!(style.style_name.as_deref(), Some("roads_style"));
        assert_eq!(style.style_sld.as_deref(), Some(SLD));
        assert_eq!(style.use_as_default, Some(true));
        assert!(style.update_time.is_some());

        assert_eq!(catalog.get_styles()?.len(), 2);
        assert!(catalog.get_style("parcels")?.is_none());
        Ok(())
    }

    #[test]
    fn missing_table_means_no_op() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let catalog = StyleCatalog::open(empty_package(&dir)?)?;
        assert_eq!(catalog.add_style("roads", "geom", "s", SLD, false)?, None);
        assert!(catalog.get_style("roads")?.is_none());
        assert!(catalog.get_styles()?.is_empty());
        assert!(!catalog.table_exists()?);
        Ok(())
    }

    #[test]
    fn serializes_with_qgis_column_names() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let catalog = StyleCatalog::open(empty_package(&dir)?)?;
        catalog.ensure_table_exists()?;
        catalog.add_style("roads", "geom", "roads_style", SLD, true)?;
        let json = serde_json::to_value(catalog.get_styles()?)?;
        assert_eq!(json[0]["f_table_name"], "roads");
        assert_eq!(json[0]["styleName"], "roads_style");
        Ok(())
    }

    #[test]
    fn lowercases_property_names_only() -> Result<()> {
        let converted = StyleCatalog::lowercase_property_names(SLD)?;
        assert!(converted.contains("<ogc:PropertyName>roadtype</ogc:PropertyName>"));
        assert!(converted.contains("<ogc:Literal>Highway</ogc:Literal>"));
        assert!(converted.contains("<Name>roads</Name>"));
        Ok(())
    }
}
