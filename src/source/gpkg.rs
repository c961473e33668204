use super::{CopyOptions, Driver, Feature, FieldIndex, LayerSnapshot, attribute_columns};
use crate::conversions::{
    dimension_from_zm, dimension_to_zm, field_from_gpkg_str, field_to_gpkg_str,
    geometry_kind_from_str, geometry_kind_to_gpkg_str,
};
use crate::error::{ManagerError, Result};
use crate::geometry::{Bounds, gpkg_geometry_to_wkb, wkb_bounds, wkb_to_gpkg_geometry};
use crate::ogc_sql::{
    SQL_DELETE_GPKG_METADATA, SQL_FIND_LAYER, SQL_INSERT_GPKG_CONTENTS,
    SQL_INSERT_GPKG_GEOMETRY_COLUMNS, SQL_INSERT_SPATIAL_REF_SYS, SQL_LIST_LAYERS,
    SQL_SELECT_CONTENTS_SRS_ID, SQL_SELECT_GEOMETRY_COLUMN_META, SQL_SELECT_SPATIAL_REF_SYS,
    SQL_TABLE_EXISTS, execute_rtree_sqls, gpkg_rtree_drop_sql, initialize_gpkg, quote_ident,
    sql_count_rows, sql_create_table, sql_drop_table, sql_insert_feature, sql_select_features,
    sql_table_columns,
};
use crate::sql_functions::register_spatial_functions;
use crate::srs::SpatialRef;
use crate::types::{FieldDefn, GeomFieldDefn, LayerDefinition, Value};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const FID_COLUMN: &str = "fid";
const DEFAULT_GEOMETRY_COLUMN: &str = "geom";
// gpkg_spatial_ref_sys row for "Undefined Cartesian SRS".
const UNDEFINED_SRS_ID: i32 = -1;

/// GeoPackage driver backed by a read-write SQLite connection.
#[derive(Debug)]
pub(crate) struct GpkgDriver {
    conn: Connection,
    path: PathBuf,
}

/// What reading a layer needs beyond its public definition.
struct TableInfo {
    table_name: String,
    definition: LayerDefinition,
    primary_key: String,
    srs_id: Option<i32>,
}

impl GpkgDriver {
    /// Open an existing GeoPackage for reading and writing.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ManagerError::connection(
                path.display(),
                "GeoPackage file does not exist",
            ));
        }
        let conn =
            Connection::open(path).map_err(|err| ManagerError::connection(path.display(), err))?;
        let has_contents: i64 = conn
            .query_row(SQL_TABLE_EXISTS, ["gpkg_contents"], |row| row.get(0))
            .map_err(|err| ManagerError::connection(path.display(), err))?;
        if has_contents == 0 {
            return Err(ManagerError::connection(
                path.display(),
                "not a GeoPackage (gpkg_contents is missing)",
            ));
        }
        register_spatial_functions(&conn)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Create a new GeoPackage with the mandatory metadata tables.
    pub(crate) fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("GeoPackage file already exists: {}", path.display()),
            )
            .into());
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("destination directory does not exist: {}", parent.display()),
                )
                .into());
            }
        }

        let conn = Connection::open(path)?;
        initialize_gpkg(&conn)?;
        register_spatial_functions(&conn)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    fn table_info(&self, layer_name: &str) -> Result<TableInfo> {
        let table_name = find_layer(&self.conn, layer_name)?
            .ok_or_else(|| ManagerError::layer_not_found(layer_name))?;

        let mut stmt = self.conn.prepare(&sql_table_columns(&table_name))?;
        let columns = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i32>(2)? != 0,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let geometry = self
            .conn
            .query_row(SQL_SELECT_GEOMETRY_COLUMN_META, [&table_name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i8>(2)?,
                    row.get::<_, i8>(3)?,
                    row.get::<_, i32>(4)?,
                ))
            })
            .optional()?;

        let (geometry, srs_id) = match geometry {
            Some((column, type_name, z, m, srs_id)) => (
                Some(GeomFieldDefn {
                    name: column,
                    kind: geometry_kind_from_str(&type_name)?,
                    dimension: dimension_from_zm(z, m)?,
                }),
                Some(srs_id),
            ),
            None => {
                let srs_id = self
                    .conn
                    .query_row(SQL_SELECT_CONTENTS_SRS_ID, [&table_name], |row| {
                        row.get::<_, Option<i32>>(0)
                    })
                    .optional()?
                    .flatten();
                (None, srs_id)
            }
        };

        let mut primary_key = None;
        let mut fields: Vec<FieldDefn> = Vec::with_capacity(columns.len());
        for (name, declared_type, is_primary_key) in columns {
            if is_primary_key && primary_key.is_none() {
                primary_key = Some(name);
                continue;
            }
            if geometry.as_ref().is_some_and(|g| g.name == name) {
                continue;
            }
            let field = field_from_gpkg_str(&name, &declared_type).ok_or_else(|| {
                ManagerError::UnsupportedColumnType {
                    column: name.clone(),
                    declared_type: declared_type.clone(),
                }
            })?;
            fields.push(field);
        }

        Ok(TableInfo {
            definition: LayerDefinition {
                name: table_name.clone(),
                fields,
                geometry,
            },
            table_name,
            // tables without a declared key still have a rowid
            primary_key: primary_key.unwrap_or_else(|| "rowid".to_string()),
            srs_id,
        })
    }
}

impl Driver for GpkgDriver {
    fn list_layers(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(SQL_LIST_LAYERS)?;
        let layers = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(layers)
    }

    fn layer_exists(&self, layer_name: &str) -> Result<bool> {
        Ok(find_layer(&self.conn, layer_name)?.is_some())
    }

    fn layer_definition(&self, layer_name: &str) -> Result<LayerDefinition> {
        Ok(self.table_info(layer_name)?.definition)
    }

    fn spatial_ref(&self, layer_name: &str) -> Result<Option<SpatialRef>> {
        let Some(srs_id) = self.table_info(layer_name)?.srs_id else {
            return Ok(None);
        };
        let srs = self
            .conn
            .query_row(SQL_SELECT_SPATIAL_REF_SYS, [srs_id], |row| {
                Ok(SpatialRef {
                    srs_name: row.get(0)?,
                    srs_id: row.get(1)?,
                    organization: row.get(2)?,
                    organization_coordsys_id: row.get(3)?,
                    wkt: row.get(4)?,
                    proj4: None,
                })
            })
            .optional()?
            .ok_or(ManagerError::MissingSpatialRefSysId { srs_id })?;
        Ok(Some(srs))
    }

    fn read_features(&self, layer_name: &str) -> Result<Vec<Feature>> {
        let info = self.table_info(layer_name)?;
        let definition = &info.definition;
        let geometry_column = definition.geometry.as_ref().map(|g| g.name.as_str());
        let sql = sql_select_features(
            &info.table_name,
            geometry_column,
            &info.primary_key,
            definition.fields.iter().map(|f| f.name.as_str()),
        );
        let fields = Arc::new(FieldIndex::new(
            definition.fields.iter().map(|f| f.name.clone()),
        ));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut features = Vec::new();
        while let Some(row) = rows.next()? {
            let fid: i64 = row.get(0)?;
            let geometry = match row.get_ref(1)? {
                ValueRef::Null => None,
                ValueRef::Blob([]) => None,
                ValueRef::Blob(blob) => Some(gpkg_geometry_to_wkb(blob)?.buf().to_vec()),
                other => {
                    return Err(rusqlite::Error::InvalidColumnType(
                        1,
                        geometry_column.unwrap_or_default().to_string(),
                        other.data_type(),
                    )
                    .into());
                }
            };
            let properties = (0..definition.fields.len())
                .map(|idx| row.get_ref(idx + 2).map(Value::from))
                .collect::<std::result::Result<Vec<Value>, _>>()?;
            features.push(Feature::new(fid, geometry, properties, Arc::clone(&fields)));
        }
        tracing::debug!(layer = layer_name, count = features.len(), "read features");
        Ok(features)
    }

    fn feature_count(&self, layer_name: &str) -> Result<u64> {
        let table_name = find_layer(&self.conn, layer_name)?
            .ok_or_else(|| ManagerError::layer_not_found(layer_name))?;
        let count: i64 = self
            .conn
            .query_row(&sql_count_rows(&table_name), [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn copy_layer(
        &self,
        snapshot: &LayerSnapshot,
        layer_name: &str,
        options: &CopyOptions,
    ) -> Result<String> {
        let tx = self.conn.unchecked_transaction()?;

        if let Some(existing) = find_layer(&tx, layer_name)? {
            if !options.overwrite {
                return Err(ManagerError::LayerAlreadyExists {
                    layer_name: existing,
                });
            }
            drop_layer(&tx, &existing)?;
        }

        let definition = &snapshot.definition;
        let srs_id = register_srs(&tx, snapshot.srs.as_ref())?;
        let geometry = definition.geometry.as_ref().map(|g| {
            let name = options.geometry_name.as_deref().unwrap_or(&g.name);
            let name = if name.is_empty() { DEFAULT_GEOMETRY_COLUMN } else { name };
            (name.to_string(), g)
        });

        let reserved: Vec<&str> = std::iter::once(FID_COLUMN)
            .chain(geometry.as_ref().map(|(name, _)| name.as_str()))
            .collect();
        let columns = attribute_columns(definition.fields.iter().map(|f| f.name.clone()), &reserved);

        let mut column_defs = vec![format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL",
            quote_ident(FID_COLUMN)
        )];
        let mut insert_columns = vec![FID_COLUMN.to_string()];
        if let Some((name, g)) = &geometry {
            column_defs.push(format!(
                "{} {}",
                quote_ident(name),
                geometry_kind_to_gpkg_str(g.kind)
            ));
            insert_columns.push(name.clone());
        }
        for (field, column) in definition.fields.iter().zip(&columns) {
            if column != &field.name {
                tracing::warn!(layer = layer_name, field = %field.name, column = %column, "renamed clashing field");
            }
            column_defs.push(format!(
                "{} {}",
                quote_ident(column),
                field_to_gpkg_str(field)
            ));
            insert_columns.push(column.clone());
        }
        tx.execute_batch(&sql_create_table(layer_name, &column_defs.join(", ")))?;

        let mut extent: Option<Bounds> = None;
        {
            let mut stmt = tx.prepare(&sql_insert_feature(layer_name, &insert_columns))?;
            for feature in &snapshot.features {
                let mut values = Vec::with_capacity(insert_columns.len());
                values.push(Value::Integer(feature.fid()));
                if geometry.is_some() {
                    match feature.geometry_wkb() {
                        Some(wkb) => {
                            if let Some(bounds) = wkb_bounds(wkb)? {
                                Bounds::merge(&mut extent, bounds);
                            }
                            values.push(Value::Blob(wkb_to_gpkg_geometry(wkb, srs_id)));
                        }
                        None => values.push(Value::Null),
                    }
                }
                values.extend(
                    (0..columns.len())
                        .map(|idx| feature.properties.get(idx).cloned().unwrap_or(Value::Null)),
                );
                stmt.execute(params_from_iter(values.iter()))
                    .map_err(|err| ManagerError::PartialWrite {
                        layer_name: layer_name.to_string(),
                        reason: err.to_string(),
                    })?;
            }
        }

        let (data_type, contents_srs_id) = match &geometry {
            Some(_) => ("features", Some(srs_id)),
            None => ("attributes", None),
        };
        tx.execute(
            SQL_INSERT_GPKG_CONTENTS,
            params![
                layer_name,
                data_type,
                layer_name,
                extent.map(|b| b.minx),
                extent.map(|b| b.miny),
                extent.map(|b| b.maxx),
                extent.map(|b| b.maxy),
                contents_srs_id,
            ],
        )?;

        if let Some((name, g)) = &geometry {
            let (z, m) = dimension_to_zm(g.dimension);
            tx.execute(
                SQL_INSERT_GPKG_GEOMETRY_COLUMNS,
                params![
                    layer_name,
                    name,
                    geometry_kind_to_gpkg_str(g.kind),
                    srs_id,
                    z,
                    m
                ],
            )?;
            execute_rtree_sqls(&tx, layer_name, name, FID_COLUMN)?;
        }

        tx.commit()?;
        Ok(layer_name.to_string())
    }

    fn delete_layer(&self, layer_name: &str) -> Result<()> {
        let table_name = find_layer(&self.conn, layer_name)?
            .ok_or_else(|| ManagerError::layer_not_found(layer_name))?;
        let tx = self.conn.unchecked_transaction()?;
        drop_layer(&tx, &table_name)?;
        tx.commit()?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let GpkgDriver { conn, path } = *self;
        conn.close().map_err(|(_, err)| {
            tracing::warn!(path = %path.display(), "closing GeoPackage failed");
            ManagerError::from(err)
        })
    }
}

fn find_layer(conn: &Connection, layer_name: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(SQL_FIND_LAYER, [layer_name], |row| row.get(0))
        .optional()?)
}

// Remove the table, its spatial index and every metadata row naming it.
fn drop_layer(conn: &Connection, table_name: &str) -> Result<()> {
    let geometry_column: Option<String> = conn
        .query_row(SQL_SELECT_GEOMETRY_COLUMN_META, [table_name], |row| row.get(0))
        .optional()?;
    if let Some(geometry_column) = geometry_column {
        conn.execute_batch(&gpkg_rtree_drop_sql(table_name, &geometry_column))?;
    }
    for sql in SQL_DELETE_GPKG_METADATA {
        conn.execute(sql, [table_name])?;
    }
    conn.execute_batch(&sql_drop_table(table_name))?;
    Ok(())
}

// Make sure the layer's SRS is present and return the srs_id to reference.
fn register_srs(conn: &Connection, srs: Option<&SpatialRef>) -> Result<i32> {
    let Some(srs) = srs else {
        return Ok(UNDEFINED_SRS_ID);
    };
    if matches!(srs.srs_id, -1 | 0) {
        return Ok(srs.srs_id);
    }
    let definition = if srs.wkt.trim().is_empty() {
        "undefined"
    } else {
        srs.wkt.as_str()
    };
    conn.execute(
        SQL_INSERT_SPATIAL_REF_SYS,
        params![
            srs.srs_name,
            srs.srs_id,
            srs.organization,
            srs.organization_coordsys_id,
            definition,
            srs.srs_name
        ],
    )?;
    Ok(srs.srs_id)
}

#[cfg(test)]
mod tests {
    use crate::Result;
    use crate::error::ManagerError;
    use crate::schema::full_schema;
    use crate::source::{CopyOptions, Locator, SpatialSource};
    use crate::test_support::{parcels_snapshot, roads_snapshot, utm33n};
    use crate::types::{FieldDefn, FieldType, GeometryKind, Value};

    #[test]
    fn copies_layer_with_metadata() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("roads.gpkg");
        let roads = roads_snapshot();
        {
            let source = SpatialSource::create_gpkg(&path)?;
            let name = source.copy_layer(&roads, "roads", &CopyOptions::default())?;
            assert_eq!(name, "roads");
        }

        let source = SpatialSource::open(Locator::file(&path))?;
        assert_eq!(source.list_layers()?, vec!["roads"]);
        let definition = source.layer_definition("roads")?;
        assert_eq!(full_schema(&definition), full_schema(&roads.definition));
        assert_eq!(definition.geometry_kind(), GeometryKind::LineString);
        assert_eq!(source.feature_count("roads")?, 3);

        let features = source.read_features("roads")?;
        assert_eq!(features.len(), 3);
        assert_eq!(features[0].fid(), 1);
        assert_eq!(
            features[0].property("name"),
            Some(&Value::Text("Main Street".to_string()))
        );
        assert_eq!(features[0].geometry_wkb(), roads.features[0].geometry_wkb());

        let srs = source.spatial_ref("roads")?.expect("srs");
        assert_eq!(srs.srs_id, 4326);
        Ok(())
    }

    #[test]
    fn clashing_fields_are_renamed_not_dropped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = SpatialSource::create_gpkg(dir.path().join("roads.gpkg"))?;
        let mut roads = roads_snapshot();
        roads.definition.fields.push(FieldDefn::new("FID", FieldType::String));
        roads.definition.fields.push(FieldDefn::new("Geom", FieldType::Integer));
        for (idx, feature) in roads.features.iter_mut().enumerate() {
            feature.properties.push(Value::from(format!("R-{idx}")));
            feature.properties.push(Value::from(idx as i64));
        }
        source.copy_layer(&roads, "roads", &CopyOptions::default())?;

        let names: Vec<String> = full_schema(&source.layer_definition("roads")?)
            .into_iter()
            .map(|field| field.name)
            .collect();
        assert_eq!(names, vec!["name", "length", "FID_1", "Geom_1", "geom"]);

        let features = source.read_features("roads")?;
        assert_eq!(features[2].property("FID_1"), Some(&Value::Text("R-2".to_string())));
        assert_eq!(features[2].property("Geom_1"), Some(&Value::Integer(2)));
        Ok(())
    }

    #[test]
    fn writes_extent_and_spatial_index() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("roads.gpkg");
        let source = SpatialSource::create_gpkg(&path)?;
        source.copy_layer(&roads_snapshot(), "roads", &CopyOptions::default())?;
        drop(source);

        let conn = rusqlite::Connection::open(&path)?;
        let (min_x, max_y): (f64, f64) = conn.query_row(
            "SELECT min_x, max_y FROM gpkg_contents WHERE table_name = 'roads'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(min_x, 0.0);
        assert_eq!(max_y, 3.0);

        let indexed: i64 =
            conn.query_row("SELECT count(*) FROM \"rtree_roads_geom\"", [], |row| row.get(0))?;
        assert_eq!(indexed, 3);
        let extension: i64 = conn.query_row(
            "SELECT count(*) FROM gpkg_extensions WHERE table_name = 'roads'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(extension, 1);
        Ok(())
    }

    #[test]
    fn registers_missing_srs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = SpatialSource::create_gpkg(dir.path().join("utm.gpkg"))?;
        let mut parcels = parcels_snapshot();
        parcels.srs = Some(utm33n());
        source.copy_layer(&parcels, "parcels", &CopyOptions::default())?;

        let srs = source.spatial_ref("parcels")?.expect("srs");
        assert_eq!(srs.srs_id, 32633);
        assert_eq!(
            srs.projection().projected_crs_name.as_deref(),
            Some("WGS 84 / UTM zone 33N")
        );
        Ok(())
    }

    #[test]
    fn refuses_existing_layer_unless_overwrite() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = SpatialSource::create_gpkg(dir.path().join("roads.gpkg"))?;
        let roads = roads_snapshot();
        source.copy_layer(&roads, "roads", &CopyOptions::default())?;

        let err = source
            .copy_layer(&roads, "ROADS", &CopyOptions::default())
            .expect_err("duplicate layer");
        assert!(matches!(err, ManagerError::LayerAlreadyExists { .. }));

        let overwrite = CopyOptions {
            overwrite: true,
            ..CopyOptions::default()
        };
        source.copy_layer(&parcels_snapshot(), "roads", &overwrite)?;
        assert_eq!(source.list_layers()?, vec!["roads"]);
        assert_eq!(source.feature_count("roads")?, 2);
        Ok(())
    }

    #[test]
    fn geometry_name_option_renames_column() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = SpatialSource::create_gpkg(dir.path().join("roads.gpkg"))?;
        let options = CopyOptions {
            geometry_name: Some("the_geom".to_string()),
            ..CopyOptions::default()
        };
        source.copy_layer(&roads_snapshot(), "roads", &options)?;
        let definition = source.layer_definition("roads")?;
        assert_eq!(
            definition.geometry.map(|g| g.name).as_deref(),
            Some("the_geom")
        );
        Ok(())
    }

    #[test]
    fn deletes_layer_and_metadata() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = SpatialSource::create_gpkg(dir.path().join("two.gpkg"))?;
        source.copy_layer(&roads_snapshot(), "roads", &CopyOptions::default())?;
        source.copy_layer(&parcels_snapshot(), "parcels", &CopyOptions::default())?;

        source.delete_layer("roads")?;
        assert_eq!(source.list_layers()?, vec!["parcels"]);
        assert!(!source.layer_exists("roads")?);
        assert!(matches!(
            source.layer_definition("roads"),
            Err(ManagerError::LayerNotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn style_table_is_not_a_layer() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("styled.gpkg");
        let source = SpatialSource::create_gpkg(&path)?;
        source.copy_layer(&roads_snapshot(), "roads", &CopyOptions::default())?;
        drop(source);

        let conn = rusqlite::Connection::open(&path)?;
        conn.execute_batch(crate::ogc_sql::SQL_CREATE_LAYER_STYLES)?;
        conn.execute(
            "INSERT INTO gpkg_contents (table_name, data_type, identifier) VALUES ('layer_styles', 'attributes', 'layer_styles')",
            [],
        )?;
        drop(conn);

        let source = SpatialSource::open(Locator::file(&path))?;
        assert_eq!(source.list_layers()?, vec!["roads"]);
        assert!(!source.layer_exists("layer_styles")?);
        Ok(())
    }

    #[test]
    fn opening_plain_sqlite_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("plain.sqlite");
        rusqlite::Connection::open(&path)?.execute_batch("CREATE TABLE t (x INTEGER)")?;
        let err = SpatialSource::open(Locator::file(&path)).expect_err("not a gpkg");
        assert!(matches!(err, ManagerError::Connection { .. }));
        Ok(())
    }

    #[test]
    fn create_rejects_missing_directory() {
        let err = SpatialSource::create_gpkg("/nonexistent/dir/out.gpkg").expect_err("bad dir");
        assert!(matches!(err, ManagerError::Io(_)));
    }
}
