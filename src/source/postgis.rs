use super::{CopyOptions, Driver, Feature, FieldIndex, LayerSnapshot, Locator, attribute_columns};
use crate::conversions::{
    field_from_pg_str, field_to_pg_str, geometry_kind_from_str, geometry_kind_to_pg_str,
};
use crate::error::{ManagerError, Result};
use crate::ogc_sql::{STYLES_TABLE_NAME, quote_ident};
use crate::srs::{SpatialRef, wkt_attr_value};
use crate::types::{FieldDefn, FieldType, GeomFieldDefn, LayerDefinition, Value};
use postgres::types::ToSql;
use postgres::{Client, GenericClient, NoTls};
use std::cell::RefCell;
use std::sync::Arc;
use wkb::reader::Dimension;

const FID_COLUMN: &str = "ogc_fid";
const DEFAULT_GEOMETRY_COLUMN: &str = "wkb_geometry";

// Tables are looked up through the search path, so session-scoped temporary
// tables are found as well.
const SQL_PG_LIST_LAYERS: &str = "
SELECT f_table_name::text FROM geometry_columns
WHERE f_table_schema::name = ANY (current_schemas(true)) AND f_table_name::text <> $1
ORDER BY f_table_name
";

const SQL_PG_TABLE_EXISTS: &str = "SELECT to_regclass($1::text) IS NOT NULL";

const SQL_PG_GEOMETRY_COLUMN: &str = "
SELECT f_geometry_column::text, type::text, coord_dimension::int, srid::int
FROM geometry_columns
WHERE f_table_name::text = $1 AND f_table_schema::name = ANY (current_schemas(true))
";

const SQL_PG_TABLE_COLUMNS: &str = "
SELECT a.attname::text, format_type(a.atttypid, NULL), t.typname::text
FROM pg_attribute a JOIN pg_type t ON t.oid = a.atttypid
WHERE a.attrelid = to_regclass($1::text) AND a.attnum > 0 AND NOT a.attisdropped
ORDER BY a.attnum
";

const SQL_PG_PRIMARY_KEY: &str = "
SELECT a.attname::text, format_type(a.atttypid, NULL)
FROM pg_index i
JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY (i.indkey)
WHERE i.indrelid = to_regclass($1::text) AND i.indisprimary
";

const SQL_PG_SPATIAL_REF_SYS: &str = "
SELECT srid, auth_name::text, auth_srid, srtext::text, proj4text::text
FROM spatial_ref_sys WHERE srid = $1
";

/// PostGIS driver over a blocking PostgreSQL client.
///
/// The client is behind a `RefCell` so reads can share the source; a source
/// has a single owner at a time.
pub(crate) struct PostgisDriver {
    client: RefCell<Client>,
}

struct TableInfo {
    definition: LayerDefinition,
    /// Integer primary key used as the feature id, when there is one.
    primary_key: Option<String>,
    srid: i32,
}

impl PostgisDriver {
    pub(crate) fn connect(connection_string: &str) -> Result<Self> {
        let client = Client::connect(connection_string, NoTls).map_err(|err| {
            ManagerError::connection(Locator::Database(connection_string.to_string()), err)
        })?;
        Ok(Self {
            client: RefCell::new(client),
        })
    }

    fn table_info(&self, layer_name: &str) -> Result<TableInfo> {
        let mut client = self.client.borrow_mut();
        if !table_exists(&mut *client, layer_name)? {
            return Err(ManagerError::layer_not_found(layer_name));
        }
        let table = quote_ident(layer_name);

        let geometry_row = client.query_opt(SQL_PG_GEOMETRY_COLUMN, &[&layer_name])?;
        let (geometry, srid) = match geometry_row {
            Some(row) => {
                let type_name: String = row.get(1);
                let coord_dimension: i32 = row.get(2);
                let dimension = match coord_dimension {
                    4 => Dimension::Xyzm,
                    3 if type_name.to_ascii_uppercase().ends_with('M') => Dimension::Xym,
                    3 => Dimension::Xyz,
                    _ => Dimension::Xy,
                };
                (
                    Some(GeomFieldDefn {
                        name: row.get(0),
                        kind: geometry_kind_from_str(&type_name)?,
                        dimension,
                    }),
                    row.get(3),
                )
            }
            None => (None, 0),
        };

        let primary_key = client
            .query(SQL_PG_PRIMARY_KEY, &[&table])?
            .into_iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, String>(1)))
            .find(|(_, data_type)| {
                matches!(data_type.as_str(), "integer" | "bigint" | "smallint")
            })
            .map(|(name, _)| name);

        let mut fields: Vec<FieldDefn> = Vec::new();
        for row in client.query(SQL_PG_TABLE_COLUMNS, &[&table])? {
            let name: String = row.get(0);
            let data_type: String = row.get(1);
            let udt_name: String = row.get(2);
            if primary_key.as_deref() == Some(name.as_str()) {
                continue;
            }
            if matches!(udt_name.as_str(), "geometry" | "geography") {
                continue;
            }
            fields.push(field_from_pg_str(&name, &data_type));
        }

        Ok(TableInfo {
            definition: LayerDefinition {
                name: layer_name.to_string(),
                fields,
                geometry,
            },
            primary_key,
            srid,
        })
    }
}

impl Driver for PostgisDriver {
    fn list_layers(&self) -> Result<Vec<String>> {
        let rows = self
            .client
            .borrow_mut()
            .query(SQL_PG_LIST_LAYERS, &[&STYLES_TABLE_NAME])?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    fn layer_exists(&self, layer_name: &str) -> Result<bool> {
        table_exists(&mut *self.client.borrow_mut(), layer_name)
    }

    fn layer_definition(&self, layer_name: &str) -> Result<LayerDefinition> {
        Ok(self.table_info(layer_name)?.definition)
    }

    fn spatial_ref(&self, layer_name: &str) -> Result<Option<SpatialRef>> {
        let srid = self.table_info(layer_name)?.srid;
        if srid <= 0 {
            return Ok(None);
        }
        let row = self
            .client
            .borrow_mut()
            .query_opt(SQL_PG_SPATIAL_REF_SYS, &[&srid])?
            .ok_or(ManagerError::MissingSpatialRefSysId { srs_id: srid })?;
        let wkt: String = row.get::<_, Option<String>>(3).unwrap_or_default();
        let srs_name = wkt_attr_value(&wkt, "PROJCS")
            .or_else(|| wkt_attr_value(&wkt, "GEOGCS"))
            .unwrap_or_else(|| format!("EPSG:{srid}"));
        Ok(Some(SpatialRef {
            srs_id: row.get(0),
            srs_name,
            organization: row
                .get::<_, Option<String>>(1)
                .unwrap_or_else(|| "NONE".to_string()),
            organization_coordsys_id: row.get::<_, Option<i32>>(2).unwrap_or(srid),
            wkt,
            proj4: row.get(4),
        }))
    }

    fn read_features(&self, layer_name: &str) -> Result<Vec<Feature>> {
        let info = self.table_info(layer_name)?;
        let definition = &info.definition;

        let mut columns = vec![match &info.primary_key {
            Some(pk) => format!("{}::bigint", quote_ident(pk)),
            None => "(row_number() OVER ())::bigint".to_string(),
        }];
        columns.push(match &definition.geometry {
            Some(g) => format!("ST_AsBinary({})", quote_ident(&g.name)),
            None => "NULL::bytea".to_string(),
        });
        columns.extend(definition.fields.iter().map(select_expr));
        let sql = format!(
            "SELECT {} FROM {} ORDER BY 1",
            columns.join(", "),
            quote_ident(layer_name)
        );

        let fields = Arc::new(FieldIndex::new(
            definition.fields.iter().map(|f| f.name.clone()),
        ));
        let rows = self.client.borrow_mut().query(sql.as_str(), &[])?;
        let features: Vec<Feature> = rows
            .iter()
            .map(|row| {
                let properties = definition
                    .fields
                    .iter()
                    .enumerate()
                    .map(|(idx, field)| read_value(row, idx + 2, field))
                    .collect::<std::result::Result<Vec<Value>, postgres::Error>>()?;
                Ok(Feature::new(
                    row.try_get(0)?,
                    row.try_get(1)?,
                    properties,
                    Arc::clone(&fields),
                ))
            })
            .collect::<std::result::Result<_, postgres::Error>>()?;
        tracing::debug!(layer = layer_name, count = features.len(), "read features");
        Ok(features)
    }

    fn feature_count(&self, layer_name: &str) -> Result<u64> {
        if !self.layer_exists(layer_name)? {
            return Err(ManagerError::layer_not_found(layer_name));
        }
        let sql = format!("SELECT count(*) FROM {}", quote_ident(layer_name));
        let count: i64 = self.client.borrow_mut().query_one(sql.as_str(), &[])?.get(0);
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn copy_layer(
        &self,
        snapshot: &LayerSnapshot,
        layer_name: &str,
        options: &CopyOptions,
    ) -> Result<String> {
        let rename = |name: &str| {
            if options.launder {
                launder(name)
            } else {
                name.to_string()
            }
        };
        let target = rename(layer_name);
        let table = quote_ident(&target);

        let mut client = self.client.borrow_mut();
        let mut tx = client.transaction()?;

        if table_exists(&mut tx, &target)? {
            if !options.overwrite {
                return Err(ManagerError::LayerAlreadyExists { layer_name: target });
            }
            tx.batch_execute(&format!("DROP TABLE {table} CASCADE"))?;
        }

        let definition = &snapshot.definition;
        let srid = pg_srid(snapshot.srs.as_ref());
        let geometry = definition.geometry.as_ref().map(|g| {
            let name = options
                .geometry_name
                .as_deref()
                .filter(|name| !name.is_empty())
                .unwrap_or(DEFAULT_GEOMETRY_COLUMN);
            (rename(name), g)
        });

        let mut column_defs = vec![format!("{} SERIAL PRIMARY KEY", quote_ident(FID_COLUMN))];
        let mut insert_columns = Vec::new();
        let mut placeholders = Vec::new();
        if let Some((name, g)) = &geometry {
            column_defs.push(format!(
                "{} geometry({},{srid})",
                quote_ident(name),
                geometry_kind_to_pg_str(g.kind, g.dimension)
            ));
            insert_columns.push(quote_ident(name));
            placeholders.push(format!("ST_GeomFromWKB($1::bytea, {srid})"));
        }

        let reserved: Vec<&str> = std::iter::once(FID_COLUMN)
            .chain(geometry.as_ref().map(|(name, _)| name.as_str()))
            .collect();
        let columns = attribute_columns(definition.fields.iter().map(|f| rename(&f.name)), &reserved);
        for (field, column) in definition.fields.iter().zip(&columns) {
            if column != &rename(&field.name) {
                tracing::warn!(layer = %target, field = %field.name, column = %column, "renamed clashing field");
            }
            column_defs.push(format!("{} {}", quote_ident(column), field_to_pg_str(field)));
            insert_columns.push(quote_ident(column));
            placeholders.push(placeholder(insert_columns.len(), field));
        }

        let temporary = if options.temporary { "TEMPORARY " } else { "" };
        tx.batch_execute(&format!(
            "CREATE {temporary}TABLE {table} ({})",
            column_defs.join(", ")
        ))?;

        let insert_sql = if insert_columns.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                insert_columns.join(", "),
                placeholders.join(", ")
            )
        };
        let statement = tx.prepare(&insert_sql)?;
        for feature in &snapshot.features {
            let mut params: Vec<Box<dyn ToSql + Sync>> = Vec::with_capacity(insert_columns.len());
            if geometry.is_some() {
                params.push(Box::new(feature.geometry_wkb().map(<[u8]>::to_vec)));
            }
            for (idx, field) in definition.fields.iter().enumerate() {
                let value = feature.properties.get(idx).unwrap_or(&Value::Null);
                params.push(param(field, value));
            }
            let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref()).collect();
            tx.execute(&statement, &refs)
                .map_err(|err| ManagerError::PartialWrite {
                    layer_name: target.clone(),
                    reason: err.to_string(),
                })?;
        }

        tx.commit()?;
        Ok(target)
    }

    fn delete_layer(&self, layer_name: &str) -> Result<()> {
        let mut client = self.client.borrow_mut();
        if !table_exists(&mut *client, layer_name)? {
            return Err(ManagerError::layer_not_found(layer_name));
        }
        client.batch_execute(&format!("DROP TABLE {} CASCADE", quote_ident(layer_name)))?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.client.into_inner().close()?;
        Ok(())
    }
}

fn table_exists<C: GenericClient>(client: &mut C, layer_name: &str) -> Result<bool> {
    let row = client.query_one(SQL_PG_TABLE_EXISTS, &[&quote_ident(layer_name)])?;
    Ok(row.get(0))
}

/// Lowercase and replace everything but ASCII letters, digits and `_` with `_`.
pub(crate) fn launder(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

// srid to declare on the geometry column; 0 when the SRS has no EPSG code.
fn pg_srid(srs: Option<&SpatialRef>) -> i32 {
    match srs {
        Some(srs) if srs.organization.eq_ignore_ascii_case("EPSG") => srs.organization_coordsys_id,
        Some(srs) if srs.srs_id > 0 => srs.srs_id,
        _ => 0,
    }
}

fn select_expr(field: &FieldDefn) -> String {
    let column = quote_ident(&field.name);
    if field.boolean {
        return format!("{column}::int::bigint");
    }
    match field.field_type {
        FieldType::Integer | FieldType::Integer64 => format!("{column}::bigint"),
        FieldType::Real => format!("{column}::double precision"),
        FieldType::Binary => column,
        FieldType::String | FieldType::Date | FieldType::Time | FieldType::DateTime => {
            format!("{column}::text")
        }
    }
}

fn read_value(
    row: &postgres::Row,
    idx: usize,
    field: &FieldDefn,
) -> std::result::Result<Value, postgres::Error> {
    if field.boolean {
        return Ok(row.try_get::<_, Option<i64>>(idx)?.into());
    }
    Ok(match field.field_type {
        FieldType::Integer | FieldType::Integer64 => row.try_get::<_, Option<i64>>(idx)?.into(),
        FieldType::Real => row.try_get::<_, Option<f64>>(idx)?.into(),
        FieldType::Binary => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map(Value::Blob)
            .unwrap_or(Value::Null),
        FieldType::String | FieldType::Date | FieldType::Time | FieldType::DateTime => {
            row.try_get::<_, Option<String>>(idx)?.into()
        }
    })
}

fn placeholder(position: usize, field: &FieldDefn) -> String {
    if field.boolean {
        return format!("${position}::boolean");
    }
    match field.field_type {
        FieldType::Integer | FieldType::Integer64 => format!("${position}::bigint"),
        FieldType::Real => format!("${position}::double precision"),
        FieldType::String => format!("${position}::text"),
        FieldType::Binary => format!("${position}::bytea"),
        FieldType::Date => format!("${position}::text::date"),
        FieldType::Time => format!("${position}::text::time"),
        FieldType::DateTime => format!("${position}::text::timestamptz"),
    }
}

// SQLite values are dynamically typed; coerce them to the declared column type.
fn param(field: &FieldDefn, value: &Value) -> Box<dyn ToSql + Sync> {
    if field.boolean {
        return Box::new(value_as_i64(value).map(|v| v != 0));
    }
    match field.field_type {
        FieldType::Integer | FieldType::Integer64 => Box::new(value_as_i64(value)),
        FieldType::Real => Box::new(value_as_f64(value)),
        FieldType::Binary => Box::new(match value {
            Value::Blob(bytes) => Some(bytes.clone()),
            Value::Text(text) => Some(text.as_bytes().to_vec()),
            _ => None,
        }),
        FieldType::String | FieldType::Date | FieldType::Time | FieldType::DateTime => {
            Box::new(value.to_text())
        }
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(v) => Some(*v),
        Value::Real(v) => Some(v.round() as i64),
        Value::Text(v) => v.trim().parse().ok(),
        Value::Null | Value::Blob(_) => None,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(v) => Some(*v as f64),
        Value::Real(v) => Some(*v),
        Value::Text(v) => v.trim().parse().ok(),
        Value::Null | Value::Blob(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{launder, pg_srid, value_as_i64};
    use crate::test_support::{utm33n, wgs84};
    use crate::types::Value;

    #[test]
    fn launders_names() {
        assert_eq!(launder("Quakes 1776-2008"), "quakes_1776_2008");
        assert_eq!(launder("already_ok"), "already_ok");
    }

    #[test]
    fn srid_follows_epsg_code() {
        assert_eq!(pg_srid(Some(&wgs84())), 4326);
        assert_eq!(pg_srid(Some(&utm33n())), 32633);
        assert_eq!(pg_srid(None), 0);
    }

    #[test]
    fn coerces_dynamic_values() {
        assert_eq!(value_as_i64(&Value::from("42 ")), Some(42));
        assert_eq!(value_as_i64(&Value::from(2.6)), Some(3));
        assert_eq!(value_as_i64(&Value::Null), None);
    }

    // Needs a PostGIS database; set GPKG_MANAGER_TEST_PG to a libpq connection string.
    #[test]
    fn round_trips_layer_through_postgis() -> crate::Result<()> {
        use crate::schema::full_schema;
        use crate::source::{CopyOptions, Locator, ScopedSource};
        use crate::test_support::quakes_snapshot;

        let Ok(conn) = std::env::var("GPKG_MANAGER_TEST_PG") else {
            return Ok(());
        };
        let source = ScopedSource::open(Locator::database(conn))?;
        let name = format!("Quakes {}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let options = CopyOptions {
            launder: true,
            geometry_name: Some("the_geom".to_string()),
            ..CopyOptions::default()
        };
        let quakes = quakes_snapshot();
        let stored = source.copy_layer(&quakes, &name, &options)?;
        assert_eq!(stored, launder(&name));

        let result = (|| -> crate::Result<()> {
            assert!(source.list_layers()?.contains(&stored));
            let definition = source.layer_definition(&stored)?;
            assert_eq!(full_schema(&definition), {
                let mut expected = quakes.definition.clone();
                if let Some(g) = expected.geometry.as_mut() {
                    g.name = "the_geom".to_string();
                }
                full_schema(&expected)
            });
            assert_eq!(source.feature_count(&stored)?, 4);
            let features = source.read_features(&stored)?;
            assert_eq!(features[0].property("place"), Some(&Value::from("Charleston")));
            assert_eq!(source.spatial_ref(&stored)?.map(|s| s.srs_id), Some(4326));
            Ok(())
        })();
        source.delete_layer(&stored)?;
        result
    }
}
