// cf. https://www.geopackage.org/spec140/index.html#table_definition_sql

/// Table holding QGIS-compatible layer styles inside a GeoPackage.
pub(crate) const STYLES_TABLE_NAME: &str = "layer_styles";

// GeoPackage application id ("GPKG") and the 1.3 user_version.
const SQL_GPKG_PRAGMAS: &str = "
PRAGMA application_id = 1196444487;
PRAGMA user_version = 10300;
";

// gpkg_spatial_ref_sys: the SRS catalog referenced by gpkg_contents and
// gpkg_geometry_columns to describe spatial reference systems.
pub(crate) const SQL_GPKG_SPATIAL_REF_SYS: &str = "
CREATE TABLE gpkg_spatial_ref_sys (
  srs_name TEXT NOT NULL,
  srs_id INTEGER PRIMARY KEY,
  organization TEXT NOT NULL,
  organization_coordsys_id INTEGER NOT NULL,
  definition  TEXT NOT NULL,
  description TEXT
);
";

// gpkg_contents: lists all geospatial contents in the package with identifying
// and descriptive metadata for user display and access.
pub(crate) const SQL_GPKG_CONTENTS: &str = "
CREATE TABLE gpkg_contents (
  table_name TEXT NOT NULL PRIMARY KEY,
  data_type TEXT NOT NULL,
  identifier TEXT UNIQUE,
  description TEXT DEFAULT '',
  last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
  min_x DOUBLE,
  min_y DOUBLE,
  max_x DOUBLE,
  max_y DOUBLE,
  srs_id INTEGER,
  CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
";

// gpkg_geometry_columns: identifies geometry columns and geometry types for
// vector feature user data tables.
pub(crate) const SQL_GPKG_GEOMETRY_COLUMNS: &str = "
CREATE TABLE gpkg_geometry_columns (
  table_name TEXT NOT NULL,
  column_name TEXT NOT NULL,
  geometry_type_name TEXT NOT NULL,
  srs_id INTEGER NOT NULL,
  z TINYINT NOT NULL,
  m TINYINT NOT NULL,
  CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
  CONSTRAINT uk_gc_table_name UNIQUE (table_name),
  CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
  CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
);
";

// gpkg_extensions: declares which extensions apply to the GeoPackage, a table,
// or a column so clients can detect requirements without scanning user tables.
pub(crate) const SQL_GPKG_EXTENSIONS: &str = "
CREATE TABLE gpkg_extensions (
  table_name TEXT,
  column_name TEXT,
  extension_name TEXT NOT NULL,
  definition TEXT NOT NULL,
  scope TEXT NOT NULL,
  CONSTRAINT ge_tce UNIQUE (table_name, column_name, extension_name)
);
";

// The style table follows the QGIS convention so desktop clients pick the
// styles up when opening an exported package.
pub(crate) const SQL_CREATE_LAYER_STYLES: &str = "
CREATE TABLE layer_styles (
  `id` INTEGER PRIMARY KEY AUTOINCREMENT,
  `f_table_catalog` TEXT ( 256 ),
  `f_table_schema` TEXT ( 256 ),
  `f_table_name` TEXT ( 256 ),
  `f_geometry_column` TEXT ( 256 ),
  `styleName` TEXT ( 30 ),
  `styleQML` TEXT,
  `styleSLD` TEXT,
  `useAsDefault` BOOLEAN,
  `description` TEXT,
  `owner` TEXT ( 30 ),
  `ui` TEXT ( 30 ),
  `update_time` DATETIME DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);
";

pub(crate) const SQL_TABLE_EXISTS: &str =
    "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1";

pub(crate) const SQL_INSERT_LAYER_STYLE: &str = "
INSERT INTO layer_styles
  (f_table_name, f_geometry_column, styleName, styleSLD, useAsDefault)
VALUES
  (?1, ?2, ?3, ?4, ?5)
";

pub(crate) const SQL_SELECT_LAYER_STYLES: &str = "
SELECT id, f_table_catalog, f_table_schema, f_table_name, f_geometry_column,
       styleName, styleQML, styleSLD, useAsDefault, description, owner, ui, update_time
FROM layer_styles
";

pub(crate) fn sql_select_layer_styles(by_table_name: bool) -> String {
    if by_table_name {
        format!("{SQL_SELECT_LAYER_STYLES} WHERE f_table_name = ?1 ORDER BY id")
    } else {
        format!("{SQL_SELECT_LAYER_STYLES} ORDER BY id")
    }
}

pub(crate) const SQL_LIST_LAYERS: &str = "
SELECT table_name FROM gpkg_contents
WHERE data_type IN ('features', 'attributes') AND table_name != 'layer_styles'
ORDER BY rowid
";

// Table names are case-insensitive in SQLite, so lookups are too.
pub(crate) const SQL_FIND_LAYER: &str = "
SELECT table_name FROM gpkg_contents
WHERE lower(table_name) = lower(?1) AND table_name != 'layer_styles'
";

pub(crate) const SQL_INSERT_GPKG_CONTENTS: &str = "
INSERT INTO gpkg_contents
  (table_name, data_type, identifier, description, min_x, min_y, max_x, max_y, srs_id)
VALUES
  (?1, ?2, ?3, '', ?4, ?5, ?6, ?7, ?8)
";

pub(crate) const SQL_INSERT_GPKG_GEOMETRY_COLUMNS: &str = "
INSERT INTO gpkg_geometry_columns
  (table_name, column_name, geometry_type_name, srs_id, z, m)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6)
";

pub(crate) const SQL_SELECT_GEOMETRY_COLUMN_META: &str = "
SELECT column_name, geometry_type_name, z, m, srs_id
FROM gpkg_geometry_columns
WHERE table_name = ?1
";

pub(crate) const SQL_SELECT_CONTENTS_SRS_ID: &str =
    "SELECT srs_id FROM gpkg_contents WHERE table_name = ?1";

pub(crate) const SQL_SELECT_SPATIAL_REF_SYS: &str = "
SELECT srs_name, srs_id, organization, organization_coordsys_id, definition
FROM gpkg_spatial_ref_sys
WHERE srs_id = ?1
";

pub(crate) const SQL_INSERT_SPATIAL_REF_SYS: &str = "
INSERT OR IGNORE INTO gpkg_spatial_ref_sys
  (srs_name, srs_id, organization, organization_coordsys_id, definition, description)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6)
";

// Run one by one; each binds the table name as ?1.
pub(crate) const SQL_DELETE_GPKG_METADATA: [&str; 3] = [
    "DELETE FROM gpkg_geometry_columns WHERE table_name = ?1",
    "DELETE FROM gpkg_extensions WHERE table_name = ?1",
    "DELETE FROM gpkg_contents WHERE table_name = ?1",
];

/// Double-quote an SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn sql_create_table(layer_name: &str, column_defs: &str) -> String {
    format!("CREATE TABLE {} ({})", quote_ident(layer_name), column_defs)
}

pub(crate) fn sql_drop_table(layer_name: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(layer_name))
}

pub(crate) fn sql_table_columns(layer_name: &str) -> String {
    format!(
        "SELECT name, type, pk FROM pragma_table_info('{}') ORDER BY cid",
        layer_name.replace('\'', "''")
    )
}

pub(crate) fn sql_count_rows(layer_name: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_ident(layer_name))
}

pub(crate) fn sql_select_features<'a, I>(
    layer_name: &'a str,
    geometry_column: Option<&'a str>,
    primary_key_column: &'a str,
    other_columns: I,
) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut columns = vec![quote_ident(primary_key_column)];
    columns.push(match geometry_column {
        Some(geometry_column) => quote_ident(geometry_column),
        None => "NULL".to_string(),
    });
    columns.extend(other_columns.into_iter().map(quote_ident));

    format!(
        "SELECT {} FROM {} ORDER BY {}",
        columns.join(", "),
        quote_ident(layer_name),
        quote_ident(primary_key_column),
    )
}

pub(crate) fn sql_insert_feature(layer_name: &str, columns: &[String]) -> String {
    let names = columns
        .iter()
        .map(|name| quote_ident(name))
        .collect::<Vec<String>>()
        .join(",");
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<String>>()
        .join(",");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(layer_name),
        names,
        placeholders
    )
}

pub(crate) fn initialize_gpkg(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SQL_GPKG_PRAGMAS)?;
    conn.execute_batch(SQL_GPKG_SPATIAL_REF_SYS)?;
    register_default_srs_ids(conn)?;
    conn.execute_batch(SQL_GPKG_CONTENTS)?;
    conn.execute_batch(SQL_GPKG_GEOMETRY_COLUMNS)?;
    conn.execute_batch(SQL_GPKG_EXTENSIONS)?;
    Ok(())
}

pub(crate) const EPSG4326_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AXIS["Latitude",NORTH],AXIS["Longitude",EAST],AUTHORITY["EPSG","4326"]]"#;

// The three rows every GeoPackage must carry.
fn register_default_srs_ids(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute(
        SQL_INSERT_SPATIAL_REF_SYS,
        rusqlite::params!["WGS 84", 4326, "EPSG", 4326, EPSG4326_WKT, "WGS 84"],
    )?;
    conn.execute(
        SQL_INSERT_SPATIAL_REF_SYS,
        rusqlite::params![
            "Undefined Cartesian SRS",
            -1,
            "NONE",
            -1,
            "undefined",
            "undefined Cartesian coordinate reference system"
        ],
    )?;
    conn.execute(
        SQL_INSERT_SPATIAL_REF_SYS,
        rusqlite::params![
            "Undefined geographic SRS",
            0,
            "NONE",
            0,
            "undefined",
            "undefined geographic coordinate reference system"
        ],
    )?;
    Ok(())
}

fn rtree_name(table: &str, geom_column: &str) -> String {
    quote_ident(&format!("rtree_{table}_{geom_column}"))
}

fn rtree_trigger_name(table: &str, geom_column: &str, suffix: &str) -> String {
    quote_ident(&format!("rtree_{table}_{geom_column}_{suffix}"))
}

pub(crate) const SQL_INSERT_RTREE_EXTENSION: &str = "
INSERT INTO gpkg_extensions (table_name, column_name, extension_name, definition, scope)
VALUES (?1, ?2, 'gpkg_rtree_index', 'http://www.geopackage.org/spec120/#extension_rtree', 'write-only')
";

// cf. https://www.geopackage.org/spec140/index.html#extension_rtree
pub(crate) fn gpkg_rtree_create_sql(table: &str, geom_column: &str) -> String {
    format!(
        "CREATE VIRTUAL TABLE {} USING rtree(id, minx, maxx, miny, maxy);",
        rtree_name(table, geom_column),
    )
}

pub(crate) fn gpkg_rtree_drop_sql(table: &str, geom_column: &str) -> String {
    format!("DROP TABLE IF EXISTS {};", rtree_name(table, geom_column))
}

pub(crate) fn gpkg_rtree_load_sql(table: &str, geom_column: &str, id_column: &str) -> String {
    format!(
        "INSERT OR REPLACE INTO {r}
  SELECT {i}, ST_MinX({c}), ST_MaxX({c}), ST_MinY({c}), ST_MaxY({c})
  FROM {t} WHERE {c} NOT NULL AND NOT ST_IsEmpty({c});",
        r = rtree_name(table, geom_column),
        t = quote_ident(table),
        c = quote_ident(geom_column),
        i = quote_ident(id_column),
    )
}

pub(crate) fn gpkg_rtree_triggers_sql(table: &str, geom_column: &str, id_column: &str) -> String {
    format!(
        "CREATE TRIGGER {insert} AFTER INSERT ON {t}
  WHEN (new.{c} NOT NULL AND NOT ST_IsEmpty(NEW.{c}))
BEGIN
  INSERT OR REPLACE INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END;

CREATE TRIGGER {update2} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} ISNULL OR ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
END;

CREATE TRIGGER {update4} AFTER UPDATE ON {t}
  WHEN OLD.{i} != NEW.{i} AND
       (NEW.{c} ISNULL OR ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id IN (OLD.{i}, NEW.{i});
END;

CREATE TRIGGER {update5} AFTER UPDATE ON {t}
  WHEN OLD.{i} != NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
  INSERT OR REPLACE INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END;

CREATE TRIGGER {update6} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c})) AND
       (OLD.{c} NOTNULL AND NOT ST_IsEmpty(OLD.{c}))
BEGIN
  UPDATE {r} SET
    minx = ST_MinX(NEW.{c}),
    maxx = ST_MaxX(NEW.{c}),
    miny = ST_MinY(NEW.{c}),
    maxy = ST_MaxY(NEW.{c})
  WHERE id = NEW.{i};
END;

CREATE TRIGGER {update7} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c})) AND
       (OLD.{c} ISNULL OR ST_IsEmpty(OLD.{c}))
BEGIN
  INSERT INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END;

CREATE TRIGGER {delete} AFTER DELETE ON {t}
  WHEN old.{c} NOT NULL
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
END;",
        insert = rtree_trigger_name(table, geom_column, "insert"),
        update2 = rtree_trigger_name(table, geom_column, "update2"),
        update4 = rtree_trigger_name(table, geom_column, "update4"),
        update5 = rtree_trigger_name(table, geom_column, "update5"),
        update6 = rtree_trigger_name(table, geom_column, "update6"),
        update7 = rtree_trigger_name(table, geom_column, "update7"),
        delete = rtree_trigger_name(table, geom_column, "delete"),
        r = rtree_name(table, geom_column),
        t = quote_ident(table),
        c = quote_ident(geom_column),
        i = quote_ident(id_column),
    )
}

pub(crate) fn execute_rtree_sqls(
    conn: &rusqlite::Connection,
    table: &str,
    geom_column: &str,
    id_column: &str,
) -> rusqlite::Result<()> {
    conn.execute_batch(&gpkg_rtree_create_sql(table, geom_column))?;
    conn.execute_batch(&gpkg_rtree_load_sql(table, geom_column, id_column))?;
    conn.execute_batch(&gpkg_rtree_triggers_sql(table, geom_column, id_column))?;
    conn.execute(
        SQL_INSERT_RTREE_EXTENSION,
        rusqlite::params![table, geom_column],
    )?;
    Ok(())
}
