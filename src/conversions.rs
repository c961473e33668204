use crate::error::ManagerError;
use crate::types::{FieldDefn, FieldType, GeometryKind};

#[inline]
pub(crate) fn geometry_kind_to_gpkg_str(kind: GeometryKind) -> &'static str {
    match kind {
        GeometryKind::Unknown => "GEOMETRY",
        GeometryKind::GeometryCollection => "GEOMETRYCOLLECTION",
        GeometryKind::Point => "POINT",
        GeometryKind::LineString => "LINESTRING",
        GeometryKind::Polygon => "POLYGON",
        GeometryKind::MultiPoint => "MULTIPOINT",
        GeometryKind::MultiLineString => "MULTILINESTRING",
        GeometryKind::MultiPolygon => "MULTIPOLYGON",
    }
}

/// PostGIS typmod name, e.g. `MultiPolygonZ` in `geometry(MultiPolygonZ,4326)`.
pub(crate) fn geometry_kind_to_pg_str(kind: GeometryKind, dimension: wkb::reader::Dimension) -> String {
    let base = match kind {
        GeometryKind::Unknown => "Geometry",
        GeometryKind::GeometryCollection => "GeometryCollection",
        GeometryKind::Point => "Point",
        GeometryKind::LineString => "LineString",
        GeometryKind::Polygon => "Polygon",
        GeometryKind::MultiPoint => "MultiPoint",
        GeometryKind::MultiLineString => "MultiLineString",
        GeometryKind::MultiPolygon => "MultiPolygon",
    };
    let suffix = match dimension {
        wkb::reader::Dimension::Xy => "",
        wkb::reader::Dimension::Xyz => "Z",
        wkb::reader::Dimension::Xym => "M",
        wkb::reader::Dimension::Xyzm => "ZM",
    };
    format!("{base}{suffix}")
}

/// Parse a geometry type name as found in `gpkg_geometry_columns` or in
/// PostGIS `geometry_columns` (which may carry a trailing `M`).
#[inline]
pub(crate) fn geometry_kind_from_str(geometry_type_str: &str) -> Result<GeometryKind, ManagerError> {
    let s = geometry_type_str.trim();
    geometry_kind_from_plain(s)
        .or_else(|| {
            // POINTM, LINESTRINGM ...
            s.strip_suffix(['M', 'm']).and_then(geometry_kind_from_plain)
        })
        .ok_or_else(|| ManagerError::UnsupportedGeometryType(geometry_type_str.to_string()))
}

fn geometry_kind_from_plain(s: &str) -> Option<GeometryKind> {
    if s.eq_ignore_ascii_case("GEOMETRY") {
        Some(GeometryKind::Unknown)
    } else if s.eq_ignore_ascii_case("GEOMETRYCOLLECTION") {
        Some(GeometryKind::GeometryCollection)
    } else if s.eq_ignore_ascii_case("POINT") {
        Some(GeometryKind::Point)
    } else if s.eq_ignore_ascii_case("LINESTRING") {
        Some(GeometryKind::LineString)
    } else if s.eq_ignore_ascii_case("POLYGON") {
        Some(GeometryKind::Polygon)
    } else if s.eq_ignore_ascii_case("MULTIPOINT") {
        Some(GeometryKind::MultiPoint)
    } else if s.eq_ignore_ascii_case("MULTILINESTRING") {
        Some(GeometryKind::MultiLineString)
    } else if s.eq_ignore_ascii_case("MULTIPOLYGON") {
        Some(GeometryKind::MultiPolygon)
    } else {
        None
    }
}

#[inline]
pub(crate) fn dimension_to_zm(dimension: wkb::reader::Dimension) -> (i8, i8) {
    match dimension {
        wkb::reader::Dimension::Xy => (0, 0),
        wkb::reader::Dimension::Xyz => (1, 0),
        wkb::reader::Dimension::Xym => (0, 1),
        wkb::reader::Dimension::Xyzm => (1, 1),
    }
}

#[inline]
pub(crate) fn dimension_from_zm(z: i8, m: i8) -> Result<wkb::reader::Dimension, ManagerError> {
    // 2 means "optional"; such columns are read as if the values were present.
    match (z, m) {
        (0, 0) => Ok(wkb::reader::Dimension::Xy),
        (1 | 2, 0) => Ok(wkb::reader::Dimension::Xyz),
        (0, 1 | 2) => Ok(wkb::reader::Dimension::Xym),
        (1 | 2, 1 | 2) => Ok(wkb::reader::Dimension::Xyzm),
        _ => Err(ManagerError::InvalidDimension { z, m }),
    }
}

/// SQLite declared type for an attribute column in a GeoPackage.
#[inline]
pub(crate) fn field_to_gpkg_str(field: &FieldDefn) -> &'static str {
    if field.boolean {
        return "BOOLEAN";
    }
    match field.field_type {
        FieldType::Integer => "MEDIUMINT",
        FieldType::Integer64 => "INTEGER",
        FieldType::Real => "REAL",
        FieldType::String => "TEXT",
        FieldType::Binary => "BLOB",
        FieldType::Date => "DATE",
        FieldType::Time => "TIME",
        FieldType::DateTime => "DATETIME",
    }
}

/// Map a GeoPackage column declaration to a field definition.
///
/// `TEXT(30)` style size hints are accepted and ignored.
#[inline]
pub(crate) fn field_from_gpkg_str(name: &str, declared: &str) -> Option<FieldDefn> {
    let base = declared
        .split('(')
        .next()
        .unwrap_or(declared)
        .trim();
    let s = base;
    let field_type = if s.eq_ignore_ascii_case("BOOLEAN") {
        return Some(FieldDefn {
            name: name.to_string(),
            field_type: FieldType::Integer,
            boolean: true,
        });
    } else if s.eq_ignore_ascii_case("TINYINT")
        || s.eq_ignore_ascii_case("SMALLINT")
        || s.eq_ignore_ascii_case("MEDIUMINT")
        || s.eq_ignore_ascii_case("INT")
    {
        FieldType::Integer
    } else if s.eq_ignore_ascii_case("INTEGER") || s.eq_ignore_ascii_case("BIGINT") {
        FieldType::Integer64
    } else if s.eq_ignore_ascii_case("DOUBLE")
        || s.eq_ignore_ascii_case("FLOAT")
        || s.eq_ignore_ascii_case("REAL")
        || s.eq_ignore_ascii_case("NUMERIC")
    {
        FieldType::Real
    } else if s.eq_ignore_ascii_case("TEXT") || s.eq_ignore_ascii_case("VARCHAR") || s.is_empty() {
        FieldType::String
    } else if s.eq_ignore_ascii_case("BLOB") {
        FieldType::Binary
    } else if s.eq_ignore_ascii_case("DATE") {
        FieldType::Date
    } else if s.eq_ignore_ascii_case("TIME") {
        FieldType::Time
    } else if s.eq_ignore_ascii_case("DATETIME") || s.eq_ignore_ascii_case("TIMESTAMP") {
        FieldType::DateTime
    } else {
        return None;
    };
    Some(FieldDefn::new(name, field_type))
}

/// PostgreSQL column type used when creating a table for a field.
#[inline]
pub(crate) fn field_to_pg_str(field: &FieldDefn) -> &'static str {
    if field.boolean {
        return "boolean";
    }
    match field.field_type {
        FieldType::Integer => "integer",
        FieldType::Integer64 => "bigint",
        FieldType::Real => "double precision",
        FieldType::String => "varchar",
        FieldType::Binary => "bytea",
        FieldType::Date => "date",
        FieldType::Time => "time",
        FieldType::DateTime => "timestamp with time zone",
    }
}

/// Map an `information_schema.columns.data_type` value to a field definition.
#[inline]
pub(crate) fn field_from_pg_str(name: &str, data_type: &str) -> FieldDefn {
    let field_type = match data_type.to_ascii_lowercase().as_str() {
        "boolean" => {
            return FieldDefn {
                name: name.to_string(),
                field_type: FieldType::Integer,
                boolean: true,
            };
        }
        "smallint" | "integer" => FieldType::Integer,
        "bigint" => FieldType::Integer64,
        "real" | "double precision" | "numeric" => FieldType::Real,
        "bytea" => FieldType::Binary,
        "date" => FieldType::Date,
        "time without time zone" | "time with time zone" => FieldType::Time,
        "timestamp without time zone" | "timestamp with time zone" => FieldType::DateTime,
        _ => FieldType::String,
    };
    FieldDefn::new(name, field_type)
}
