use serde::Serialize;
use wkb::reader::Dimension;

/// Attribute field type, named and numbered the way the portal's OGR-based
/// callers expect (`Integer` = 0, `Real` = 2, `String` = 4, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum FieldType {
    Integer,
    Integer64,
    Real,
    String,
    Binary,
    Date,
    Time,
    DateTime,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Integer => "Integer",
            FieldType::Integer64 => "Integer64",
            FieldType::Real => "Real",
            FieldType::String => "String",
            FieldType::Binary => "Binary",
            FieldType::Date => "Date",
            FieldType::Time => "Time",
            FieldType::DateTime => "DateTime",
        }
    }

    pub fn code(self) -> i32 {
        match self {
            FieldType::Integer => 0,
            FieldType::Real => 2,
            FieldType::String => 4,
            FieldType::Binary => 8,
            FieldType::Date => 9,
            FieldType::Time => 10,
            FieldType::DateTime => 11,
            FieldType::Integer64 => 12,
        }
    }
}

/// One attribute column of a layer.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDefn {
    pub name: String,
    pub field_type: FieldType,
    /// Integer column declared as a boolean by the source.
    pub boolean: bool,
}

impl FieldDefn {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            boolean: false,
        }
    }
}

/// Geometry type of a layer or a geometry column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Unknown,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

impl GeometryKind {
    fn base_code(self) -> u32 {
        match self {
            GeometryKind::Unknown => 0,
            GeometryKind::Point => 1,
            GeometryKind::LineString => 2,
            GeometryKind::Polygon => 3,
            GeometryKind::MultiPoint => 4,
            GeometryKind::MultiLineString => 5,
            GeometryKind::MultiPolygon => 6,
            GeometryKind::GeometryCollection => 7,
        }
    }

    fn base_name(self) -> &'static str {
        match self {
            GeometryKind::Unknown => "Unknown (any)",
            GeometryKind::Point => "Point",
            GeometryKind::LineString => "Line String",
            GeometryKind::Polygon => "Polygon",
            GeometryKind::MultiPoint => "Multi Point",
            GeometryKind::MultiLineString => "Multi Line String",
            GeometryKind::MultiPolygon => "Multi Polygon",
            GeometryKind::GeometryCollection => "Geometry Collection",
        }
    }

    /// Human readable name including the dimension, e.g. `3D Multi Polygon`.
    pub fn type_name(self, dimension: Dimension) -> String {
        let base = self.base_name();
        match dimension {
            Dimension::Xy => base.to_string(),
            Dimension::Xyz => format!("3D {base}"),
            Dimension::Xym => format!("Measured {base}"),
            Dimension::Xyzm => format!("3D Measured {base}"),
        }
    }

    /// Numeric type code; Z-only geometries carry the legacy 2.5D flag bit.
    pub fn type_code(self, dimension: Dimension) -> i32 {
        let base = self.base_code();
        match dimension {
            Dimension::Xy => base as i32,
            Dimension::Xyz => (base | 0x8000_0000) as i32,
            Dimension::Xym => (2000 + base) as i32,
            Dimension::Xyzm => (3000 + base) as i32,
        }
    }
}

/// The geometry column of a layer.
#[derive(Clone, Debug, PartialEq)]
pub struct GeomFieldDefn {
    pub name: String,
    pub kind: GeometryKind,
    pub dimension: Dimension,
}

/// Layer structure as declared by its source.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerDefinition {
    pub name: String,
    pub fields: Vec<FieldDefn>,
    /// `None` for attribute-only tables.
    pub geometry: Option<GeomFieldDefn>,
}

impl LayerDefinition {
    pub fn geometry_kind(&self) -> GeometryKind {
        self.geometry
            .as_ref()
            .map(|g| g.kind)
            .unwrap_or(GeometryKind::Unknown)
    }

    pub fn geometry_dimension(&self) -> Dimension {
        self.geometry
            .as_ref()
            .map(|g| g.dimension)
            .unwrap_or(Dimension::Xy)
    }
}

/// Owned dynamic property value, mirroring SQLite's dynamic typing.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text rendering used by the text based export drivers.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Integer(v) => Some(v.to_string()),
            Value::Real(v) => Some(v.to_string()),
            Value::Text(v) => Some(v.clone()),
            Value::Blob(v) => Some(v.iter().map(|b| format!("{b:02X}")).collect()),
        }
    }
}

impl From<rusqlite::types::ValueRef<'_>> for Value {
    fn from(value: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Real(v) => Value::Real(v),
            ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => Value::Blob(v.to_vec()),
        }
    }
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, ValueRef};
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Borrowed(ValueRef::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldType, GeometryKind, Value};
    use wkb::reader::Dimension;

    #[test]
    fn geometry_names_and_codes() {
        assert_eq!(GeometryKind::Point.type_name(Dimension::Xy), "Point");
        assert_eq!(GeometryKind::Point.type_code(Dimension::Xy), 1);
        assert_eq!(
            GeometryKind::MultiPolygon.type_name(Dimension::Xyz),
            "3D Multi Polygon"
        );
        assert_eq!(
            GeometryKind::Point.type_code(Dimension::Xyz),
            0x8000_0001_u32 as i32
        );
        assert_eq!(GeometryKind::LineString.type_code(Dimension::Xym), 2002);
        assert_eq!(GeometryKind::Unknown.type_name(Dimension::Xy), "Unknown (any)");
    }

    #[test]
    fn field_codes_match_names() {
        assert_eq!(FieldType::String.name(), "String");
        assert_eq!(FieldType::String.code(), 4);
        assert_eq!(FieldType::Integer64.code(), 12);
    }

    #[test]
    fn value_text_rendering() {
        assert_eq!(Value::Null.to_text(), None);
        assert_eq!(Value::from(3_i64).to_text().as_deref(), Some("3"));
        assert_eq!(Value::Blob(vec![0x0a, 0xff]).to_text().as_deref(), Some("0AFF"));
        assert_eq!(Value::from(Option::<i64>::None), Value::Null);
    }
}
