//! ESRI Shapefile writer: `.shp` geometry, `.shx` index, dBASE III `.dbf`
//! attributes and a `.cpg` code page marker.

use crate::error::{ManagerError, Result};
use crate::geometry::{Coord, Ring, Shape};
use crate::source::LayerSnapshot;
use crate::srs::SpatialRef;
use crate::types::{FieldDefn, FieldType, GeometryKind, Value};
use chrono::Datelike;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const FILE_CODE: i32 = 9994;
const VERSION: i32 = 1000;
const HEADER_LEN: usize = 100;
const RECORD_HEADER_LEN: usize = 8;

const DBF_FIELD_NAME_LEN: usize = 10;
const DBF_MAX_CHAR_WIDTH: usize = 254;

/// Write the `.prj` sibling holding the WKT of `srs`. Nothing is written for
/// an undefined system.
pub(crate) fn write_prj(dir: &Path, name: &str, srs: Option<&SpatialRef>) -> Result<Option<PathBuf>> {
    let Some(srs) = srs.filter(|srs| srs.is_defined()) else {
        tracing::warn!(layer = name, "layer has no spatial reference, no .prj written");
        return Ok(None);
    };
    let path = dir.join(format!("{name}.prj"));
    std::fs::write(&path, srs.wkt.trim())?;
    Ok(Some(path))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ShapeType {
    Null,
    Point,
    PolyLine,
    Polygon,
    MultiPoint,
}

impl ShapeType {
    fn code(self, has_z: bool) -> i32 {
        let base = match self {
            ShapeType::Null => return 0,
            ShapeType::Point => 1,
            ShapeType::PolyLine => 3,
            ShapeType::Polygon => 5,
            ShapeType::MultiPoint => 8,
        };
        if has_z { base + 10 } else { base }
    }

    fn for_kind(kind: GeometryKind) -> Option<Self> {
        match kind {
            GeometryKind::Point => Some(ShapeType::Point),
            GeometryKind::MultiPoint => Some(ShapeType::MultiPoint),
            GeometryKind::LineString | GeometryKind::MultiLineString => Some(ShapeType::PolyLine),
            GeometryKind::Polygon | GeometryKind::MultiPolygon => Some(ShapeType::Polygon),
            GeometryKind::Unknown | GeometryKind::GeometryCollection => None,
        }
    }

    fn for_shape(shape: &Shape) -> Option<Self> {
        match shape {
            Shape::Point(_) => Some(ShapeType::Point),
            Shape::MultiPoint(_) => Some(ShapeType::MultiPoint),
            Shape::LineString(_) | Shape::MultiLineString(_) => Some(ShapeType::PolyLine),
            Shape::Polygon(_) | Shape::MultiPolygon(_) => Some(ShapeType::Polygon),
            Shape::Collection(_) => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Extent {
    min: [f64; 3],
    max: [f64; 3],
}

impl Extent {
    fn empty() -> Self {
        Self {
            min: [f64::MAX; 3],
            max: [f64::MIN; 3],
        }
    }

    fn add(&mut self, coord: &Coord) {
        let values = [coord.x, coord.y, coord.z.unwrap_or(0.0)];
        for i in 0..3 {
            self.min[i] = self.min[i].min(values[i]);
            self.max[i] = self.max[i].max(values[i]);
        }
    }

    fn of(coords: &[Coord]) -> Self {
        let mut extent = Self::empty();
        coords.iter().for_each(|c| extent.add(c));
        extent.or_zero()
    }

    fn merge(&mut self, other: &Extent) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(other.min[i]);
            self.max[i] = self.max[i].max(other.max[i]);
        }
    }

    fn or_zero(self) -> Self {
        if self.min[0] > self.max[0] {
            Self {
                min: [0.0; 3],
                max: [0.0; 3],
            }
        } else {
            self
        }
    }
}

/// Write `<name>.shp`, `.shx`, `.dbf` and `.cpg` into `dir`.
pub(super) fn write(dir: &Path, name: &str, snapshot: &LayerSnapshot) -> Result<()> {
    let shapes = snapshot
        .features
        .iter()
        .map(|feature| feature.geometry_wkb().map(Shape::from_wkb).transpose())
        .collect::<Result<Vec<_>>>()?;

    let shape_type = layer_shape_type(snapshot, &shapes)?;
    let has_z = snapshot.definition.geometry_dimension() == wkb::reader::Dimension::Xyz
        || snapshot.definition.geometry_dimension() == wkb::reader::Dimension::Xyzm;

    let mut records = Vec::with_capacity(shapes.len());
    let mut extent = Extent::empty();
    for shape in &shapes {
        let (content, record_extent) = match shape {
            Some(shape) => encode_shape(shape, shape_type, has_z)?,
            None => (0_i32.to_le_bytes().to_vec(), None),
        };
        if let Some(record_extent) = record_extent {
            extent.merge(&record_extent);
        }
        records.push(content);
    }
    let extent = extent.or_zero();
    let type_code = shape_type.code(has_z);

    let shp_len = HEADER_LEN + records.iter().map(|r| RECORD_HEADER_LEN + r.len()).sum::<usize>();
    let shx_len = HEADER_LEN + records.len() * RECORD_HEADER_LEN;

    let mut shp = BufWriter::new(File::create(dir.join(format!("{name}.shp")))?);
    let mut shx = BufWriter::new(File::create(dir.join(format!("{name}.shx")))?);
    write_header(&mut shp, shp_len, type_code, &extent)?;
    write_header(&mut shx, shx_len, type_code, &extent)?;

    let mut offset = HEADER_LEN;
    for (idx, content) in records.iter().enumerate() {
        let number = i32::try_from(idx + 1).map_err(|_| too_large(name))?;
        let content_words = words(content.len(), name)?;
        shp.write_all(&number.to_be_bytes())?;
        shp.write_all(&content_words.to_be_bytes())?;
        shp.write_all(content)?;

        shx.write_all(&words(offset, name)?.to_be_bytes())?;
        shx.write_all(&content_words.to_be_bytes())?;
        offset += RECORD_HEADER_LEN + content.len();
    }
    shp.flush()?;
    shx.flush()?;

    let mut dbf = BufWriter::new(File::create(dir.join(format!("{name}.dbf")))?);
    write_dbf(&mut dbf, snapshot)?;
    dbf.flush()?;

    std::fs::write(dir.join(format!("{name}.cpg")), "UTF-8")?;
    tracing::debug!(layer = name, records = records.len(), "wrote shapefile");
    Ok(())
}

fn too_large(name: &str) -> ManagerError {
    ManagerError::Message(format!("layer '{name}' is too large for a shapefile"))
}

// Sizes in the .shp/.shx headers count 16-bit words.
fn words(bytes: usize, name: &str) -> Result<i32> {
    i32::try_from(bytes / 2).map_err(|_| too_large(name))
}

fn layer_shape_type(snapshot: &LayerSnapshot, shapes: &[Option<Shape>]) -> Result<ShapeType> {
    if snapshot.definition.geometry.is_none() {
        return Ok(ShapeType::Null);
    }
    if let Some(shape_type) = ShapeType::for_kind(snapshot.definition.geometry_kind()) {
        return Ok(shape_type);
    }
    // Generic geometry columns take the type of the first feature.
    match shapes.iter().flatten().next() {
        None => Ok(ShapeType::Null),
        Some(shape) => ShapeType::for_shape(shape).ok_or_else(|| {
            ManagerError::UnsupportedGeometryType("Geometry Collection".to_string())
        }),
    }
}

fn write_header<W: Write>(out: &mut W, file_len: usize, type_code: i32, extent: &Extent) -> Result<()> {
    let file_words = i32::try_from(file_len / 2)
        .map_err(|_| ManagerError::Message("shapefile exceeds 4 GiB".to_string()))?;
    out.write_all(&FILE_CODE.to_be_bytes())?;
    out.write_all(&[0u8; 20])?;
    out.write_all(&file_words.to_be_bytes())?;
    out.write_all(&VERSION.to_le_bytes())?;
    out.write_all(&type_code.to_le_bytes())?;
    for value in [extent.min[0], extent.min[1], extent.max[0], extent.max[1]] {
        out.write_all(&value.to_le_bytes())?;
    }
    for value in [extent.min[2], extent.max[2], 0.0, 0.0] {
        out.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Shapefile polygons list outer rings clockwise and holes counterclockwise.
fn oriented(ring: &Ring, clockwise: bool) -> Ring {
    let twice_area: f64 = ring
        .windows(2)
        .map(|pair| pair[0].x * pair[1].y - pair[1].x * pair[0].y)
        .sum();
    let is_clockwise = twice_area < 0.0;
    if is_clockwise == clockwise {
        ring.clone()
    } else {
        ring.iter().rev().copied().collect()
    }
}

fn encode_shape(shape: &Shape, shape_type: ShapeType, has_z: bool) -> Result<(Vec<u8>, Option<Extent>)> {
    let actual = ShapeType::for_shape(shape)
        .ok_or_else(|| ManagerError::UnsupportedGeometryType("Geometry Collection".to_string()))?;
    if actual != shape_type {
        return Err(ManagerError::UnsupportedGeometryType(format!(
            "mixed geometry types in one shapefile ({actual:?} in a {shape_type:?} layer)"
        )));
    }
    let mut buf = Vec::new();
    buf.extend_from_slice(&shape_type.code(has_z).to_le_bytes());

    match shape_type {
        ShapeType::Null => Ok((buf, None)),
        ShapeType::Point => {
            let Shape::Point(Some(coord)) = shape else {
                return Ok((0_i32.to_le_bytes().to_vec(), None));
            };
            push_f64(&mut buf, coord.x);
            push_f64(&mut buf, coord.y);
            if has_z {
                push_f64(&mut buf, coord.z.unwrap_or(0.0));
                push_f64(&mut buf, coord.m.unwrap_or(0.0));
            }
            Ok((buf, Some(Extent::of(std::slice::from_ref(coord)))))
        }
        ShapeType::MultiPoint => {
            let coords = shape.coords();
            let extent = Extent::of(&coords);
            push_box(&mut buf, &extent);
            push_i32(&mut buf, coords.len())?;
            push_points(&mut buf, &coords, has_z, &extent);
            Ok((buf, Some(extent)))
        }
        ShapeType::PolyLine | ShapeType::Polygon => {
            let parts: Vec<Ring> = match shape {
                Shape::LineString(coords) => vec![coords.clone()],
                Shape::MultiLineString(lines) => lines.clone(),
                Shape::Polygon(rings) => polygon_rings(rings),
                Shape::MultiPolygon(polys) => polys.iter().flat_map(|p| polygon_rings(p)).collect(),
                _ => Vec::new(),
            };
            let coords: Vec<Coord> = parts.iter().flatten().copied().collect();
            let extent = Extent::of(&coords);
            push_box(&mut buf, &extent);
            push_i32(&mut buf, parts.len())?;
            push_i32(&mut buf, coords.len())?;
            let mut start = 0;
            for part in &parts {
                push_i32(&mut buf, start)?;
                start += part.len();
            }
            push_points(&mut buf, &coords, has_z, &extent);
            Ok((buf, Some(extent)))
        }
    }
}

fn polygon_rings(rings: &[Ring]) -> Vec<Ring> {
    rings
        .iter()
        .enumerate()
        .map(|(idx, ring)| oriented(ring, idx == 0))
        .collect()
}

fn push_f64(buf: &mut Vec<u8>, value: f64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_i32(buf: &mut Vec<u8>, value: usize) -> Result<()> {
    let value = i32::try_from(value)
        .map_err(|_| ManagerError::Message("geometry too large for a shapefile".to_string()))?;
    buf.extend_from_slice(&value.to_le_bytes());
    Ok(())
}

fn push_box(buf: &mut Vec<u8>, extent: &Extent) {
    for value in [extent.min[0], extent.min[1], extent.max[0], extent.max[1]] {
        push_f64(buf, value);
    }
}

// XY pairs, then for Z shapes the Z range and values. The optional M block is omitted.
fn push_points(buf: &mut Vec<u8>, coords: &[Coord], has_z: bool, extent: &Extent) {
    for coord in coords {
        push_f64(buf, coord.x);
        push_f64(buf, coord.y);
    }
    if has_z {
        push_f64(buf, extent.min[2]);
        push_f64(buf, extent.max[2]);
        for coord in coords {
            push_f64(buf, coord.z.unwrap_or(0.0));
        }
    }
}

struct DbfField {
    name: String,
    kind: u8,
    width: usize,
    decimals: u8,
}

fn dbf_fields(snapshot: &LayerSnapshot) -> Vec<DbfField> {
    let mut used: Vec<String> = Vec::new();
    snapshot
        .definition
        .fields
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let name = dbf_field_name(&field.name, &used);
            used.push(name.to_ascii_uppercase());
            let (kind, width, decimals) = dbf_type(field, snapshot, idx);
            DbfField {
                name,
                kind,
                width,
                decimals,
            }
        })
        .collect()
}

/// Ten bytes at most and unique ignoring case, `_1`, `_2`... replacing the tail.
fn dbf_field_name(name: &str, used: &[String]) -> String {
    let base: String = deunicode::deunicode(name)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(DBF_FIELD_NAME_LEN)
        .collect();
    let base = if base.is_empty() { "FIELD".to_string() } else { base };
    let taken = |candidate: &str| used.iter().any(|u| u.eq_ignore_ascii_case(candidate));
    if !taken(&base) {
        return base;
    }
    (1..)
        .map(|n| {
            let suffix = format!("_{n}");
            let keep = DBF_FIELD_NAME_LEN.saturating_sub(suffix.len()).min(base.len());
            format!("{}{suffix}", &base[..keep])
        })
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}

fn dbf_type(field: &FieldDefn, snapshot: &LayerSnapshot, idx: usize) -> (u8, usize, u8) {
    if field.boolean {
        return (b'L', 1, 0);
    }
    match field.field_type {
        FieldType::Integer => (b'N', 9, 0),
        FieldType::Integer64 => (b'N', 18, 0),
        FieldType::Real => (b'N', 24, 15),
        FieldType::Date => (b'D', 8, 0),
        FieldType::String | FieldType::Binary | FieldType::Time | FieldType::DateTime => {
            let widest = snapshot
                .features
                .iter()
                .filter_map(|f| f.properties().get(idx).and_then(Value::to_text))
                .map(|text| text.len())
                .max()
                .unwrap_or(0);
            (b'C', widest.clamp(1, DBF_MAX_CHAR_WIDTH), 0)
        }
    }
}

fn write_dbf<W: Write>(out: &mut W, snapshot: &LayerSnapshot) -> Result<()> {
    let fields = dbf_fields(snapshot);
    let record_count = u32::try_from(snapshot.features.len())
        .map_err(|_| ManagerError::Message("too many records for dBASE".to_string()))?;
    let header_len = u16::try_from(32 + 32 * fields.len() + 1)
        .map_err(|_| ManagerError::Message("too many fields for dBASE".to_string()))?;
    let record_len = u16::try_from(1 + fields.iter().map(|f| f.width).sum::<usize>())
        .map_err(|_| ManagerError::Message("dBASE record too wide".to_string()))?;

    let today = chrono::Local::now().date_naive();
    let mut header = vec![0u8; 32];
    header[0] = 0x03;
    header[1] = u8::try_from(today.year() - 1900).unwrap_or(u8::MAX);
    header[2] = today.month() as u8;
    header[3] = today.day() as u8;
    header[4..8].copy_from_slice(&record_count.to_le_bytes());
    header[8..10].copy_from_slice(&header_len.to_le_bytes());
    header[10..12].copy_from_slice(&record_len.to_le_bytes());
    out.write_all(&header)?;

    for field in &fields {
        let mut descriptor = [0u8; 32];
        let name = field.name.as_bytes();
        descriptor[..name.len()].copy_from_slice(name);
        descriptor[11] = field.kind;
        descriptor[16] = field.width as u8;
        descriptor[17] = field.decimals;
        out.write_all(&descriptor)?;
    }
    out.write_all(&[0x0D])?;

    for feature in &snapshot.features {
        out.write_all(b" ")?;
        for (idx, field) in fields.iter().enumerate() {
            let value = feature.properties().get(idx).unwrap_or(&Value::Null);
            out.write_all(&dbf_value(field, value))?;
        }
    }
    out.write_all(&[0x1A])?;
    Ok(())
}

fn dbf_value(field: &DbfField, value: &Value) -> Vec<u8> {
    let text = match (field.kind, value) {
        (_, Value::Null) => String::new(),
        (b'L', value) => match value {
            Value::Integer(0) => "F".to_string(),
            _ => "T".to_string(),
        },
        (b'N', Value::Real(v)) => format!("{:.*}", usize::from(field.decimals), v),
        (b'D', value) => value
            .to_text()
            .map(|t| t.chars().filter(char::is_ascii_digit).take(8).collect())
            .unwrap_or_default(),
        (_, value) => value.to_text().unwrap_or_default(),
    };
    let mut bytes = truncate_to_width(&text, field.width).into_bytes();
    let padding = field.width - bytes.len();
    if field.kind == b'N' {
        let mut padded = vec![b' '; padding];
        padded.append(&mut bytes);
        padded
    } else {
        bytes.resize(field.width, b' ');
        bytes
    }
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if text.len() <= width {
        return text.to_string();
    }
    let mut end = width;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
