//! Geometry plumbing shared by the drivers: the GeoPackage binary header,
//! bounding boxes, and an owned coordinate model for the text/binary export
//! drivers.

use crate::error::{ManagerError, Result};
use geo_traits::{
    CoordTrait, Dimensions, GeometryCollectionTrait, GeometryTrait, LineStringTrait,
    MultiLineStringTrait, MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait,
};
use wkb::reader::Wkb;

const GPKG_HEADER_LEN: usize = 8;

/// Strip GeoPackage header and envelope bytes to access raw WKB.
// cf. https://www.geopackage.org/spec140/index.html#gpb_format
pub(crate) fn gpkg_geometry_to_wkb(b: &[u8]) -> Result<Wkb<'_>> {
    if b.len() < GPKG_HEADER_LEN {
        return Err(ManagerError::InvalidGpkgGeometryLength {
            len: b.len(),
            minimum: GPKG_HEADER_LEN,
        });
    }
    let flags = b[3];
    let envelope_size: usize = match flags & 0b00001110 {
        0b00000000 => 0,  // no envelope
        0b00000010 => 32, // envelope is [minx, maxx, miny, maxy], 32 bytes
        0b00000100 => 48, // envelope is [minx, maxx, miny, maxy, minz, maxz], 48 bytes
        0b00000110 => 48, // envelope is [minx, maxx, miny, maxy, minm, maxm], 48 bytes
        0b00001000 => 64, // envelope is [minx, maxx, miny, maxy, minz, maxz, minm, maxm], 64 bytes
        _ => {
            return Err(ManagerError::InvalidGpkgGeometryFlags(flags));
        }
    };
    let offset = GPKG_HEADER_LEN + envelope_size;
    if b.len() < offset {
        return Err(ManagerError::InvalidGpkgGeometryLength {
            len: b.len(),
            minimum: offset,
        });
    }

    Ok(Wkb::try_new(&b[offset..])?)
}

/// Prefix raw WKB with a GeoPackage header (little endian SRS ID, no envelope).
// cf. https://www.geopackage.org/spec140/index.html#gpb_format
pub(crate) fn wkb_to_gpkg_geometry(wkb: &[u8], srs_id: i32) -> Vec<u8> {
    let mut geom = Vec::with_capacity(wkb.len() + GPKG_HEADER_LEN);
    geom.extend_from_slice(&[
        0x47u8, // magic
        0x50u8, // magic
        0x00u8, // version
        0x01u8, // flags
    ]);
    geom.extend_from_slice(&srs_id.to_le_bytes());
    geom.extend_from_slice(wkb);
    geom
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub minx: f64,
    pub maxx: f64,
    pub miny: f64,
    pub maxy: f64,
}

impl Bounds {
    pub(crate) fn merge(bounds: &mut Option<Bounds>, other: Bounds) {
        match bounds {
            Some(existing) => {
                existing.minx = existing.minx.min(other.minx);
                existing.maxx = existing.maxx.max(other.maxx);
                existing.miny = existing.miny.min(other.miny);
                existing.maxy = existing.maxy.max(other.maxy);
            }
            None => *bounds = Some(other),
        }
    }

    fn add(bounds: &mut Option<Bounds>, x: f64, y: f64) {
        Self::merge(
            bounds,
            Bounds {
                minx: x,
                maxx: x,
                miny: y,
                maxy: y,
            },
        );
    }
}

pub(crate) fn bounds_from_geometry<G: GeometryTrait<T = f64>>(geom: &G) -> Option<Bounds> {
    use geo_traits::GeometryType as GeoType;

    let mut bounds: Option<Bounds> = None;
    match geom.as_type() {
        GeoType::Point(point) => {
            if let Some(coord) = point.coord() {
                Bounds::add(&mut bounds, coord.x(), coord.y());
            }
        }
        GeoType::LineString(line) => add_line_string(&mut bounds, line),
        GeoType::Polygon(poly) => add_polygon(&mut bounds, poly),
        GeoType::MultiPoint(multi) => {
            for point in multi.points() {
                if let Some(coord) = point.coord() {
                    Bounds::add(&mut bounds, coord.x(), coord.y());
                }
            }
        }
        GeoType::MultiLineString(multi) => {
            for line in multi.line_strings() {
                add_line_string(&mut bounds, &line);
            }
        }
        GeoType::MultiPolygon(multi) => {
            for poly in multi.polygons() {
                add_polygon(&mut bounds, &poly);
            }
        }
        GeoType::GeometryCollection(collection) => {
            for sub_geom in collection.geometries() {
                if let Some(sub_bounds) = bounds_from_geometry(&sub_geom) {
                    Bounds::merge(&mut bounds, sub_bounds);
                }
            }
        }
        GeoType::Rect(_) | GeoType::Triangle(_) | GeoType::Line(_) => {}
    }

    bounds
}

/// Bounds of a raw WKB blob; `None` for empty geometries.
pub(crate) fn wkb_bounds(wkb: &[u8]) -> Result<Option<Bounds>> {
    let wkb = Wkb::try_new(wkb)?;
    Ok(bounds_from_geometry(&wkb))
}

fn add_line_string<L: LineStringTrait<T = f64>>(bounds: &mut Option<Bounds>, line: &L) {
    for coord in line.coords() {
        Bounds::add(bounds, coord.x(), coord.y());
    }
}

fn add_polygon<P: PolygonTrait<T = f64>>(bounds: &mut Option<Bounds>, poly: &P) {
    if let Some(ring) = poly.exterior() {
        add_line_string(bounds, &ring);
    }
    for ring in poly.interiors() {
        add_line_string(bounds, &ring);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
    pub m: Option<f64>,
}

pub(crate) type Ring = Vec<Coord>;

/// Owned view of a geometry for drivers that serialise coordinates themselves.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Shape {
    Point(Option<Coord>),
    LineString(Vec<Coord>),
    Polygon(Vec<Ring>),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Vec<Ring>>),
    Collection(Vec<Shape>),
}

impl Shape {
    pub(crate) fn from_wkb(bytes: &[u8]) -> Result<Shape> {
        let wkb = Wkb::try_new(bytes)?;
        Ok(shape_from_geometry(&wkb))
    }

    /// Every coordinate, in order, flattened.
    pub(crate) fn coords(&self) -> Vec<Coord> {
        let mut out = Vec::new();
        self.collect_coords(&mut out);
        out
    }

    fn collect_coords(&self, out: &mut Vec<Coord>) {
        match self {
            Shape::Point(coord) => out.extend(coord.iter().copied()),
            Shape::LineString(coords) | Shape::MultiPoint(coords) => out.extend_from_slice(coords),
            Shape::Polygon(rings) | Shape::MultiLineString(rings) => {
                rings.iter().for_each(|r| out.extend_from_slice(r))
            }
            Shape::MultiPolygon(polys) => polys
                .iter()
                .flatten()
                .for_each(|r| out.extend_from_slice(r)),
            Shape::Collection(shapes) => shapes.iter().for_each(|s| s.collect_coords(out)),
        }
    }

    /// Split into single-part shapes (points, line strings, polygons).
    pub(crate) fn parts(&self) -> Vec<Shape> {
        match self {
            Shape::Point(_) | Shape::LineString(_) | Shape::Polygon(_) => vec![self.clone()],
            Shape::MultiPoint(coords) => coords.iter().map(|c| Shape::Point(Some(*c))).collect(),
            Shape::MultiLineString(lines) => lines.iter().cloned().map(Shape::LineString).collect(),
            Shape::MultiPolygon(polys) => polys.iter().cloned().map(Shape::Polygon).collect(),
            Shape::Collection(shapes) => shapes.iter().flat_map(Shape::parts).collect(),
        }
    }
}

fn coord_of<C: CoordTrait<T = f64>>(coord: &C) -> Coord {
    let (z, m) = match coord.dim() {
        Dimensions::Xyz => (coord.nth(2), None),
        Dimensions::Xym => (None, coord.nth(2)),
        Dimensions::Xyzm => (coord.nth(2), coord.nth(3)),
        _ => (None, None),
    };
    Coord {
        x: coord.x(),
        y: coord.y(),
        z,
        m,
    }
}

fn line_of<L: LineStringTrait<T = f64>>(line: &L) -> Vec<Coord> {
    line.coords().map(|c| coord_of(&c)).collect()
}

fn rings_of<P: PolygonTrait<T = f64>>(poly: &P) -> Vec<Ring> {
    let mut rings = Vec::with_capacity(poly.num_interiors() + 1);
    if let Some(ring) = poly.exterior() {
        rings.push(line_of(&ring));
    }
    rings.extend(poly.interiors().map(|ring| line_of(&ring)));
    rings
}

fn shape_from_geometry<G: GeometryTrait<T = f64>>(geom: &G) -> Shape {
    use geo_traits::GeometryType as GeoType;

    match geom.as_type() {
        GeoType::Point(point) => Shape::Point(point.coord().map(|c| coord_of(&c))),
        GeoType::LineString(line) => Shape::LineString(line_of(line)),
        GeoType::Polygon(poly) => Shape::Polygon(rings_of(poly)),
        GeoType::MultiPoint(multi) => Shape::MultiPoint(
            multi
                .points()
                .filter_map(|p| p.coord().map(|c| coord_of(&c)))
                .collect(),
        ),
        GeoType::MultiLineString(multi) => {
            Shape::MultiLineString(multi.line_strings().map(|l| line_of(&l)).collect())
        }
        GeoType::MultiPolygon(multi) => {
            Shape::MultiPolygon(multi.polygons().map(|p| rings_of(&p)).collect())
        }
        GeoType::GeometryCollection(collection) => Shape::Collection(
            collection
                .geometries()
                .map(|g| shape_from_geometry(&g))
                .collect(),
        ),
        GeoType::Rect(_) | GeoType::Triangle(_) | GeoType::Line(_) => Shape::Collection(Vec::new()),
    }
}
