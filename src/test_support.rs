//! Fixture layers shared by the unit tests.

use crate::Result;
use crate::ogc_sql::EPSG4326_WKT;
use crate::source::{CopyOptions, Feature, FieldIndex, LayerSnapshot, SpatialSource};
use crate::srs::SpatialRef;
use crate::types::{FieldDefn, FieldType, GeomFieldDefn, GeometryKind, LayerDefinition, Value};
use geo_traits::GeometryTrait;
use geo_types::{LineString, Point, Polygon};
use std::path::Path;
use std::sync::Arc;
use wkb::reader::Dimension;

pub(crate) const UTM33N_WKT: &str = r#"PROJCS["WGS 84 / UTM zone 33N",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563]]],PROJECTION["Transverse_Mercator"],EXTENSION["PROJ4","+proj=utm +zone=33 +datum=WGS84 +units=m +no_defs"],AUTHORITY["EPSG","32633"]]"#;

pub(crate) fn wkb_of<G: GeometryTrait<T = f64>>(geometry: G) -> Vec<u8> {
    let mut wkb = Vec::new();
    wkb::writer::write_geometry(&mut wkb, &geometry, &Default::default()).expect("write wkb");
    wkb
}

pub(crate) fn wgs84() -> SpatialRef {
    SpatialRef {
        srs_id: 4326,
        srs_name: "WGS 84".to_string(),
        organization: "EPSG".to_string(),
        organization_coordsys_id: 4326,
        wkt: EPSG4326_WKT.to_string(),
        proj4: None,
    }
}

pub(crate) fn utm33n() -> SpatialRef {
    SpatialRef {
        srs_id: 32633,
        srs_name: "WGS 84 / UTM zone 33N".to_string(),
        organization: "EPSG".to_string(),
        organization_coordsys_id: 32633,
        wkt: UTM33N_WKT.to_string(),
        proj4: None,
    }
}

fn snapshot(
    name: &str,
    fields: Vec<FieldDefn>,
    kind: GeometryKind,
    rows: Vec<(Vec<u8>, Vec<Value>)>,
) -> LayerSnapshot {
    let index = Arc::new(FieldIndex::new(fields.iter().map(|f| f.name.clone())));
    let features = rows
        .into_iter()
        .enumerate()
        .map(|(idx, (wkb, values))| {
            Feature::new(idx as i64 + 1, Some(wkb), values, Arc::clone(&index))
        })
        .collect();
    LayerSnapshot {
        definition: LayerDefinition {
            name: name.to_string(),
            fields,
            geometry: Some(GeomFieldDefn {
                name: "geom".to_string(),
                kind,
                dimension: Dimension::Xy,
            }),
        },
        srs: Some(wgs84()),
        features,
    }
}

/// `roads(name String, length Real)`, three line strings within (0 0, 2 3).
pub(crate) fn roads_snapshot() -> LayerSnapshot {
    snapshot(
        "roads",
        vec![
            FieldDefn::new("name", FieldType::String),
            FieldDefn::new("length", FieldType::Real),
        ],
        GeometryKind::LineString,
        vec![
            (
                wkb_of(LineString::from(vec![(0.0, 0.0), (1.0, 1.0)])),
                vec![Value::from("Main Street"), Value::from(12.5)],
            ),
            (
                wkb_of(LineString::from(vec![(1.0, 1.0), (2.0, 3.0)])),
                vec![Value::from("Second Avenue"), Value::from(3.0)],
            ),
            (
                wkb_of(LineString::from(vec![(2.0, 0.0), (2.0, 2.0)])),
                vec![Value::from("Ring Road"), Value::Null],
            ),
        ],
    )
}

/// `parcels(owner String)`, two squares.
pub(crate) fn parcels_snapshot() -> LayerSnapshot {
    let square = |x: f64, y: f64| {
        Polygon::new(
            LineString::from(vec![
                (x, y),
                (x + 1.0, y),
                (x + 1.0, y + 1.0),
                (x, y + 1.0),
                (x, y),
            ]),
            vec![],
        )
    };
    snapshot(
        "parcels",
        vec![FieldDefn::new("owner", FieldType::String)],
        GeometryKind::Polygon,
        vec![
            (wkb_of(square(0.0, 0.0)), vec![Value::from("Alice")]),
            (wkb_of(square(5.0, 5.0)), vec![Value::from("Bob")]),
        ],
    )
}

/// `quakes(mag Real, place String, year Integer)`, four points.
pub(crate) fn quakes_snapshot() -> LayerSnapshot {
    snapshot(
        "quakes",
        vec![
            FieldDefn::new("mag", FieldType::Real),
            FieldDefn::new("place", FieldType::String),
            FieldDefn::new("year", FieldType::Integer),
        ],
        GeometryKind::Point,
        vec![
            (
                wkb_of(Point::new(-80.0, 33.0)),
                vec![Value::from(5.1), Value::from("Charleston"), Value::from(1886_i64)],
            ),
            (
                wkb_of(Point::new(-79.9, 32.8)),
                vec![Value::from(3.3), Value::from("Summerville"), Value::from(1912_i64)],
            ),
            (
                wkb_of(Point::new(-81.0, 34.0)),
                vec![Value::from(2.5), Value::from("Columbia"), Value::from(1945_i64)],
            ),
            (
                wkb_of(Point::new(-82.4, 34.8)),
                vec![Value::Null, Value::from("Greenville"), Value::from(2008_i64)],
            ),
        ],
    )
}

/// Write a GeoPackage at `path` holding the given layers.
pub(crate) fn fixture_gpkg(path: &Path, layers: &[(&str, LayerSnapshot)]) -> Result<()> {
    let mut source = SpatialSource::create_gpkg(path)?;
    for (name, snapshot) in layers {
        source.copy_layer(snapshot, name, &CopyOptions::default())?;
    }
    source.close()
}
