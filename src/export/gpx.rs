use super::xml::{end, start, text_element, writer};
use crate::error::{ManagerError, Result};
use crate::geometry::{Coord, Shape};
use crate::source::{Feature, LayerSnapshot};
use quick_xml::Writer;
use std::io::Write;

const GPX_NS: &str = "http://www.topografix.com/GPX/1/1";
const OGR_NS: &str = "http://osgeo.org/gdal";

/// Attributes with a dedicated GPX element; everything else goes to `<extensions>`.
const GPX_FIELDS: [&str; 3] = ["name", "cmt", "desc"];

/// Points become waypoints, lines become tracks with one segment per part.
pub(super) fn write<W: Write>(out: W, snapshot: &LayerSnapshot) -> Result<()> {
    let shapes = snapshot
        .features
        .iter()
        .map(|feature| {
            let shape = feature.geometry_wkb().map(Shape::from_wkb).transpose()?;
            if matches!(shape, Some(Shape::Polygon(_) | Shape::MultiPolygon(_) | Shape::Collection(_))) {
                return Err(ManagerError::UnsupportedGeometryType(format!(
                    "{} cannot be written to GPX",
                    snapshot.definition.geometry_kind().type_name(snapshot.definition.geometry_dimension())
                )));
            }
            Ok((feature, shape))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut w = writer(out)?;
    start(
        &mut w,
        "gpx",
        &[
            ("version", "1.1"),
            ("creator", env!("CARGO_PKG_NAME")),
            ("xmlns", GPX_NS),
            ("xmlns:ogr", OGR_NS),
        ],
    )?;
    for (feature, shape) in shapes {
        match shape {
            Some(Shape::Point(Some(coord))) => write_point(&mut w, "wpt", &coord, feature)?,
            Some(Shape::MultiPoint(coords)) => {
                for coord in &coords {
                    write_point(&mut w, "wpt", coord, feature)?;
                }
            }
            Some(Shape::LineString(coords)) => write_track(&mut w, &[coords], feature)?,
            Some(Shape::MultiLineString(lines)) => write_track(&mut w, &lines, feature)?,
            _ => {
                tracing::warn!(fid = feature.fid(), "feature without geometry skipped in GPX");
            }
        }
    }
    end(&mut w, "gpx")
}

fn write_properties<W: Write>(w: &mut Writer<W>, feature: &Feature) -> Result<()> {
    for field in GPX_FIELDS {
        if let Some(text) = feature.property(field).and_then(|v| v.to_text()) {
            text_element(w, field, &[], &text)?;
        }
    }
    let extensions: Vec<(&str, String)> = feature
        .attributes()
        .filter(|(key, _)| !GPX_FIELDS.contains(key))
        .filter_map(|(key, value)| value.to_text().map(|text| (key, text)))
        .collect();
    if !extensions.is_empty() {
        start(w, "extensions", &[])?;
        for (key, text) in extensions {
            text_element(w, &format!("ogr:{key}"), &[], &text)?;
        }
        end(w, "extensions")?;
    }
    Ok(())
}

fn lat_lon(coord: &Coord) -> (String, String) {
    (coord.y.to_string(), coord.x.to_string())
}

fn write_point<W: Write>(w: &mut Writer<W>, element: &str, coord: &Coord, feature: &Feature) -> Result<()> {
    let (lat, lon) = lat_lon(coord);
    start(w, element, &[("lat", &lat), ("lon", &lon)])?;
    if let Some(z) = coord.z {
        text_element(w, "ele", &[], &z.to_string())?;
    }
    write_properties(w, feature)?;
    end(w, element)
}

fn write_track<W: Write>(w: &mut Writer<W>, segments: &[Vec<Coord>], feature: &Feature) -> Result<()> {
    start(w, "trk", &[])?;
    write_properties(w, feature)?;
    for segment in segments {
        start(w, "trkseg", &[])?;
        for coord in segment {
            let (lat, lon) = lat_lon(coord);
            start(w, "trkpt", &[("lat", &lat), ("lon", &lon)])?;
            if let Some(z) = coord.z {
                text_element(w, "ele", &[], &z.to_string())?;
            }
            end(w, "trkpt")?;
        }
        end(w, "trkseg")?;
    }
    end(w, "trk")
}
