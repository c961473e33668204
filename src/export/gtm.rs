//! GPS TrackMaker binary files (`.gmt`).
//!
//! Little endian throughout; strings are a `u16` byte length followed by the
//! bytes. The file is a header with the record counts and the lat/lon
//! extent, then every waypoint, then every track point, then one record per
//! track naming it.

use crate::error::{ManagerError, Result};
use crate::geometry::{Coord, Shape};
use crate::source::{Feature, LayerSnapshot};
use std::io::Write;

const VERSION: i16 = 211;
const CODE: &[u8; 10] = b"TrackMaker";
const DATUM: &str = "WGS 84";
const WAYPOINT_ICON: i16 = 48;
const TRACK_TYPE_LINE: u8 = 1;
const TRACK_COLOR: i32 = 0x00ff_0000;

struct Waypoint {
    coord: Coord,
    name: String,
    comment: String,
}

struct TrackPoint {
    coord: Coord,
    starts_segment: bool,
}

pub(super) fn write<W: Write>(mut out: W, snapshot: &LayerSnapshot) -> Result<()> {
    let mut waypoints = Vec::new();
    let mut track_points = Vec::new();
    let mut tracks = Vec::new();

    for feature in &snapshot.features {
        let Some(wkb) = feature.geometry_wkb() else {
            continue;
        };
        match Shape::from_wkb(wkb)? {
            Shape::Point(Some(coord)) => waypoints.push(waypoint(coord, feature)),
            Shape::Point(None) => {}
            Shape::MultiPoint(coords) => {
                waypoints.extend(coords.into_iter().map(|coord| waypoint(coord, feature)))
            }
            Shape::LineString(coords) => {
                push_track(&mut track_points, &[coords]);
                tracks.push(label(feature, "name"));
            }
            Shape::MultiLineString(lines) => {
                push_track(&mut track_points, &lines);
                tracks.push(label(feature, "name"));
            }
            Shape::Polygon(_) | Shape::MultiPolygon(_) | Shape::Collection(_) => {
                return Err(ManagerError::UnsupportedGeometryType(format!(
                    "{} cannot be written to GPS TrackMaker",
                    snapshot
                        .definition
                        .geometry_kind()
                        .type_name(snapshot.definition.geometry_dimension())
                )));
            }
        }
    }

    let coords = waypoints
        .iter()
        .map(|w| &w.coord)
        .chain(track_points.iter().map(|p| &p.coord));
    let (mut max_lat, mut min_lat, mut max_lon, mut min_lon) = (f64::MIN, f64::MAX, f64::MIN, f64::MAX);
    for coord in coords {
        max_lat = max_lat.max(coord.y);
        min_lat = min_lat.min(coord.y);
        max_lon = max_lon.max(coord.x);
        min_lon = min_lon.min(coord.x);
    }
    if waypoints.is_empty() && track_points.is_empty() {
        (max_lat, min_lat, max_lon, min_lon) = (0.0, 0.0, 0.0, 0.0);
    }

    out.write_all(&VERSION.to_le_bytes())?;
    out.write_all(CODE)?;
    write_count(&mut out, waypoints.len())?;
    write_count(&mut out, track_points.len())?;
    write_count(&mut out, tracks.len())?;
    for value in [max_lat, min_lat, max_lon, min_lon] {
        out.write_all(&value.to_le_bytes())?;
    }
    write_string(&mut out, DATUM)?;

    for waypoint in &waypoints {
        out.write_all(&waypoint.coord.y.to_le_bytes())?;
        out.write_all(&waypoint.coord.x.to_le_bytes())?;
        write_string(&mut out, &waypoint.name)?;
        write_string(&mut out, &waypoint.comment)?;
        out.write_all(&WAYPOINT_ICON.to_le_bytes())?;
        out.write_all(&0_i32.to_le_bytes())?;
        out.write_all(&(waypoint.coord.z.unwrap_or(0.0) as f32).to_le_bytes())?;
    }
    for point in &track_points {
        out.write_all(&point.coord.y.to_le_bytes())?;
        out.write_all(&point.coord.x.to_le_bytes())?;
        out.write_all(&0_i32.to_le_bytes())?;
        out.write_all(&[u8::from(point.starts_segment)])?;
        out.write_all(&(point.coord.z.unwrap_or(0.0) as f32).to_le_bytes())?;
    }
    for name in &tracks {
        write_string(&mut out, name)?;
        out.write_all(&[TRACK_TYPE_LINE])?;
        out.write_all(&TRACK_COLOR.to_le_bytes())?;
    }
    Ok(())
}

fn waypoint(coord: Coord, feature: &Feature) -> Waypoint {
    Waypoint {
        coord,
        name: label(feature, "name"),
        comment: label(feature, "comment"),
    }
}

fn label(feature: &Feature, field: &str) -> String {
    feature
        .property(field)
        .and_then(|value| value.to_text())
        .unwrap_or_default()
}

fn push_track(points: &mut Vec<TrackPoint>, segments: &[Vec<Coord>]) {
    for segment in segments {
        points.extend(segment.iter().enumerate().map(|(idx, coord)| TrackPoint {
            coord: *coord,
            starts_segment: idx == 0,
        }));
    }
}

fn write_count<W: Write>(out: &mut W, count: usize) -> Result<()> {
    let count = i32::try_from(count)
        .map_err(|_| ManagerError::Message(format!("too many records for GPS TrackMaker: {count}")))?;
    out.write_all(&count.to_le_bytes())?;
    Ok(())
}

fn write_string<W: Write>(out: &mut W, value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    let len = u16::try_from(bytes.len()).unwrap_or(u16::MAX);
    out.write_all(&len.to_le_bytes())?;
    out.write_all(&bytes[..usize::from(len)])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::Result;
    use crate::test_support::{quakes_snapshot, roads_snapshot};

    fn read_i32(bytes: &[u8], offset: usize) -> i32 {
        i32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("4 bytes"))
    }

    #[test]
    fn header_counts_waypoints() -> Result<()> {
        let mut out = Vec::new();
        super::write(&mut out, &quakes_snapshot())?;
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), 211);
        assert_eq!(&out[2..12], b"TrackMaker");
        assert_eq!(read_i32(&out, 12), 4);
        assert_eq!(read_i32(&out, 16), 0);
        assert_eq!(read_i32(&out, 20), 0);
        let max_lat = f64::from_le_bytes(out[24..32].try_into().expect("8 bytes"));
        assert_eq!(max_lat, 34.8);
        Ok(())
    }

    #[test]
    fn header_counts_tracks() -> Result<()> {
        let mut out = Vec::new();
        super::write(&mut out, &roads_snapshot())?;
        assert_eq!(read_i32(&out, 12), 0);
        assert_eq!(read_i32(&out, 16), 6);
        assert_eq!(read_i32(&out, 20), 3);
        Ok(())
    }
}
