use crate::error::Result;
use crate::geometry::{Coord, Shape};
use crate::source::LayerSnapshot;
use serde_json::{Map, Value as Json, json};
use std::io::Write;

pub(super) fn write<W: Write>(out: W, snapshot: &LayerSnapshot, name: &str) -> Result<()> {
    let mut features = Vec::with_capacity(snapshot.features.len());
    for feature in &snapshot.features {
        let geometry = match feature.geometry_wkb() {
            Some(wkb) => geometry_json(&Shape::from_wkb(wkb)?),
            None => Json::Null,
        };
        let properties: Map<String, Json> = feature
            .attributes()
            .map(|(key, value)| -> Result<(String, Json)> {
                Ok((key.to_string(), serde_json::to_value(value)?))
            })
            .collect::<Result<_>>()?;
        features.push(json!({
            "type": "Feature",
            "id": feature.fid(),
            "properties": properties,
            "geometry": geometry,
        }));
    }

    let mut collection = json!({
        "type": "FeatureCollection",
        "name": name,
        "features": features,
    });
    if let Some(srs) = snapshot.srs.as_ref().filter(|srs| srs.organization_coordsys_id > 0) {
        collection["crs"] = json!({
            "type": "name",
            "properties": {
                "name": format!(
                    "urn:ogc:def:crs:{}::{}",
                    srs.organization.to_ascii_uppercase(),
                    srs.organization_coordsys_id
                ),
            },
        });
    }
    serde_json::to_writer_pretty(out, &collection)?;
    Ok(())
}

fn position(coord: &Coord) -> Json {
    match coord.z {
        Some(z) => json!([coord.x, coord.y, z]),
        None => json!([coord.x, coord.y]),
    }
}

fn positions(coords: &[Coord]) -> Json {
    Json::Array(coords.iter().map(position).collect())
}

fn rings(rings: &[Vec<Coord>]) -> Json {
    Json::Array(rings.iter().map(|ring| positions(ring)).collect())
}

fn geometry_json(shape: &Shape) -> Json {
    match shape {
        Shape::Point(Some(coord)) => json!({"type": "Point", "coordinates": position(coord)}),
        Shape::Point(None) => json!({"type": "Point", "coordinates": []}),
        Shape::LineString(coords) => json!({"type": "LineString", "coordinates": positions(coords)}),
        Shape::Polygon(r) => json!({"type": "Polygon", "coordinates": rings(r)}),
        Shape::MultiPoint(coords) => json!({"type": "MultiPoint", "coordinates": positions(coords)}),
        Shape::MultiLineString(lines) => {
            json!({"type": "MultiLineString", "coordinates": rings(lines)})
        }
        Shape::MultiPolygon(polys) => json!({
            "type": "MultiPolygon",
            "coordinates": Json::Array(polys.iter().map(|p| rings(p)).collect()),
        }),
        Shape::Collection(shapes) => json!({
            "type": "GeometryCollection",
            "geometries": Json::Array(shapes.iter().map(geometry_json).collect()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use crate::Result;
    use crate::test_support::quakes_snapshot;

    #[test]
    fn writes_feature_collection() -> Result<()> {
        let mut out = Vec::new();
        super::write(&mut out, &quakes_snapshot(), "quakes")?;
        let json: serde_json::Value = serde_json::from_slice(&out)?;

        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["name"], "quakes");
        assert_eq!(json["crs"]["properties"]["name"], "urn:ogc:def:crs:EPSG::4326");
        let features = json["features"].as_array().expect("features");
        assert_eq!(features.len(), 4);
        assert_eq!(features[0]["geometry"]["type"], "Point");
        assert_eq!(features[0]["properties"]["place"], "Charleston");
        Ok(())
    }
}
