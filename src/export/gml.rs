use super::xml::{coordinate_list, end, start, text_element, writer};
use crate::error::Result;
use crate::geometry::{Bounds, Coord, Shape, wkb_bounds};
use crate::slug::slugify;
use crate::source::LayerSnapshot;
use quick_xml::Writer;
use std::io::Write;

const OGR_NS: &str = "http://ogr.maptools.org/";
const GML_NS: &str = "http://www.opengis.net/gml";

/// GML 2 feature collection in the `ogr` namespace.
pub(super) fn write<W: Write>(out: W, snapshot: &LayerSnapshot, name: &str) -> Result<()> {
    let element_name = format!("ogr:{}", xml_name(name));
    let srs_name = snapshot
        .srs
        .as_ref()
        .filter(|srs| srs.organization_coordsys_id > 0)
        .map(|srs| format!("{}:{}", srs.organization.to_ascii_uppercase(), srs.organization_coordsys_id));
    let geometry_element = format!(
        "ogr:{}",
        snapshot
            .definition
            .geometry
            .as_ref()
            .map(|g| xml_name(&g.name))
            .unwrap_or_else(|| "geometryProperty".to_string())
    );

    let mut extent = None;
    for feature in &snapshot.features {
        if let Some(bounds) = feature.geometry_wkb().map(wkb_bounds).transpose()?.flatten() {
            Bounds::merge(&mut extent, bounds);
        }
    }

    let mut w = writer(out)?;
    start(
        &mut w,
        "ogr:FeatureCollection",
        &[("xmlns:ogr", OGR_NS), ("xmlns:gml", GML_NS)],
    )?;
    if let Some(extent) = extent {
        start(&mut w, "gml:boundedBy", &[])?;
        write_box(&mut w, &extent, srs_name.as_deref())?;
        end(&mut w, "gml:boundedBy")?;
    }

    for (idx, feature) in snapshot.features.iter().enumerate() {
        start(&mut w, "gml:featureMember", &[])?;
        let fid = format!("{}.{idx}", xml_name(name));
        start(&mut w, &element_name, &[("fid", &fid)])?;
        if let Some(wkb) = feature.geometry_wkb() {
            start(&mut w, &geometry_element, &[])?;
            write_geometry(&mut w, &Shape::from_wkb(wkb)?, srs_name.as_deref())?;
            end(&mut w, &geometry_element)?;
        }
        for (key, value) in feature.attributes() {
            if let Some(text) = value.to_text() {
                text_element(&mut w, &format!("ogr:{}", xml_name(key)), &[], &text)?;
            }
        }
        end(&mut w, &element_name)?;
        end(&mut w, "gml:featureMember")?;
    }
    end(&mut w, "ogr:FeatureCollection")
}

// Element names must not start with a digit or contain spaces.
fn xml_name(name: &str) -> String {
    let slug = slugify(name);
    match slug.chars().next() {
        None => "layer".to_string(),
        Some(first) if first.is_ascii_digit() => format!("_{slug}"),
        Some(_) => slug,
    }
}

fn write_box<W: Write>(w: &mut Writer<W>, extent: &Bounds, srs_name: Option<&str>) -> Result<()> {
    let attrs: Vec<(&str, &str)> = srs_name.map(|s| ("srsName", s)).into_iter().collect();
    start(w, "gml:Box", &attrs)?;
    text_element(
        w,
        "gml:coord",
        &[],
        &format!("{},{} {},{}", extent.minx, extent.miny, extent.maxx, extent.maxy),
    )?;
    end(w, "gml:Box")
}

fn write_coordinates<W: Write>(w: &mut Writer<W>, coords: &[Coord]) -> Result<()> {
    text_element(w, "gml:coordinates", &[], &coordinate_list(coords))
}

fn write_geometry<W: Write>(w: &mut Writer<W>, shape: &Shape, srs_name: Option<&str>) -> Result<()> {
    let attrs: Vec<(&str, &str)> = srs_name.map(|s| ("srsName", s)).into_iter().collect();
    let (element, member) = match shape {
        Shape::Point(coord) => {
            start(w, "gml:Point", &attrs)?;
            write_coordinates(w, coord.as_slice())?;
            return end(w, "gml:Point");
        }
        Shape::LineString(coords) => {
            start(w, "gml:LineString", &attrs)?;
            write_coordinates(w, coords)?;
            return end(w, "gml:LineString");
        }
        Shape::Polygon(rings) => {
            start(w, "gml:Polygon", &attrs)?;
            for (idx, ring) in rings.iter().enumerate() {
                let boundary = if idx == 0 { "gml:outerBoundaryIs" } else { "gml:innerBoundaryIs" };
                start(w, boundary, &[])?;
                start(w, "gml:LinearRing", &[])?;
                write_coordinates(w, ring)?;
                end(w, "gml:LinearRing")?;
                end(w, boundary)?;
            }
            return end(w, "gml:Polygon");
        }
        Shape::MultiPoint(_) => ("gml:MultiPoint", "gml:pointMember"),
        Shape::MultiLineString(_) => ("gml:MultiLineString", "gml:lineStringMember"),
        Shape::MultiPolygon(_) => ("gml:MultiPolygon", "gml:polygonMember"),
        Shape::Collection(_) => ("gml:MultiGeometry", "gml:geometryMember"),
    };
    let parts = match shape {
        Shape::Collection(shapes) => shapes.clone(),
        _ => shape.parts(),
    };
    start(w, element, &attrs)?;
    for part in &parts {
        start(w, member, &[])?;
        write_geometry(w, part, None)?;
        end(w, member)?;
    }
    end(w, element)
}
