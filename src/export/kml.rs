use super::xml::{coordinate_list, end, start, text_element, writer};
use crate::error::Result;
use crate::geometry::{Coord, Shape};
use crate::source::LayerSnapshot;
use crate::types::FieldType;
use quick_xml::Writer;
use std::io::Write;

const KML_NS: &str = "http://www.opengis.net/kml/2.2";

// Coordinates are written as stored; KML readers assume WGS 84.
pub(super) fn write<W: Write>(out: W, snapshot: &LayerSnapshot, name: &str) -> Result<()> {
    let mut w = writer(out)?;
    start(&mut w, "kml", &[("xmlns", KML_NS)])?;
    start(&mut w, "Document", &[("id", "root_doc")])?;

    start(&mut w, "Schema", &[("name", name), ("id", name)])?;
    for field in &snapshot.definition.fields {
        let kml_type = match field.field_type {
            FieldType::Integer | FieldType::Integer64 if field.boolean => "bool",
            FieldType::Integer | FieldType::Integer64 => "int",
            FieldType::Real => "float",
            _ => "string",
        };
        start(&mut w, "SimpleField", &[("name", &field.name), ("type", kml_type)])?;
        end(&mut w, "SimpleField")?;
    }
    end(&mut w, "Schema")?;

    start(&mut w, "Folder", &[])?;
    text_element(&mut w, "name", &[], name)?;
    let schema_url = format!("#{name}");
    for feature in &snapshot.features {
        start(&mut w, "Placemark", &[])?;
        start(&mut w, "ExtendedData", &[])?;
        start(&mut w, "SchemaData", &[("schemaUrl", &schema_url)])?;
        for (key, value) in feature.attributes() {
            if let Some(text) = value.to_text() {
                text_element(&mut w, "SimpleData", &[("name", key)], &text)?;
            }
        }
        end(&mut w, "SchemaData")?;
        end(&mut w, "ExtendedData")?;
        if let Some(wkb) = feature.geometry_wkb() {
            write_geometry(&mut w, &Shape::from_wkb(wkb)?)?;
        }
        end(&mut w, "Placemark")?;
    }
    end(&mut w, "Folder")?;

    end(&mut w, "Document")?;
    end(&mut w, "kml")
}

fn write_coordinates<W: Write>(w: &mut Writer<W>, coords: &[Coord]) -> Result<()> {
    text_element(w, "coordinates", &[], &coordinate_list(coords))
}

fn write_polygon<W: Write>(w: &mut Writer<W>, rings: &[Vec<Coord>]) -> Result<()> {
    start(w, "Polygon", &[])?;
    for (idx, ring) in rings.iter().enumerate() {
        let boundary = if idx == 0 { "outerBoundaryIs" } else { "innerBoundaryIs" };
        start(w, boundary, &[])?;
        start(w, "LinearRing", &[])?;
        write_coordinates(w, ring)?;
        end(w, "LinearRing")?;
        end(w, boundary)?;
    }
    end(w, "Polygon")
}

fn write_geometry<W: Write>(w: &mut Writer<W>, shape: &Shape) -> Result<()> {
    match shape {
        Shape::Point(coord) => {
            start(w, "Point", &[])?;
            write_coordinates(w, coord.as_slice())?;
            end(w, "Point")
        }
        Shape::LineString(coords) => {
            start(w, "LineString", &[])?;
            write_coordinates(w, coords)?;
            end(w, "LineString")
        }
        Shape::Polygon(rings) => write_polygon(w, rings),
        Shape::MultiPoint(_)
        | Shape::MultiLineString(_)
        | Shape::MultiPolygon(_)
        | Shape::Collection(_) => {
            start(w, "MultiGeometry", &[])?;
            let parts = match shape {
                Shape::Collection(shapes) => shapes.clone(),
                _ => shape.parts(),
            };
            for part in &parts {
                write_geometry(w, part)?;
            }
            end(w, "MultiGeometry")
        }
    }
}
