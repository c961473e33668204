use crate::error::Result;
use crate::geometry::Coord;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Write;

pub(super) fn writer<W: Write>(out: W) -> Result<Writer<W>> {
    let mut writer = Writer::new_with_indent(out, b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    Ok(writer)
}

pub(super) fn start<W: Write>(writer: &mut Writer<W>, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
    let mut element = BytesStart::new(name);
    for attr in attrs {
        element.push_attribute(*attr);
    }
    writer.write_event(Event::Start(element))?;
    Ok(())
}

pub(super) fn end<W: Write>(writer: &mut Writer<W>, name: &str) -> Result<()> {
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// `<name attrs>text</name>`, escaped.
pub(super) fn text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    attrs: &[(&str, &str)],
    text: &str,
) -> Result<()> {
    start(writer, name, attrs)?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    end(writer, name)
}

/// `x,y[,z]` tuples separated by spaces, as KML and GML 2 expect.
pub(super) fn coordinate_list(coords: &[Coord]) -> String {
    coords
        .iter()
        .map(|c| match c.z {
            Some(z) => format!("{},{},{}", c.x, c.y, z),
            None => format!("{},{}", c.x, c.y),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
