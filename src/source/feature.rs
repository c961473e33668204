use crate::error::Result;
use crate::types::Value;
use std::collections::HashMap;
use std::sync::Arc;
use wkb::reader::Wkb;

/// Attribute names of a layer, shared by all features read from it.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct FieldIndex {
    names: Vec<String>,
    by_name: HashMap<String, usize>,
}

impl FieldIndex {
    pub(crate) fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let by_name = names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();
        Self { names, by_name }
    }
}

/// One record of a layer: identifier, raw WKB geometry and attribute values in
/// field order.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub(crate) fid: i64,
    pub(crate) geometry: Option<Vec<u8>>,
    pub(crate) properties: Vec<Value>,
    pub(crate) fields: Arc<FieldIndex>,
}

impl Feature {
    pub(crate) fn new(
        fid: i64,
        geometry: Option<Vec<u8>>,
        properties: Vec<Value>,
        fields: Arc<FieldIndex>,
    ) -> Self {
        Self {
            fid,
            geometry,
            properties,
            fields,
        }
    }

    pub fn fid(&self) -> i64 {
        self.fid
    }

    /// Geometry as ISO WKB bytes, `None` when the feature has no geometry.
    pub fn geometry_wkb(&self) -> Option<&[u8]> {
        self.geometry.as_deref()
    }

    /// Parse the geometry.
    pub fn geometry(&self) -> Result<Option<Wkb<'_>>> {
        match &self.geometry {
            Some(bytes) => Ok(Some(Wkb::try_new(bytes)?)),
            None => Ok(None),
        }
    }

    /// Attribute value by field name.
    pub fn property(&self, name: &str) -> Option<&Value> {
        let idx = *self.fields.by_name.get(name)?;
        self.properties.get(idx)
    }

    /// `(field name, value)` pairs in field order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .names
            .iter()
            .map(String::as_str)
            .zip(self.properties.iter())
    }

    pub fn properties(&self) -> &[Value] {
        &self.properties
    }
}
