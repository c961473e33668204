//! Layer schemas and the schema diff used to decide whether an uploaded layer
//! can be appended to a published one.

use crate::types::LayerDefinition;
use serde::Serialize;

/// One `(name, type name, type code)` entry of a layer schema.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SchemaField {
    pub name: String,
    pub type_name: String,
    pub type_code: i32,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, type_code: i32) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            type_code,
        }
    }
}

/// Outcome of [`compare`].
///
/// `deleted_fields` holds the fields only the first schema has and
/// `new_fields` those only the second schema has. Appending layer A into
/// layer B therefore reads as "A deletes these, B would gain those".
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SchemaComparison {
    pub compatible: bool,
    pub deleted_fields: Vec<SchemaField>,
    pub new_fields: Vec<SchemaField>,
}

/// Attribute fields followed by geometry fields, in source order.
pub fn full_schema(definition: &LayerDefinition) -> Vec<SchemaField> {
    let mut schema: Vec<SchemaField> = definition
        .fields
        .iter()
        .map(|f| SchemaField::new(&f.name, f.field_type.name(), f.field_type.code()))
        .collect();
    if let Some(geometry) = &definition.geometry {
        schema.push(SchemaField::new(
            &geometry.name,
            geometry.kind.type_name(geometry.dimension),
            geometry.kind.type_code(geometry.dimension),
        ));
    }
    schema
}

/// Compare two full schemas.
///
/// Fields are matched on the whole `(name, type name, type code)` tuple, so a
/// field whose type changed shows up once in each list.
pub fn compare(schema1: &[SchemaField], schema2: &[SchemaField], ignore_case: bool) -> SchemaComparison {
    let normalize = |schema: &[SchemaField]| {
        let mut schema: Vec<SchemaField> = schema
            .iter()
            .map(|field| {
                let mut field = field.clone();
                if ignore_case {
                    field.name = field.name.to_lowercase();
                }
                field
            })
            .collect();
        // Stable: equal names keep their source order.
        schema.sort_by(|a, b| a.name.cmp(&b.name));
        schema
    };
    let schema1 = normalize(schema1);
    let schema2 = normalize(schema2);

    let deleted_fields: Vec<SchemaField> = schema1
        .iter()
        .filter(|field| !schema2.contains(field))
        .cloned()
        .collect();
    let new_fields: Vec<SchemaField> = schema2
        .iter()
        .filter(|field| !schema1.contains(field))
        .cloned()
        .collect();

    SchemaComparison {
        compatible: schema1 == schema2,
        new_fields,
        deleted_fields,
    }
}
