use indexmap::IndexMap;
use tably_core::{
    schema::{Field, FieldType, Relation, RelationKind, Table},
    stmt::Document,
};

pub fn field(slug: &str, ty: FieldType) -> Field {
    Field {
        id: format!("field-{slug}"),
        table_id: "table-orders".into(),
        slug: slug.into(),
        label: slug.into(),
        field_type: ty,
        required: false,
        unique: false,
        is_search: matches!(slug, "status" | "note"),
        autofill_table: None,
        autofill_field: None,
        relation_id: None,
        attributes: Document::new(),
    }
}

/// A small `orders` catalog: a float, two searchable strings, an array
/// column, a lookup and a checkbox, plus one embeddable relation.
pub fn catalog() -> (Table, IndexMap<String, Field>, Vec<Relation>) {
    let table = Table {
        id: "table-orders".into(),
        slug: "orders".into(),
        label: "Orders".into(),
        soft_delete: true,
        is_cached: false,
        with_increment_id: false,
        order_by: true,
    };

    let mut fields = IndexMap::new();
    for (slug, ty) in [
        ("amount", FieldType::Float),
        ("status", FieldType::SingleLine),
        ("note", FieldType::MultiLine),
        ("tags", FieldType::Multiselect),
        ("client_id", FieldType::Lookup),
        ("done", FieldType::Checkbox),
    ] {
        fields.insert(slug.to_string(), field(slug, ty));
    }

    let relations = vec![Relation {
        id: "rel-1".into(),
        kind: RelationKind::Many2One,
        table_from: "orders".into(),
        table_to: "client".into(),
        field_from: "client_id".into(),
        field_to: "guid".into(),
        view_fields: vec![],
    }];

    (table, fields, relations)
}

pub fn doc(json: serde_json::Value) -> Document {
    Document::from_json(json).expect("payload must be a JSON object")
}
