use crate::{stmt::Document, Error, Result};

/// Directed association between two tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Many2One,
    One2Many,
    One2One,
    Many2Many,
    Many2Dynamic,
    Recursive,
}

impl RelationKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Many2One" => Some(Self::Many2One),
            "One2Many" => Some(Self::One2Many),
            "One2One" => Some(Self::One2One),
            "Many2Many" => Some(Self::Many2Many),
            "Many2Dynamic" => Some(Self::Many2Dynamic),
            "Recursive" => Some(Self::Recursive),
            _ => None,
        }
    }

    /// Whether traversing this relation can be flattened into the parent
    /// row as a nested object. Many-to-many, dynamic and recursive edges
    /// go through explicit join state instead.
    pub fn embeddable(self) -> bool {
        !matches!(self, Self::Many2Many | Self::Many2Dynamic | Self::Recursive)
    }
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub id: String,
    pub kind: RelationKind,
    pub table_from: String,
    pub table_to: String,
    pub field_from: String,
    pub field_to: String,
    /// Columns to embed when traversing the relation.
    pub view_fields: Vec<String>,
}

impl Relation {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let raw_kind = doc.str_of("type");
        let kind = RelationKind::parse(&raw_kind).ok_or_else(|| {
            Error::internal(format!("unrecognized relation type `{raw_kind}`"))
        })?;

        Ok(Self {
            id: doc.str_of("id"),
            kind,
            table_from: doc.str_of("table_from"),
            table_to: doc.str_of("table_to"),
            field_from: doc.str_of("field_from"),
            field_to: doc.str_of("field_to"),
            view_fields: doc
                .get("view_fields")
                .map(|value| value.coerce_string_array())
                .unwrap_or_default(),
        })
    }

    pub fn embeddable(&self) -> bool {
        self.kind.embeddable()
    }

    /// The table on the opposite side of `slug`, if `slug` is an endpoint.
    pub fn other_side(&self, slug: &str) -> Option<&str> {
        if self.table_from == slug {
            Some(&self.table_to)
        } else if self.table_to == slug {
            Some(&self.table_from)
        } else {
            None
        }
    }
}
