//! Field derivation: server-generated values applied inside the write
//! transaction, between payload validation and the INSERT/UPDATE.
//!
//! Rules are driven entirely by field metadata. The engine is pure with
//! respect to the database: everything stateful (uniqueness probes,
//! sequences, autofill sources, link arrays) goes through
//! [`DerivationStore`].

pub mod eval;
pub mod formula;
pub mod links;
pub mod password;
pub mod random;
pub mod store;

#[cfg(test)]
pub(crate) mod memory;

pub use links::LinkUpdate;
pub use store::{AggregateKind, AggregateRequest, DerivationStore, PgDerivationStore};

use crate::catalog::TableCatalog;

use tably_core::{
    schema::{Field, FieldType, SqlType},
    stmt::{Document, Value},
    Error, Result,
};

use chrono::{NaiveDate, NaiveDateTime, Utc};

/// Uniqueness probes per random field before giving up.
pub const DEFAULT_RETRY_CAP: u32 = 64;

/// Zero-padding width of sequence-backed identifiers.
pub const DEFAULT_SEQUENCE_DIGITS: usize = 9;

/// Length of generated random values when the field does not configure
/// one.
pub const DEFAULT_RANDOM_LENGTH: usize = 8;

/// The net many-to-many link change an update produces.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LinkDelta {
    pub appends: Vec<LinkUpdate>,
    pub removals: Vec<LinkUpdate>,
}

pub struct FieldDerivationEngine<'a, S: DerivationStore + ?Sized> {
    catalog: &'a TableCatalog,
    store: &'a S,
    retry_cap: u32,
}

impl<'a, S: DerivationStore + ?Sized> FieldDerivationEngine<'a, S> {
    pub fn new(catalog: &'a TableCatalog, store: &'a S) -> Self {
        Self {
            catalog,
            store,
            retry_cap: DEFAULT_RETRY_CAP,
        }
    }

    pub fn with_retry_cap(mut self, retry_cap: u32) -> Self {
        self.retry_cap = retry_cap.max(1);
        self
    }

    fn table_slug(&self) -> &str {
        &self.catalog.table.slug
    }

    /// Derivation pipeline for a new row. `doc` must already carry its
    /// `guid`. Returns the link attachments to apply after the INSERT.
    pub async fn apply_on_create(&self, doc: &mut Document) -> Result<Vec<LinkUpdate>> {
        self.normalize(doc)?;
        self.validate_supplied(doc)?;

        for field in self.catalog.fields.values() {
            match field.field_type {
                FieldType::RandomNumbers => {
                    let prefix = field.prefix();
                    let length = field.digit_number(DEFAULT_RANDOM_LENGTH);
                    let value = self
                        .unique_candidate(field, || random::number(&prefix, length))
                        .await?;
                    doc.insert(field.slug.clone(), value);
                }
                FieldType::RandomText => {
                    let prefix = field.prefix();
                    let length = field.digit_number(DEFAULT_RANDOM_LENGTH);
                    let value = self
                        .unique_candidate(field, || random::text(&prefix, length))
                        .await?;
                    doc.insert(field.slug.clone(), value);
                }
                FieldType::RandomUuid => {
                    doc.insert(field.slug.clone(), uuid::Uuid::new_v4().to_string());
                }
                FieldType::IncrementId => {
                    let next = self
                        .store
                        .next_sequence(self.table_slug(), &field.slug)
                        .await?;
                    let width = field.digit_number(DEFAULT_SEQUENCE_DIGITS);
                    let prefix = field.prefix();
                    let value = if prefix.is_empty() {
                        format!("{next:0width$}")
                    } else {
                        format!("{prefix}-{next:0width$}")
                    };
                    doc.insert(field.slug.clone(), value);
                }
                // SERIAL columns and backend formulas belong to the
                // database / recalculation, never to the payload.
                FieldType::IncrementNumber | FieldType::Formula => {
                    doc.remove(&field.slug);
                }
                _ => {}
            }
        }

        self.apply_manual_strings(doc, None);
        self.apply_autofill(doc, None).await?;
        self.apply_defaults(doc);
        self.apply_frontend_formulas(doc);
        self.apply_passwords(doc)?;

        self.collect_links(doc).await.map(|delta| delta.appends)
    }

    /// Derivation pipeline for a partial update against the stored row
    /// `old`. Generated identifiers are never regenerated.
    pub async fn apply_on_update(&self, doc: &mut Document, old: &Document) -> Result<LinkDelta> {
        self.normalize(doc)?;
        self.validate_supplied(doc)?;

        for field in self.catalog.fields.values() {
            match field.field_type {
                FieldType::IncrementId
                | FieldType::IncrementNumber
                | FieldType::RandomNumbers
                | FieldType::RandomText
                | FieldType::RandomUuid
                | FieldType::Formula => {
                    doc.remove(&field.slug);
                }
                _ => {}
            }
        }

        self.apply_manual_strings(doc, Some(old));
        self.apply_autofill(doc, Some(old)).await?;
        self.apply_frontend_formulas(doc);
        self.apply_passwords(doc)?;

        self.link_delta(doc, old).await
    }

    /// Canonicalizes payload values so validation and binding see one
    /// shape: scalar strings on array fields become one-element arrays,
    /// `dd.mm.yyyy` date renderings become ISO.
    fn normalize(&self, doc: &mut Document) -> Result<()> {
        for field in self.catalog.fields.values() {
            let Some(value) = doc.get(&field.slug).cloned() else {
                continue;
            };

            if field.field_type.is_array() {
                if let Value::String(single) = &value {
                    let wrapped = if single.is_empty() {
                        Vec::new()
                    } else {
                        vec![single.clone()]
                    };
                    doc.insert(field.slug.clone(), Value::StringArray(wrapped));
                }
                if field.required && doc.get(&field.slug).map(Value::is_empty).unwrap_or(true) {
                    return Err(Error::invalid_argument(format!(
                        "field `{}` requires at least one selection",
                        field.slug
                    )));
                }
                continue;
            }

            if let Value::String(text) = &value {
                match field.sql_type() {
                    SqlType::Timestamp => {
                        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, "%d.%m.%Y %H:%M") {
                            doc.insert(
                                field.slug.clone(),
                                parsed.format("%Y-%m-%d %H:%M:%S").to_string(),
                            );
                        }
                    }
                    SqlType::Date => {
                        if let Ok(parsed) = NaiveDate::parse_from_str(text, "%d.%m.%Y") {
                            doc.insert(field.slug.clone(), parsed.format("%Y-%m-%d").to_string());
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }

    /// Gates every caller-supplied catalog value through its type
    /// pattern. Non-catalog keys are left for the statement builder to
    /// ignore.
    fn validate_supplied(&self, doc: &Document) -> Result<()> {
        for field in self.catalog.fields.values() {
            if let Some(value) = doc.get(&field.slug) {
                if !value.is_empty() {
                    field.validate(value)?;
                }
            }
        }
        Ok(())
    }

    async fn unique_candidate<F>(&self, field: &Field, make: F) -> Result<String>
    where
        F: Fn() -> String,
    {
        for _ in 0..self.retry_cap {
            let candidate = make();
            let taken = self
                .store
                .value_exists(
                    self.table_slug(),
                    &field.slug,
                    &Value::String(candidate.clone()),
                )
                .await?;
            if !taken {
                return Ok(candidate);
            }
        }

        Err(Error::already_exists(format!(
            "exhausted {} attempts generating a unique value for `{}`",
            self.retry_cap, field.slug
        )))
    }

    /// MANUAL_STRING: the formula is a template whose field slugs are
    /// replaced, longest first, with the row's rendered values.
    fn apply_manual_strings(&self, doc: &mut Document, old: Option<&Document>) {
        for field in self.catalog.fields.values() {
            if field.field_type != FieldType::ManualString {
                continue;
            }
            let Some(template) = field.formula() else {
                continue;
            };

            let mut slugs: Vec<&str> = self
                .catalog
                .fields
                .keys()
                .map(String::as_str)
                .filter(|slug| *slug != field.slug)
                .collect();
            slugs.sort_by_key(|slug| std::cmp::Reverse(slug.len()));

            let mut rendered = template;
            let mut any = false;
            for slug in slugs {
                if !rendered.contains(slug) {
                    continue;
                }
                let value = doc
                    .get(slug)
                    .or_else(|| old.and_then(|old| old.get(slug)))
                    .map(Value::coerce_string)
                    .unwrap_or_default();
                if !value.is_empty() {
                    any = true;
                }
                rendered = rendered.replace(slug, &value);
            }

            if any || old.is_none() {
                doc.insert(field.slug.clone(), rendered);
            }
        }
    }

    /// AUTOFILL: copies a column from the related row the local
    /// `<table>_id` key points at.
    async fn apply_autofill(&self, doc: &mut Document, old: Option<&Document>) -> Result<()> {
        for field in self.catalog.fields.values() {
            let (Some(src_table), Some(src_field)) = (&field.autofill_table, &field.autofill_field)
            else {
                continue;
            };
            let src_table = match src_table.split('#').next() {
                Some(table) if !table.is_empty() => table,
                _ => continue,
            };

            // Reading the key from `doc` alone means updates only
            // refresh the copy when the foreign key itself changed.
            let fk = format!("{src_table}_id");
            let Some(fk_value) = doc
                .get(&fk)
                .map(Value::coerce_string)
                .filter(|value| !value.is_empty())
            else {
                continue;
            };

            if let Some(value) = self
                .store
                .autofill_value(src_table, src_field, &fk_value)
                .await?
            {
                if !value.is_empty() {
                    doc.insert(field.slug.clone(), value);
                }
            }
        }

        Ok(())
    }

    /// Fills omitted or empty columns with their configured or type
    /// defaults. Create only; partial updates leave absent columns
    /// untouched.
    fn apply_defaults(&self, doc: &mut Document) {
        for field in self.catalog.fields.values() {
            if matches!(
                field.field_type,
                FieldType::IncrementId
                    | FieldType::IncrementNumber
                    | FieldType::RandomNumbers
                    | FieldType::RandomText
                    | FieldType::RandomUuid
                    | FieldType::Password
                    | FieldType::Formula
                    | FieldType::FormulaFrontend
            ) {
                continue;
            }
            if field.slug == "guid" {
                continue;
            }

            let supplied = doc.get(&field.slug).map(|value| !value.is_empty());
            if supplied == Some(true) {
                continue;
            }

            if let Some(configured) = field.default_attribute() {
                doc.insert(field.slug.clone(), typed_default(field, configured));
                continue;
            }
            if let Some(choices) = field.default_values() {
                let first = choices.coerce_string_array().into_iter().next();
                if let Some(first) = first {
                    doc.insert(field.slug.clone(), first);
                    continue;
                }
            }

            // An explicitly supplied empty value collapses to the
            // type's zero. Identifier columns must stay absent rather
            // than become empty strings.
            if supplied == Some(false) {
                if matches!(field.field_type, FieldType::Lookup | FieldType::Lookups) {
                    doc.remove(&field.slug);
                } else {
                    doc.insert(field.slug.clone(), field.sql_type().default_value());
                }
            }
        }
    }

    /// FORMULA_FRONTEND: evaluated in-process over the row's own values
    /// and stored as text. Evaluation failures skip the field instead of
    /// failing the write.
    fn apply_frontend_formulas(&self, doc: &mut Document) {
        for field in self.catalog.fields.values() {
            if field.field_type != FieldType::FormulaFrontend || field.formula().is_none() {
                continue;
            }
            match formula::render_frontend(field, &self.catalog.fields, doc) {
                Ok(value) => {
                    doc.insert(field.slug.clone(), value.coerce_string());
                }
                Err(err) => {
                    tracing::debug!(field = %field.slug, %err, "frontend formula skipped");
                }
            }
        }
    }

    fn apply_passwords(&self, doc: &mut Document) -> Result<()> {
        for field in self.catalog.fields.values() {
            if field.field_type != FieldType::Password {
                continue;
            }
            let Some(value) = doc.get(&field.slug) else {
                continue;
            };
            let plain = value.coerce_string();
            if plain.is_empty() {
                // Blank means "unchanged", never "erase the hash".
                doc.remove(&field.slug);
                continue;
            }

            password::validate_strength(&plain)
                .map_err(|err| err.context(format!("field `{}`", field.slug)))?;
            doc.insert(field.slug.clone(), password::hash(&plain));
        }

        Ok(())
    }

    async fn collect_links(&self, doc: &Document) -> Result<LinkDelta> {
        self.link_delta(doc, &Document::new()).await
    }

    /// Diffs the payload's link arrays against the stored row and turns
    /// the difference into symmetric attach/detach operations.
    async fn link_delta(&self, doc: &Document, old: &Document) -> Result<LinkDelta> {
        let mut guid = doc.str_of("guid");
        if guid.is_empty() {
            guid = old.str_of("guid");
        }

        let mut delta = LinkDelta::default();
        if guid.is_empty() {
            return Ok(delta);
        }

        for field in self.catalog.fields.values() {
            if field.field_type != FieldType::Lookups {
                continue;
            }
            let Some(relation_id) = &field.relation_id else {
                continue;
            };
            let Some(new_ids) = doc.get(&field.slug).map(Value::coerce_string_array) else {
                continue;
            };
            let old_ids = old
                .get(&field.slug)
                .map(Value::coerce_string_array)
                .unwrap_or_default();

            let Some((from, to)) = self.store.relation_endpoints(relation_id).await? else {
                tracing::warn!(
                    field = %field.slug,
                    relation_id,
                    "link field references an unknown relation"
                );
                continue;
            };
            let other = if from == self.table_slug() { to } else { from };

            let added: Vec<String> = new_ids
                .iter()
                .filter(|id| !old_ids.contains(id))
                .cloned()
                .collect();
            let removed: Vec<String> = old_ids
                .iter()
                .filter(|id| !new_ids.contains(id))
                .cloned()
                .collect();

            if !added.is_empty() {
                delta.appends.push(LinkUpdate {
                    table_from: self.table_slug().to_string(),
                    table_to: other.clone(),
                    guid: guid.clone(),
                    ids: added,
                });
            }
            if !removed.is_empty() {
                delta.removals.push(LinkUpdate {
                    table_from: self.table_slug().to_string(),
                    table_to: other,
                    guid: guid.clone(),
                    ids: removed,
                });
            }
        }

        Ok(delta)
    }
}

/// Converts a configured `defaultValue` attribute into the field's
/// storage shape. Timestamp and date columns treat any configured
/// default as "now"; there is no way to configure a fixed point in
/// time.
fn typed_default(field: &Field, configured: &Value) -> Value {
    let rendered = configured.coerce_string();

    match field.sql_type() {
        SqlType::Float => Value::Number(rendered.parse().unwrap_or(0.0)),
        SqlType::Bool => Value::Bool(rendered == "true"),
        SqlType::TextArray => Value::StringArray(configured.coerce_string_array()),
        SqlType::Timestamp => Value::String(
            Utc::now()
                .naive_utc()
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ),
        SqlType::Date => {
            Value::String(Utc::now().naive_utc().format("%Y-%m-%d").to_string())
        }
        _ => configured.clone(),
    }
}
