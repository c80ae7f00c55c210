//! Custom-field schema loading and per-card value resolution.
//!
//! The schema is reloaded every poll cycle; boards can add or rename fields
//! between polls, so nothing here is cached across cycles.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::board::{BoardSource, Card, CustomFieldItem, RawFieldDefinition};
use crate::error::SchemaFetchError;

/// Value a schema field takes when the card carries no entry for it.
pub const UNSET: &str = "Unset";

/// Kind of a custom field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Drop-down; entries carry an option id.
    List,
    Text,
    Checkbox,
    Number,
    Date,
}

impl FieldKind {
    /// Parse the kind string reported by the source. Unknown kinds yield `None`.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "list" => Some(Self::List),
            "text" => Some(Self::Text),
            "checkbox" => Some(Self::Checkbox),
            "number" => Some(Self::Number),
            "date" => Some(Self::Date),
            _ => None,
        }
    }
}

/// A single field of a board's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    /// Option id to display value; only populated for list-kind fields.
    pub options: HashMap<String, String>,
}

/// Lookup tables for a board's custom fields, keyed by field id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomFieldSchema {
    fields: HashMap<String, FieldDef>,
}

impl CustomFieldSchema {
    /// Build a schema from raw definitions, dropping fields of unknown kind.
    pub fn from_definitions(defs: Vec<RawFieldDefinition>) -> Self {
        let mut fields = HashMap::new();
        for def in defs {
            let Some(kind) = FieldKind::parse(&def.kind) else {
                debug!(field = %def.name, kind = %def.kind, "Omitting field of unknown kind");
                continue;
            };
            let options = def
                .options
                .into_iter()
                .filter_map(|opt| opt.value.text.map(|text| (opt.id, text)))
                .collect();
            fields.insert(
                def.id,
                FieldDef {
                    name: def.name,
                    kind,
                    options,
                },
            );
        }
        Self { fields }
    }

    pub fn get(&self, field_id: &str) -> Option<&FieldDef> {
        self.fields.get(field_id)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Names of every field in the schema.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.values().map(|f| f.name.as_str())
    }
}

/// A card's custom fields resolved to display values, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedFields(BTreeMap<String, String>);

impl ResolvedFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResolvedFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Loads schemas and resolves card field values against them.
pub struct FieldResolver;

impl FieldResolver {
    /// Fetch and build the custom-field schema for the board owning `list_id`.
    pub async fn load_schema(
        source: &dyn BoardSource,
        list_id: &str,
    ) -> Result<CustomFieldSchema, SchemaFetchError> {
        let defs = source
            .fetch_schema(list_id)
            .await
            .map_err(|source| SchemaFetchError {
                list_id: list_id.to_string(),
                source,
            })?;
        Ok(CustomFieldSchema::from_definitions(defs))
    }

    /// Resolve every schema field for `card`.
    ///
    /// Fields the card carries no usable entry for resolve to [`UNSET`].
    /// Entries referencing a field id outside the schema are skipped.
    pub fn resolve_card_fields(card: &Card, schema: &CustomFieldSchema) -> ResolvedFields {
        let mut resolved: ResolvedFields =
            schema.field_names().map(|name| (name, UNSET)).collect();

        for item in &card.custom_field_items {
            let Some(def) = schema.get(&item.id_custom_field) else {
                debug!(
                    card = %card.id,
                    field_id = %item.id_custom_field,
                    "Skipping entry for unknown field"
                );
                continue;
            };
            if let Some(value) = resolve_item(item, def) {
                resolved.insert(def.name.clone(), value);
            }
        }

        resolved
    }
}

fn resolve_item(item: &CustomFieldItem, def: &FieldDef) -> Option<String> {
    match def.kind {
        FieldKind::List => item
            .id_value
            .as_ref()
            .and_then(|option_id| def.options.get(option_id))
            .cloned(),
        FieldKind::Checkbox => {
            let checked = item
                .value
                .as_ref()
                .and_then(|v| v.checked.as_deref())
                .is_some_and(|c| c == "true");
            Some(checked.to_string())
        }
        FieldKind::Text => item.value.as_ref()?.text.clone(),
        FieldKind::Number => item.value.as_ref()?.number.clone(),
        FieldKind::Date => item.value.as_ref()?.date.clone(),
    }
}
