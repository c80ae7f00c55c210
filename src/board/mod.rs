//! Board data model and the `BoardSource` capability.
//!
//! Cards are fetched fresh every poll and never persisted. The field names
//! follow the Trello REST payloads so a source can deserialize straight
//! into these types.

pub mod fields;
pub mod trello;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

pub use fields::{CustomFieldSchema, FieldKind, FieldResolver, ResolvedFields, UNSET};
pub use trello::TrelloSource;

/// A label attached to a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

/// Literal payload of a non-list custom-field entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFieldValue {
    #[serde(default)]
    pub text: Option<String>,
    /// Trello encodes checkbox state as the strings `"true"` / `"false"`.
    #[serde(default)]
    pub checked: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

/// A raw custom-field entry on a card, before schema resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFieldItem {
    pub id_custom_field: String,
    /// Selected option id for list-kind fields.
    #[serde(default)]
    pub id_value: Option<String>,
    #[serde(default)]
    pub value: Option<CustomFieldValue>,
}

/// A work item fetched from the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub custom_field_items: Vec<CustomFieldItem>,
}

impl Card {
    /// Comma-joined label names.
    pub fn label_names(&self) -> String {
        self.labels
            .iter()
            .map(|l| l.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Option of a list-kind field as it arrives from the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFieldOption {
    pub id: String,
    #[serde(default)]
    pub value: CustomFieldValue,
}

/// Field definition as it arrives from the source, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFieldDefinition {
    pub id: String,
    pub name: String,
    /// Field kind as reported by the source (`list`, `text`, `checkbox`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub options: Vec<RawFieldOption>,
}

/// A board list registered for monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredList {
    /// Registration name, lower case.
    pub name: String,
    pub source_list_id: String,
    /// Link to the board containing the list.
    pub url: String,
}

/// Source of board data.
///
/// Timeouts are the implementation's concern; a timed-out call reports
/// `FetchError::Timeout`.
#[async_trait]
pub trait BoardSource: Send + Sync {
    /// Fetch every card currently in the list.
    async fn fetch_cards(&self, list_id: &str) -> Result<Vec<Card>, FetchError>;

    /// Fetch the custom-field definitions of the board owning the list.
    async fn fetch_schema(&self, list_id: &str) -> Result<Vec<RawFieldDefinition>, FetchError>;

    /// Link to the board owning the list.
    async fn board_url(&self, list_id: &str) -> Result<String, FetchError>;
}
