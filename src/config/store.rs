//! Typed setting keys and the `ConfigStore` capability.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// A named setting. Some apply per list, the rest per (list, destination)
/// with the list-level value acting as the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
    /// Source id of the list.
    ListId,
    /// Link to the board containing the list.
    Url,
    /// Destinations subscribed to the list.
    Destinations,
    Active,
    /// Polling cadence in minutes.
    Interval,
    /// Per-card messages instead of a single summary.
    Verbose,
    /// Accepted label substrings.
    Labels,
    /// `name:value` custom-field criteria.
    FieldFilters,
    /// Label policy, `contains` or `exact`.
    LabelMatch,
    Template,
    SummaryTemplate,
    AllClearTemplate,
    /// Prefix for every alert message.
    AlertMessage,
}

impl Setting {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListId => "list_id",
            Self::Url => "url",
            Self::Destinations => "destinations",
            Self::Active => "active",
            Self::Interval => "interval",
            Self::Verbose => "verbose",
            Self::Labels => "labels",
            Self::FieldFilters => "fields",
            Self::LabelMatch => "label_match",
            Self::Template => "template",
            Self::SummaryTemplate => "summary_template",
            Self::AllClearTemplate => "all_clear_template",
            Self::AlertMessage => "alert_message",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        const ALL: [Setting; 13] = [
            Setting::ListId,
            Setting::Url,
            Setting::Destinations,
            Setting::Active,
            Setting::Interval,
            Setting::Verbose,
            Setting::Labels,
            Setting::FieldFilters,
            Setting::LabelMatch,
            Setting::Template,
            Setting::SummaryTemplate,
            Setting::AllClearTemplate,
            Setting::AlertMessage,
        ];
        ALL.into_iter().find(|s| s.as_str() == name)
    }
}

/// Address of a setting: `(list, destination, setting)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SettingKey {
    pub list: String,
    /// `None` addresses the list-level value.
    pub destination: Option<String>,
    pub setting: Setting,
}

impl SettingKey {
    pub fn list(list: impl Into<String>, setting: Setting) -> Self {
        Self {
            list: list.into(),
            destination: None,
            setting,
        }
    }

    pub fn destination(
        list: impl Into<String>,
        destination: impl Into<String>,
        setting: Setting,
    ) -> Self {
        Self {
            list: list.into(),
            destination: Some(destination.into()),
            setting,
        }
    }

    /// The list-level key this key falls back to.
    pub fn list_default(&self) -> Self {
        Self::list(self.list.clone(), self.setting)
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.destination {
            Some(dest) => write!(f, "lists.{}.{}.{}", self.list, self.setting.as_str(), dest),
            None => write!(f, "lists.{}.{}", self.list, self.setting.as_str()),
        }
    }
}

/// A stored setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(u64),
    Text(String),
    TextList(Vec<String>),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// A text list; a single text value is treated as a one-element list.
    pub fn as_text_list(&self) -> Option<Vec<String>> {
        match self {
            Self::TextList(items) => Some(items.clone()),
            Self::Text(s) => Some(vec![s.clone()]),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::TextList(_) => "text list",
        }
    }
}

/// Typed key-value lookups for list and destination settings.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &SettingKey) -> Option<SettingValue>;

    fn set(&self, key: SettingKey, value: SettingValue);

    /// Remove a value, returning what was stored.
    fn remove(&self, key: &SettingKey) -> Option<SettingValue>;

    /// Look up a destination-scoped key, falling back to the list-level value.
    fn resolve(&self, key: &SettingKey) -> Option<SettingValue> {
        self.get(key).or_else(|| {
            key.destination
                .as_ref()
                .and_then(|_| self.get(&key.list_default()))
        })
    }

    /// Set `key` only when it has no value yet. Returns whether it was written.
    fn set_default(&self, key: SettingKey, value: SettingValue) -> bool {
        if self.get(&key).is_some() {
            return false;
        }
        self.set(key, value);
        true
    }
}

/// In-memory `ConfigStore`. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: RwLock<HashMap<SettingKey, SettingValue>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &SettingKey) -> Option<SettingValue> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: SettingKey, value: SettingValue) {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, value);
    }

    fn remove(&self, key: &SettingKey) -> Option<SettingValue> {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }
}
