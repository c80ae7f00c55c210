//! Per-destination settings resolution and the JSON settings file.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::config::store::{ConfigStore, Setting, SettingKey, SettingValue};
use crate::engine::filter::{FieldCriterion, FilterCriteria, LabelMatch};
use crate::error::ConfigError;

/// Registration names are case-insensitive; they are stored lower case.
pub fn normalize_list_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Everything the engine needs to evaluate one (list, destination) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationSettings {
    pub active: bool,
    pub interval_minutes: u64,
    pub verbose: bool,
    pub criteria: FilterCriteria,
    /// Per-card template for verbose mode.
    pub template: Option<String>,
    pub summary_template: Option<String>,
    pub all_clear_template: Option<String>,
    pub alert_message: String,
}

impl DestinationSettings {
    /// Resolve the settings for `destination` on `list`.
    ///
    /// `active`, `interval` and `verbose` must resolve at destination or list
    /// level; everything else is optional.
    pub fn load(
        store: &dyn ConfigStore,
        list: &str,
        destination: &str,
    ) -> Result<Self, ConfigError> {
        let lookup = Lookup {
            store,
            list,
            destination,
        };

        let active = lookup.required(Setting::Active, SettingValue::as_bool)?;
        let verbose = lookup.required(Setting::Verbose, SettingValue::as_bool)?;
        let interval_minutes = lookup.required(Setting::Interval, SettingValue::as_number)?;
        if interval_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                key: lookup.key(Setting::Interval).to_string(),
                message: "interval must be a positive number of minutes".into(),
            });
        }

        let labels = lookup
            .optional(Setting::Labels, SettingValue::as_text_list)?
            .unwrap_or_default();

        let fields = lookup
            .optional(Setting::FieldFilters, SettingValue::as_text_list)?
            .unwrap_or_default()
            .iter()
            .map(|raw| {
                FieldCriterion::parse(raw).ok_or_else(|| ConfigError::InvalidValue {
                    key: lookup.key(Setting::FieldFilters).to_string(),
                    message: format!("'{raw}' is not of the form name:value"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let label_match = match lookup.optional(Setting::LabelMatch, |v| {
            v.as_text().map(str::to_string)
        })? {
            None => LabelMatch::default(),
            Some(raw) => LabelMatch::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: lookup.key(Setting::LabelMatch).to_string(),
                message: format!("unknown label match policy '{raw}'"),
            })?,
        };

        let text = |setting| lookup.optional(setting, |v| v.as_text().map(str::to_string));

        Ok(Self {
            active,
            interval_minutes,
            verbose,
            criteria: FilterCriteria::new(labels, fields, label_match),
            template: text(Setting::Template)?,
            summary_template: text(Setting::SummaryTemplate)?,
            all_clear_template: text(Setting::AllClearTemplate)?,
            alert_message: text(Setting::AlertMessage)?.unwrap_or_default(),
        })
    }
}

struct Lookup<'a> {
    store: &'a dyn ConfigStore,
    list: &'a str,
    destination: &'a str,
}

impl Lookup<'_> {
    fn key(&self, setting: Setting) -> SettingKey {
        SettingKey::destination(self.list, self.destination, setting)
    }

    fn optional<T>(
        &self,
        setting: Setting,
        extract: impl Fn(&SettingValue) -> Option<T>,
    ) -> Result<Option<T>, ConfigError> {
        let key = self.key(setting);
        match self.store.resolve(&key) {
            None => Ok(None),
            Some(value) => extract(&value)
                .map(Some)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("unexpected {} value", value.kind()),
                }),
        }
    }

    fn required<T>(
        &self,
        setting: Setting,
        extract: impl Fn(&SettingValue) -> Option<T>,
    ) -> Result<T, ConfigError> {
        self.optional(setting, extract)?
            .ok_or_else(|| ConfigError::Missing {
                key: self.key(setting).to_string(),
            })
    }
}

/// One list in the settings file.
#[derive(Debug, Deserialize)]
pub struct ListSection {
    pub list_id: String,
    /// List-level defaults, keyed by setting name.
    #[serde(default)]
    pub settings: BTreeMap<String, SettingValue>,
    /// Destination overrides, keyed by destination then setting name.
    #[serde(default)]
    pub destinations: BTreeMap<String, BTreeMap<String, SettingValue>>,
}

/// JSON settings file used to seed a `ConfigStore` at startup.
#[derive(Debug, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub lists: BTreeMap<String, ListSection>,
}

impl SettingsFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Write every setting into `store`. Returns `(list name, list id)` pairs
    /// ready for registration.
    pub fn apply(&self, store: &dyn ConfigStore) -> Result<Vec<(String, String)>, ConfigError> {
        let mut lists = Vec::with_capacity(self.lists.len());

        for (name, section) in &self.lists {
            let list = normalize_list_name(name);

            for (setting_name, value) in &section.settings {
                let setting = parse_setting(&list, setting_name)?;
                store.set(SettingKey::list(list.clone(), setting), value.clone());
            }

            for (destination, overrides) in &section.destinations {
                for (setting_name, value) in overrides {
                    let setting = parse_setting(&list, setting_name)?;
                    store.set(
                        SettingKey::destination(list.clone(), destination.clone(), setting),
                        value.clone(),
                    );
                }
            }

            if !section.destinations.is_empty() {
                store.set(
                    SettingKey::list(list.clone(), Setting::Destinations),
                    SettingValue::TextList(section.destinations.keys().cloned().collect()),
                );
            }

            lists.push((list, section.list_id.clone()));
        }

        Ok(lists)
    }
}

fn parse_setting(list: &str, name: &str) -> Result<Setting, ConfigError> {
    Setting::parse(name).ok_or_else(|| ConfigError::InvalidValue {
        key: format!("lists.{list}.{name}"),
        message: "unknown setting".into(),
    })
}
