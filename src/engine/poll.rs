//! Poll cycle orchestration.
//!
//! One cycle walks every registered list:
//! 1. Work out which subscribed, active destinations are due (or unseen)
//! 2. Fetch schema and cards once for the list, shared by all destinations
//! 3. Per due destination: mark evaluated, filter, render, update the count
//! 4. Send the rendered messages in card order
//!
//! A failed fetch abandons the list for this tick and leaves throttle state
//! untouched. Cycles never overlap.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::board::{BoardSource, Card, FieldResolver, MonitoredList, ResolvedFields};
use crate::config::{
    ConfigStore, DestinationSettings, Setting, SettingKey, SettingValue, normalize_list_name,
};
use crate::engine::filter::CardFilter;
use crate::engine::render::{
    DEFAULT_ALL_CLEAR_TEMPLATE, DEFAULT_CARD_TEMPLATE, DEFAULT_SUMMARY_TEMPLATE, MessageRenderer,
    SummaryContext,
};
use crate::engine::throttle::{Readiness, ThrottleKey, ThrottleState, ThrottleTracker};
use crate::error::{ConfigError, Error};
use crate::notify::Notifier;

/// Polling cadence written for newly registered lists, in minutes.
pub const DEFAULT_INTERVAL_MINUTES: u64 = 10;
/// Board link used until the real one is known.
pub const DEFAULT_BOARD_URL: &str = "https://trello.com";

/// Counters for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub lists_polled: usize,
    pub lists_failed: usize,
    pub destinations_evaluated: usize,
    /// Destinations skipped because their settings were missing or invalid.
    pub destinations_misconfigured: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
}

/// Drives poll cycles over the registered lists.
pub struct PollEngine {
    source: Arc<dyn BoardSource>,
    config: Arc<dyn ConfigStore>,
    notifier: Arc<dyn Notifier>,
    lists: RwLock<BTreeMap<String, MonitoredList>>,
    throttle: Mutex<ThrottleTracker>,
    /// Held for the whole of a cycle.
    cycle: Mutex<()>,
}

impl PollEngine {
    pub fn new(
        source: Arc<dyn BoardSource>,
        config: Arc<dyn ConfigStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            config,
            notifier,
            lists: RwLock::new(BTreeMap::new()),
            throttle: Mutex::new(ThrottleTracker::new()),
            cycle: Mutex::new(()),
        }
    }

    /// Register (or re-register) a list for monitoring.
    ///
    /// Writes the list id and any missing list-level defaults, then tries to
    /// resolve the board link. Throttle state for the list is reset.
    pub async fn register_list(
        &self,
        name: &str,
        source_list_id: &str,
    ) -> Result<MonitoredList, Error> {
        let name = normalize_list_name(name);
        if name.is_empty() || source_list_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: format!("lists.{name}.list_id"),
                message: "list name and source list id must be non-empty".into(),
            }
            .into());
        }
        let source_list_id = source_list_id.trim().to_string();

        let store = self.config.as_ref();
        store.set(
            SettingKey::list(name.clone(), Setting::ListId),
            SettingValue::Text(source_list_id.clone()),
        );
        store.set_default(
            SettingKey::list(name.clone(), Setting::Interval),
            SettingValue::Number(DEFAULT_INTERVAL_MINUTES),
        );
        store.set_default(
            SettingKey::list(name.clone(), Setting::Verbose),
            SettingValue::Bool(true),
        );
        store.set_default(
            SettingKey::list(name.clone(), Setting::Active),
            SettingValue::Bool(false),
        );
        store.set_default(
            SettingKey::list(name.clone(), Setting::Url),
            SettingValue::Text(DEFAULT_BOARD_URL.to_string()),
        );

        match self.source.board_url(&source_list_id).await {
            Ok(url) => store.set(
                SettingKey::list(name.clone(), Setting::Url),
                SettingValue::Text(url),
            ),
            Err(e) => warn!(list = %name, "Could not resolve board link: {e}"),
        }

        let url = store
            .get(&SettingKey::list(name.clone(), Setting::Url))
            .and_then(|v| v.as_text().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_BOARD_URL.to_string());

        let list = MonitoredList {
            name: name.clone(),
            source_list_id,
            url,
        };

        self.lists.write().await.insert(name.clone(), list.clone());
        self.throttle.lock().await.forget_list(&name);

        info!(
            list = %list.name,
            source_list_id = %list.source_list_id,
            url = %list.url,
            "Registered list"
        );
        Ok(list)
    }

    /// Registered lists, ordered by name.
    pub async fn lists(&self) -> Vec<MonitoredList> {
        self.lists.read().await.values().cloned().collect()
    }

    /// Throttle state of a (list, destination) pair.
    pub async fn throttle_state(&self, list: &str, destination: &str) -> Option<ThrottleState> {
        self.throttle
            .lock()
            .await
            .state(&ThrottleKey::new(list, destination))
            .cloned()
    }

    /// Run one cycle now, waiting for any cycle in progress to finish first.
    pub async fn run_once(&self) -> CycleReport {
        self.run_once_at(Utc::now()).await
    }

    /// [`run_once`](Self::run_once) with an explicit clock reading.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> CycleReport {
        let _guard = self.cycle.lock().await;
        self.run_cycle(now).await
    }

    /// Run one cycle unless one is already in progress.
    pub async fn try_run_once(&self) -> Option<CycleReport> {
        let Ok(_guard) = self.cycle.try_lock() else {
            debug!("Previous poll cycle still running, skipping tick");
            return None;
        };
        Some(self.run_cycle(Utc::now()).await)
    }

    async fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();
        for list in self.lists().await {
            self.poll_list(&list, now, &mut report).await;
        }
        debug!(?report, "Poll cycle finished");
        report
    }

    fn destinations(&self, list: &str) -> Vec<String> {
        self.config
            .get(&SettingKey::list(list, Setting::Destinations))
            .and_then(|v| v.as_text_list())
            .unwrap_or_default()
    }

    async fn poll_list(
        &self,
        list: &MonitoredList,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        let subscribed = self.destinations(&list.name);
        let mut active = Vec::new();
        let mut inactive = Vec::new();
        for destination in &subscribed {
            match DestinationSettings::load(self.config.as_ref(), &list.name, destination) {
                Ok(settings) if settings.active => active.push((destination.clone(), settings)),
                Ok(_) => {
                    debug!(list = %list.name, destination = %destination, "Not active");
                    inactive.push(destination);
                }
                Err(e) => {
                    warn!(
                        list = %list.name,
                        destination = %destination,
                        "Skipping destination: {e}"
                    );
                    report.destinations_misconfigured += 1;
                }
            }
        }

        let any_pending = {
            let mut tracker = self.throttle.lock().await;
            // Unsubscribed or inactive pairs restart with a silent first sighting.
            tracker.retain_destinations(&list.name, &subscribed);
            for destination in inactive {
                tracker.forget(&ThrottleKey::new(&list.name, destination));
            }
            active.iter().any(|(destination, settings)| {
                let key = ThrottleKey::new(&list.name, destination);
                tracker.readiness(&key, settings.interval_minutes, now) != Readiness::Waiting
            })
        };
        if !any_pending {
            return;
        }

        let cards = match self.fetch(list).await {
            Ok(cards) => cards,
            Err(e) => {
                warn!(list = %list.name, "Abandoning list for this tick: {e}");
                report.lists_failed += 1;
                return;
            }
        };
        report.lists_polled += 1;
        debug!(list = %list.name, count = cards.len(), "Fetched cards");

        for (destination, settings) in &active {
            let messages = {
                let mut tracker = self.throttle.lock().await;
                evaluate_destination(&mut tracker, list, destination, settings, &cards, now)
            };
            let Some(messages) = messages else {
                continue;
            };
            report.destinations_evaluated += 1;

            for text in &messages {
                match self.notifier.send(destination, text).await {
                    Ok(()) => report.notifications_sent += 1,
                    Err(e) => {
                        error!(
                            list = %list.name,
                            destination = %destination,
                            notifier = self.notifier.name(),
                            "Notification failed: {e}"
                        );
                        report.notifications_failed += 1;
                    }
                }
            }
        }
    }

    async fn fetch(&self, list: &MonitoredList) -> Result<Vec<(Card, ResolvedFields)>, Error> {
        let list_id = list.source_list_id.as_str();
        let (schema, cards) = tokio::try_join!(
            async {
                FieldResolver::load_schema(self.source.as_ref(), list_id)
                    .await
                    .map_err(Error::from)
            },
            async { self.source.fetch_cards(list_id).await.map_err(Error::from) },
        )?;

        Ok(cards
            .into_iter()
            .map(|card| {
                let fields = FieldResolver::resolve_card_fields(&card, &schema);
                (card, fields)
            })
            .collect())
    }
}

/// Steps 2-5 for one destination. Returns `None` when the destination is not
/// due, otherwise the messages to send (possibly none).
fn evaluate_destination(
    tracker: &mut ThrottleTracker,
    list: &MonitoredList,
    destination: &str,
    settings: &DestinationSettings,
    cards: &[(Card, ResolvedFields)],
    now: DateTime<Utc>,
) -> Option<Vec<String>> {
    let key = ThrottleKey::new(&list.name, destination);
    if !tracker.should_evaluate(&key, settings.interval_minutes, now) {
        return None;
    }
    tracker.mark_evaluated(&key, now);

    let matched = CardFilter::apply(cards, &settings.criteria);
    let ctx = SummaryContext {
        list: &list.name,
        url: &list.url,
        count: matched.len(),
    };

    let messages = if matched.is_empty() {
        if tracker.transitioned_to_empty(&key, 0) {
            info!(list = %list.name, destination = %destination, "All clear");
            let template = settings
                .all_clear_template
                .as_deref()
                .unwrap_or(DEFAULT_ALL_CLEAR_TEMPLATE);
            vec![MessageRenderer::render_summary(template, &ctx)]
        } else {
            debug!(list = %list.name, destination = %destination, "No matching cards");
            Vec::new()
        }
    } else if settings.verbose {
        let template = settings.template.as_deref().unwrap_or(DEFAULT_CARD_TEMPLATE);
        matched
            .iter()
            .map(|(card, fields)| {
                format!(
                    "{}{}",
                    settings.alert_message,
                    MessageRenderer::render(template, card, fields)
                )
            })
            .collect()
    } else {
        let template = settings
            .summary_template
            .as_deref()
            .unwrap_or(DEFAULT_SUMMARY_TEMPLATE);
        vec![format!(
            "{}{}",
            settings.alert_message,
            MessageRenderer::render_summary(template, &ctx)
        )]
    };

    tracker.record_result_count(&key, matched.len());
    debug!(
        list = %list.name,
        destination = %destination,
        count = matched.len(),
        messages = messages.len(),
        "Destination evaluated"
    );
    Some(messages)
}
