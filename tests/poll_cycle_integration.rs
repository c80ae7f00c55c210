//! Integration tests for the poll cycle.
//!
//! A fake board source and a recording notifier stand in for the Trello API
//! and the chat transport; cycles run against an explicit clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::timeout;

use board_monitor::board::{
    BoardSource, Card, CustomFieldItem, CustomFieldValue, Label, RawFieldDefinition,
    RawFieldOption,
};
use board_monitor::config::{ConfigStore, MemoryConfigStore, Setting, SettingKey, SettingValue};
use board_monitor::engine::{PollEngine, PollScheduler};
use board_monitor::error::{FetchError, NotifyError};
use board_monitor::notify::Notifier;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const LIST: &str = "critical";
const LIST_ID: &str = "list-1";

// ── Fakes ───────────────────────────────────────────────────────────

struct FakeBoard {
    cards: Mutex<HashMap<String, Vec<Card>>>,
    schema: Mutex<Vec<RawFieldDefinition>>,
    failing: AtomicBool,
    schema_failing: AtomicBool,
    card_fetches: AtomicUsize,
    /// Held by a test to stall card fetches.
    gate: tokio::sync::Mutex<()>,
}

impl FakeBoard {
    fn new() -> Self {
        Self {
            cards: Mutex::new(HashMap::new()),
            schema: Mutex::new(rca_schema()),
            failing: AtomicBool::new(false),
            schema_failing: AtomicBool::new(false),
            card_fetches: AtomicUsize::new(0),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    fn set_cards(&self, list_id: &str, cards: Vec<Card>) {
        self.cards.lock().unwrap().insert(list_id.to_string(), cards);
    }

    fn set_schema(&self, schema: Vec<RawFieldDefinition>) {
        *self.schema.lock().unwrap() = schema;
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn set_schema_failing(&self, failing: bool) {
        self.schema_failing.store(failing, Ordering::SeqCst);
    }

    fn card_fetches(&self) -> usize {
        self.card_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BoardSource for FakeBoard {
    async fn fetch_cards(&self, list_id: &str) -> Result<Vec<Card>, FetchError> {
        let _gate = self.gate.lock().await;
        self.card_fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Unreachable {
                list_id: list_id.to_string(),
                reason: "connection refused".into(),
            });
        }
        Ok(self
            .cards
            .lock()
            .unwrap()
            .get(list_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_schema(&self, list_id: &str) -> Result<Vec<RawFieldDefinition>, FetchError> {
        if self.schema_failing.load(Ordering::SeqCst) {
            return Err(FetchError::Status {
                list_id: list_id.to_string(),
                status: 503,
            });
        }
        Ok(self.schema.lock().unwrap().clone())
    }

    async fn board_url(&self, list_id: &str) -> Result<String, FetchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Timeout {
                list_id: list_id.to_string(),
                timeout: Duration::from_secs(20),
            });
        }
        Ok("https://trello.com/b/XyZ".into())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn texts_for(&self, destination: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, text)| text)
            .collect()
    }

    fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, destination: &str, text: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn rca_schema() -> Vec<RawFieldDefinition> {
    vec![RawFieldDefinition {
        id: "f-rca".into(),
        name: "RCA".into(),
        kind: "list".into(),
        options: vec![
            RawFieldOption {
                id: "o-net".into(),
                value: CustomFieldValue {
                    text: Some("Network".into()),
                    ..Default::default()
                },
            },
            RawFieldOption {
                id: "o-db".into(),
                value: CustomFieldValue {
                    text: Some("Database".into()),
                    ..Default::default()
                },
            },
        ],
    }]
}

fn card(id: &str, labels: &[&str], rca_option: Option<&str>) -> Card {
    Card {
        id: id.into(),
        name: format!("Card {id}"),
        url: format!("https://trello.com/c/{id}"),
        labels: labels
            .iter()
            .map(|name| Label {
                id: format!("l-{name}"),
                name: name.to_string(),
                color: None,
            })
            .collect(),
        custom_field_items: rca_option
            .map(|option| CustomFieldItem {
                id_custom_field: "f-rca".into(),
                id_value: Some(option.into()),
                value: None,
            })
            .into_iter()
            .collect(),
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// `n` five-minute intervals after `t0`.
fn tick(n: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::minutes(5 * n)
}

struct Harness {
    board: Arc<FakeBoard>,
    store: Arc<MemoryConfigStore>,
    notifier: Arc<RecordingNotifier>,
    engine: Arc<PollEngine>,
}

impl Harness {
    /// One list, polled every 5 minutes, with `destinations` active.
    async fn new(destinations: &[&str]) -> Self {
        let board = Arc::new(FakeBoard::new());
        let store = Arc::new(MemoryConfigStore::new());
        let notifier = Arc::new(RecordingNotifier::default());

        store.set(SettingKey::list(LIST, Setting::Interval), SettingValue::Number(5));
        store.set(SettingKey::list(LIST, Setting::Active), SettingValue::Bool(true));
        store.set(
            SettingKey::list(LIST, Setting::Destinations),
            SettingValue::TextList(destinations.iter().map(|d| d.to_string()).collect()),
        );

        let engine = Arc::new(PollEngine::new(
            Arc::clone(&board) as Arc<dyn BoardSource>,
            Arc::clone(&store) as Arc<dyn ConfigStore>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
        ));
        engine.register_list(LIST, LIST_ID).await.unwrap();

        Self {
            board,
            store,
            notifier,
            engine,
        }
    }

    fn set(&self, destination: &str, setting: Setting, value: SettingValue) {
        self.store
            .set(SettingKey::destination(LIST, destination, setting), value);
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn verbose_custom_template_per_card() {
    let h = Harness::new(&["#ops"]).await;
    h.set("#ops", Setting::Template, SettingValue::Text("${RCA}".into()));
    h.set("#ops", Setting::AlertMessage, SettingValue::Text("ALERT: ".into()));
    h.board.set_cards(
        LIST_ID,
        vec![
            card("a", &[], Some("o-net")),
            card("b", &[], Some("o-db")),
            card("c", &[], None),
        ],
    );

    let first = h.engine.run_once_at(tick(0)).await;
    assert_eq!(first.destinations_evaluated, 0);
    assert!(h.notifier.sent().is_empty());

    let report = h.engine.run_once_at(tick(1)).await;
    assert_eq!(report.destinations_evaluated, 1);
    assert_eq!(report.notifications_sent, 3);
    assert_eq!(
        h.notifier.texts_for("#ops"),
        vec!["ALERT: Network", "ALERT: Database", "ALERT: Unset"]
    );
}

#[tokio::test]
async fn template_field_outside_schema_is_not_available() {
    let h = Harness::new(&["#ops"]).await;
    h.board.set_schema(vec![]);
    h.set("#ops", Setting::Template, SettingValue::Text("${RCA}".into()));
    h.board.set_cards(LIST_ID, vec![card("a", &[], Some("o-net")), card("b", &[], None)]);

    h.engine.run_once_at(tick(0)).await;
    h.engine.run_once_at(tick(1)).await;
    assert_eq!(h.notifier.texts_for("#ops"), vec!["N/A", "N/A"]);
}

#[tokio::test]
async fn summary_mode_sends_single_message() {
    let h = Harness::new(&["#ops"]).await;
    h.set("#ops", Setting::Verbose, SettingValue::Bool(false));
    h.set("#ops", Setting::AlertMessage, SettingValue::Text("Heads up: ".into()));
    h.board.set_cards(LIST_ID, vec![card("a", &[], None), card("b", &[], None)]);

    h.engine.run_once_at(tick(0)).await;
    h.engine.run_once_at(tick(1)).await;
    assert_eq!(
        h.notifier.texts_for("#ops"),
        vec!["Heads up: 2 card(s) in critical https://trello.com/b/XyZ"]
    );
}

#[tokio::test]
async fn all_clear_fires_once_per_empty_run() {
    let h = Harness::new(&["#ops"]).await;
    h.set("#ops", Setting::Verbose, SettingValue::Bool(false));
    h.board.set_cards(LIST_ID, vec![card("a", &[], None), card("b", &[], None)]);

    h.engine.run_once_at(tick(0)).await;
    h.engine.run_once_at(tick(1)).await;
    assert_eq!(h.notifier.sent().len(), 1);
    h.notifier.clear();

    h.board.set_cards(LIST_ID, vec![]);
    h.engine.run_once_at(tick(2)).await;
    let texts = h.notifier.texts_for("#ops");
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("ALL CLEAR"));
    h.notifier.clear();

    h.engine.run_once_at(tick(3)).await;
    h.engine.run_once_at(tick(4)).await;
    assert!(h.notifier.sent().is_empty());

    h.board.set_cards(LIST_ID, vec![card("c", &[], None)]);
    h.engine.run_once_at(tick(5)).await;
    h.board.set_cards(LIST_ID, vec![]);
    h.engine.run_once_at(tick(6)).await;
    let texts = h.notifier.texts_for("#ops");
    assert_eq!(texts.len(), 2);
    assert!(texts[1].starts_with("ALL CLEAR"));
}

#[tokio::test]
async fn not_due_before_interval() {
    let h = Harness::new(&["#ops"]).await;
    h.board.set_cards(LIST_ID, vec![card("a", &[], None)]);

    h.engine.run_once_at(tick(0)).await;
    h.engine.run_once_at(tick(1)).await;
    assert_eq!(h.notifier.sent().len(), 1);
    let fetches = h.board.card_fetches();

    let report = h
        .engine
        .run_once_at(tick(1) + chrono::Duration::minutes(4))
        .await;
    assert_eq!(report.destinations_evaluated, 0);
    assert_eq!(h.notifier.sent().len(), 1);
    // Nothing due, so nothing fetched.
    assert_eq!(h.board.card_fetches(), fetches);

    let state = h.engine.throttle_state(LIST, "#ops").await.unwrap();
    assert_eq!(state.last_evaluated, tick(1));
}

#[tokio::test]
async fn cards_fetched_once_for_all_destinations() {
    let h = Harness::new(&["#ops", "#dev", "#mgmt"]).await;
    h.board.set_cards(LIST_ID, vec![card("a", &[], None)]);

    h.engine.run_once_at(tick(0)).await;
    let before = h.board.card_fetches();
    let report = h.engine.run_once_at(tick(1)).await;

    assert_eq!(h.board.card_fetches(), before + 1);
    assert_eq!(report.lists_polled, 1);
    assert_eq!(report.destinations_evaluated, 3);
    assert_eq!(h.notifier.sent().len(), 3);
}

#[tokio::test]
async fn destinations_filter_independently() {
    let h = Harness::new(&["#net", "#sev1"]).await;
    h.set(
        "#net",
        Setting::FieldFilters,
        SettingValue::TextList(vec!["RCA:Network".into()]),
    );
    h.set("#sev1", Setting::Labels, SettingValue::TextList(vec!["sev1".into()]));
    h.board.set_cards(
        LIST_ID,
        vec![
            card("a", &["Customer-SEV1"], Some("o-db")),
            card("b", &["sev2"], Some("o-net")),
            card("c", &[], None),
        ],
    );

    h.engine.run_once_at(tick(0)).await;
    h.engine.run_once_at(tick(1)).await;

    assert_eq!(
        h.notifier.texts_for("#net"),
        vec!["Card b https://trello.com/c/b"]
    );
    assert_eq!(
        h.notifier.texts_for("#sev1"),
        vec!["Card a https://trello.com/c/a"]
    );
}

#[tokio::test]
async fn fetch_failure_abandons_list_for_every_destination() {
    let h = Harness::new(&["#ops", "#dev"]).await;
    h.board.set_cards(LIST_ID, vec![card("a", &[], None)]);

    h.engine.run_once_at(tick(0)).await;

    h.board.set_failing(true);
    let report = h.engine.run_once_at(tick(1)).await;
    assert_eq!(report.lists_failed, 1);
    assert_eq!(report.destinations_evaluated, 0);
    assert!(h.notifier.sent().is_empty());
    for dest in ["#ops", "#dev"] {
        let state = h.engine.throttle_state(LIST, dest).await.unwrap();
        assert_eq!(state.last_evaluated, tick(0));
        assert_eq!(state.last_count, None);
    }

    h.board.set_failing(false);
    let report = h.engine.run_once_at(tick(1) + chrono::Duration::seconds(30)).await;
    assert_eq!(report.destinations_evaluated, 2);
    assert_eq!(h.notifier.sent().len(), 2);
}

#[tokio::test]
async fn schema_failure_abandons_list_for_every_destination() {
    let h = Harness::new(&["#ops", "#dev"]).await;
    h.board.set_cards(LIST_ID, vec![card("a", &[], Some("o-net"))]);

    h.engine.run_once_at(tick(0)).await;

    h.board.set_schema_failing(true);
    let report = h.engine.run_once_at(tick(1)).await;
    assert_eq!(report.lists_failed, 1);
    assert_eq!(report.lists_polled, 0);
    assert_eq!(report.destinations_evaluated, 0);
    assert!(h.notifier.sent().is_empty());
    for dest in ["#ops", "#dev"] {
        let state = h.engine.throttle_state(LIST, dest).await.unwrap();
        assert_eq!(state.last_evaluated, tick(0));
        assert_eq!(state.last_count, None);
    }

    h.board.set_schema_failing(false);
    let report = h.engine.run_once_at(tick(2)).await;
    assert_eq!(report.destinations_evaluated, 2);
    assert_eq!(h.notifier.sent().len(), 2);
}

#[tokio::test]
async fn failed_fetch_on_first_tick_leaves_pair_unseen() {
    let h = Harness::new(&["#ops"]).await;
    h.board.set_failing(true);
    h.engine.run_once_at(tick(0)).await;
    assert!(h.engine.throttle_state(LIST, "#ops").await.is_none());
}

#[tokio::test]
async fn misconfigured_destination_is_skipped_without_throttling() {
    let h = Harness::new(&["#ops"]).await;
    h.set("#ops", Setting::FieldFilters, SettingValue::TextList(vec!["RCA".into()]));
    h.board.set_cards(LIST_ID, vec![card("a", &[], None)]);

    let report = h.engine.run_once_at(tick(0)).await;
    assert_eq!(report.destinations_misconfigured, 1);
    assert!(h.engine.throttle_state(LIST, "#ops").await.is_none());

    h.set("#ops", Setting::FieldFilters, SettingValue::TextList(vec![]));
    h.engine.run_once_at(tick(1)).await;
    assert!(h.notifier.sent().is_empty());
    h.engine.run_once_at(tick(2)).await;
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn missing_required_setting_is_reported() {
    let board = Arc::new(FakeBoard::new());
    let store = Arc::new(MemoryConfigStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = PollEngine::new(
        Arc::clone(&board) as Arc<dyn BoardSource>,
        Arc::clone(&store) as Arc<dyn ConfigStore>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    );
    engine.register_list(LIST, LIST_ID).await.unwrap();
    store.set(
        SettingKey::list(LIST, Setting::Destinations),
        SettingValue::TextList(vec!["#ops".into()]),
    );
    // Drop the verbose default written at registration.
    store.remove(&SettingKey::list(LIST, Setting::Verbose));

    let report = engine.run_once_at(tick(0)).await;
    assert_eq!(report.destinations_misconfigured, 1);
    assert!(engine.throttle_state(LIST, "#ops").await.is_none());
}

#[tokio::test]
async fn inactive_destination_is_never_evaluated() {
    let h = Harness::new(&["#ops", "#quiet"]).await;
    h.set("#quiet", Setting::Active, SettingValue::Bool(false));
    h.board.set_cards(LIST_ID, vec![card("a", &[], None)]);

    h.engine.run_once_at(tick(0)).await;
    h.engine.run_once_at(tick(1)).await;
    assert!(h.notifier.texts_for("#quiet").is_empty());
    assert!(h.engine.throttle_state(LIST, "#quiet").await.is_none());

    // Activation starts with a silent tick.
    h.set("#quiet", Setting::Active, SettingValue::Bool(true));
    h.engine.run_once_at(tick(2)).await;
    assert!(h.notifier.texts_for("#quiet").is_empty());
    h.engine.run_once_at(tick(3)).await;
    assert_eq!(h.notifier.texts_for("#quiet").len(), 1);
}

#[tokio::test]
async fn reactivated_destination_starts_silent() {
    let h = Harness::new(&["#ops"]).await;
    h.board.set_cards(LIST_ID, vec![card("a", &[], None), card("b", &[], None)]);

    h.engine.run_once_at(tick(0)).await;
    h.engine.run_once_at(tick(1)).await;
    assert_eq!(h.notifier.sent().len(), 2);
    h.notifier.clear();

    h.set("#ops", Setting::Active, SettingValue::Bool(false));
    h.board.set_cards(LIST_ID, vec![]);
    for n in 2..20 {
        h.engine.run_once_at(tick(n)).await;
    }
    assert!(h.engine.throttle_state(LIST, "#ops").await.is_none());

    // No stale all-clear for the change that happened while inactive.
    h.set("#ops", Setting::Active, SettingValue::Bool(true));
    h.engine.run_once_at(tick(20)).await;
    assert!(h.notifier.sent().is_empty());
    h.engine.run_once_at(tick(21)).await;
    assert!(h.notifier.sent().is_empty());

    h.board.set_cards(LIST_ID, vec![card("c", &[], None)]);
    h.engine.run_once_at(tick(22)).await;
    assert_eq!(
        h.notifier.texts_for("#ops"),
        vec!["Card c https://trello.com/c/c"]
    );
}

#[tokio::test]
async fn unsubscribed_destination_is_forgotten() {
    let h = Harness::new(&["#ops", "#dev"]).await;
    h.board.set_cards(LIST_ID, vec![card("a", &[], None)]);

    h.engine.run_once_at(tick(0)).await;
    assert!(h.engine.throttle_state(LIST, "#dev").await.is_some());

    h.store.set(
        SettingKey::list(LIST, Setting::Destinations),
        SettingValue::TextList(vec!["#ops".into()]),
    );
    h.engine.run_once_at(tick(1)).await;
    assert!(h.engine.throttle_state(LIST, "#dev").await.is_none());
    assert!(h.engine.throttle_state(LIST, "#ops").await.is_some());
    assert!(h.notifier.texts_for("#dev").is_empty());
}

#[tokio::test]
async fn reregistration_resets_throttle() {
    let h = Harness::new(&["#ops"]).await;
    h.board.set_cards(LIST_ID, vec![card("a", &[], None)]);

    h.engine.run_once_at(tick(0)).await;
    h.engine.register_list("Critical", LIST_ID).await.unwrap();
    assert!(h.engine.throttle_state(LIST, "#ops").await.is_none());

    h.engine.run_once_at(tick(1)).await;
    assert!(h.notifier.sent().is_empty());
    h.engine.run_once_at(tick(2)).await;
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn registration_records_board_link() {
    let h = Harness::new(&[]).await;
    let lists = h.engine.lists().await;
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].name, LIST);
    assert_eq!(lists[0].url, "https://trello.com/b/XyZ");
    assert_eq!(
        h.store.get(&SettingKey::list(LIST, Setting::ListId)),
        Some(SettingValue::Text(LIST_ID.into()))
    );
    // Pre-existing values survive registration.
    assert_eq!(
        h.store.get(&SettingKey::list(LIST, Setting::Interval)),
        Some(SettingValue::Number(5))
    );
}

#[tokio::test]
async fn registration_keeps_default_link_when_lookup_fails() {
    let board = Arc::new(FakeBoard::new());
    board.set_failing(true);
    let store = Arc::new(MemoryConfigStore::new());
    let engine = PollEngine::new(
        Arc::clone(&board) as Arc<dyn BoardSource>,
        Arc::clone(&store) as Arc<dyn ConfigStore>,
        Arc::new(RecordingNotifier::default()) as Arc<dyn Notifier>,
    );

    let list = engine.register_list("Backlog", "list-2").await.unwrap();
    assert_eq!(list.name, "backlog");
    assert_eq!(list.url, "https://trello.com");
    assert_eq!(
        store.get(&SettingKey::list("backlog", Setting::Interval)),
        Some(SettingValue::Number(10))
    );
    assert_eq!(
        store.get(&SettingKey::list("backlog", Setting::Active)),
        Some(SettingValue::Bool(false))
    );
    assert!(engine.register_list("", "x").await.is_err());
}

#[tokio::test]
async fn overlapping_cycle_is_skipped() {
    let h = Harness::new(&["#ops"]).await;
    let gate = h.board.gate.lock().await;

    let engine = Arc::clone(&h.engine);
    let running = tokio::spawn(async move { engine.run_once_at(tick(0)).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.engine.try_run_once().await.is_none());

    drop(gate);
    let report = timeout(TEST_TIMEOUT, running).await.unwrap().unwrap();
    assert_eq!(report.lists_polled, 1);
}

#[tokio::test]
async fn scheduler_drives_cycles() {
    let h = Harness::new(&["#ops"]).await;
    let scheduler = PollScheduler::new(Arc::clone(&h.engine));

    assert!(scheduler.start(1).await.unwrap());
    timeout(TEST_TIMEOUT, async {
        while h.engine.throttle_state(LIST, "#ops").await.is_none() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("scheduler never polled");

    assert!(scheduler.stop().await);
    assert!(h.board.card_fetches() >= 1);
}

#[tokio::test]
async fn stop_abandons_stalled_cycle() {
    let h = Harness::new(&["#ops"]).await;
    let scheduler = PollScheduler::new(Arc::clone(&h.engine));
    let gate = h.board.gate.lock().await;

    scheduler.start(1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1300)).await;

    // The cycle is stuck in the card fetch; stop must not wait for it.
    assert!(timeout(TEST_TIMEOUT, scheduler.stop()).await.unwrap());
    assert!(h.engine.throttle_state(LIST, "#ops").await.is_none());
    drop(gate);

    // The engine is usable again once the abandoned cycle is gone.
    let report = timeout(TEST_TIMEOUT, h.engine.run_once_at(tick(0))).await.unwrap();
    assert_eq!(report.lists_polled, 1);
}
