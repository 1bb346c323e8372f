use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use serde_json::{json, Value};

use staylock::analytics::MemoryAnalytics;
use staylock::calendar::fetch::FeedSource;
use staylock::notify::MemorySink;
use staylock::procedures::{self, CheckinPhase, ModeActivator};
use staylock::store::flags;
use staylock::utils::retry::VerifyRetryConfig;
use staylock::{
    CalendarFormat, DeviceLock, FlagStore, LockEngine, MemoryStore, Notifier, Scheduler, Services,
    Settings,
};

struct FakeLock {
    id: String,
    table: Mutex<BTreeMap<u32, (String, String)>>,
}

impl FakeLock {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            table: Mutex::new(BTreeMap::new()),
        }
    }

    fn seed(&self, slot: u32, label: &str, code: &str) {
        self.table
            .lock()
            .unwrap()
            .insert(slot, (label.to_string(), code.to_string()));
    }

    fn codes(&self) -> Vec<String> {
        self.table
            .lock()
            .unwrap()
            .values()
            .map(|(_, code)| code.clone())
            .collect()
    }

    fn labels(&self) -> Vec<String> {
        self.table
            .lock()
            .unwrap()
            .values()
            .map(|(label, _)| label.clone())
            .collect()
    }
}

impl DeviceLock for FakeLock {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_code(&self, slot: u32, code: &str, label: &str) -> Result<()> {
        self.table
            .lock()
            .unwrap()
            .insert(slot, (label.to_string(), code.to_string()));
        Ok(())
    }

    fn delete_code(&self, slot: u32) -> Result<()> {
        self.table.lock().unwrap().remove(&slot);
        Ok(())
    }

    fn current_codes(&self) -> Result<Value> {
        let mut doc = json!({});
        for (slot, (label, code)) in self.table.lock().unwrap().iter() {
            doc[slot.to_string()] = json!({"label": label, "code": code});
        }
        Ok(doc)
    }

    fn current_max_slots(&self) -> Option<u32> {
        Some(10)
    }
}

struct FakeFeed {
    body: Result<String, String>,
}

#[async_trait]
impl FeedSource for FakeFeed {
    async fn fetch_raw(&self, _url: &str) -> Result<String> {
        self.body.clone().map_err(|e| anyhow::anyhow!(e))
    }
}

#[derive(Default)]
struct RecordingModes {
    activated: Mutex<Vec<String>>,
}

impl ModeActivator for RecordingModes {
    fn activate(&self, mode: &str) -> Result<()> {
        self.activated.lock().unwrap().push(mode.to_string());
        Ok(())
    }
}

struct Harness {
    services: Arc<Services>,
    analytics: Arc<MemoryAnalytics>,
    sink: Arc<MemorySink>,
    store: Arc<MemoryStore>,
    locks: Vec<Arc<FakeLock>>,
    modes: Arc<RecordingModes>,
}

fn harness(settings: Settings, feed_body: Result<String, String>) -> Harness {
    let analytics = Arc::new(MemoryAnalytics::default());
    let sink = Arc::new(MemorySink::default());
    let store = Arc::new(MemoryStore::default());
    let modes = Arc::new(RecordingModes::default());
    let locks = vec![
        Arc::new(FakeLock::new("front-door")),
        Arc::new(FakeLock::new("back-door")),
    ];

    let engine = LockEngine::new(analytics.clone()).with_retry(VerifyRetryConfig {
        max_attempts: 3,
        settle_delay: Duration::from_millis(2),
    });

    let services = Arc::new(Services {
        settings,
        feed: Arc::new(FakeFeed { body: feed_body }),
        locks: locks
            .iter()
            .map(|lock| lock.clone() as Arc<dyn DeviceLock>)
            .collect(),
        modes: modes.clone(),
        notifier: Notifier::new().with_sink(sink.clone()),
        analytics: analytics.clone(),
        engine,
        snapshots: store.clone(),
        flags: store.clone(),
    });

    Harness {
        services,
        analytics,
        sink,
        store,
        locks,
        modes,
    }
}

fn test_settings() -> Settings {
    Settings {
        calendar_url: "https://feeds.example.com/rental.ics".to_string(),
        format: CalendarFormat::OwnerRez,
        checkin_mode: Some("guest".to_string()),
        checkout_mode: Some("vacant".to_string()),
        ..Settings::default()
    }
}

fn today() -> String {
    Local::now().format("%Y%m%d").to_string()
}

fn booking_block(start: &str, end: &str, code: &str, name: &str) -> String {
    format!(
        "BEGIN:VEVENT\r\nSTATUS:CONFIRMED\r\nDTSTART:{start}\r\nDTEND:{end}\r\n\
DESCRIPTION:DoorCode: {code} FirstName: {name}\r\nEND:VEVENT\r\n"
    )
}

fn feed_with(blocks: &[String]) -> String {
    format!("BEGIN:VCALENDAR\r\n{}END:VCALENDAR\r\n", blocks.concat())
}

fn arrival_feed(codes_and_names: &[(&str, &str)]) -> String {
    let today = today();
    let blocks: Vec<String> = codes_and_names
        .iter()
        .map(|(code, name)| {
            booking_block(
                &format!("{today}T160000"),
                "20990101T110000",
                code,
                name,
            )
        })
        .collect();
    feed_with(&blocks)
}

fn departure_feed() -> String {
    let today = today();
    feed_with(&[booking_block(
        "20200101T160000",
        &format!("{today}T110000"),
        "1111",
        "Jordan",
    )])
}

#[tokio::test]
async fn test_checkin_provisions_every_booking_on_every_lock() {
    let feed = arrival_feed(&[("1234", "Jordan"), ("5678", "Ana")]);
    let h = harness(test_settings(), Ok(feed));

    procedures::run_checkin(&h.services, CheckinPhase::Main, false).await;

    for lock in &h.locks {
        let codes = lock.codes();
        assert!(codes.contains(&"1234".to_string()), "lock {} missing first code", lock.id());
        assert!(codes.contains(&"5678".to_string()), "lock {} missing second code", lock.id());
        for label in lock.labels() {
            assert!(label.starts_with("Staylock "), "unexpected label {label}");
        }
    }

    assert_eq!(h.modes.activated.lock().unwrap().as_slice(), ["guest"]);
    assert_eq!(h.analytics.find("multi_booking").len(), 1);
    let checkin = h.analytics.find("checkin");
    assert_eq!(checkin.len(), 1);
    assert!(checkin[0].success);
    assert!(h
        .sink
        .messages()
        .iter()
        .any(|m| m.contains("2 bookings")));
}

#[tokio::test]
async fn test_checkin_without_configured_mode_provisions_nothing() {
    let feed = arrival_feed(&[("1234", "Jordan")]);
    let settings = Settings {
        checkin_mode: None,
        ..test_settings()
    };
    let h = harness(settings, Ok(feed));

    procedures::run_checkin(&h.services, CheckinPhase::Main, false).await;

    for lock in &h.locks {
        assert!(lock.codes().is_empty());
    }
    let checkin = h.analytics.find("checkin");
    assert_eq!(checkin.len(), 1);
    assert!(!checkin[0].success);
}

#[tokio::test]
async fn test_prep_phase_provisions_and_main_does_not_duplicate() {
    let feed = arrival_feed(&[("1234", "Jordan")]);
    let settings = Settings {
        prep_lead_minutes: Some(60),
        prep_provisions_locks: true,
        ..test_settings()
    };
    let h = harness(settings, Ok(feed));

    procedures::run_checkin(&h.services, CheckinPhase::Prep, false).await;
    for lock in &h.locks {
        assert_eq!(lock.codes(), vec!["1234".to_string()]);
    }
    assert_eq!(h.analytics.find("program").len(), 2, "one program per lock");

    procedures::run_checkin(&h.services, CheckinPhase::Main, false).await;
    for lock in &h.locks {
        assert_eq!(lock.codes(), vec!["1234".to_string()], "main must not re-program");
    }
    // Main saw the prep stamp and never touched the locks.
    assert_eq!(h.analytics.find("program").len(), 2, "main issued no program attempts");
}

#[tokio::test]
async fn test_checkout_removes_own_codes_and_keeps_foreign_ones() {
    let h = harness(test_settings(), Ok(departure_feed()));
    for lock in &h.locks {
        lock.seed(1, "Staylock Jordan", "1111");
        lock.seed(3, "Owner", "9999");
    }

    let scheduler = Scheduler::new(h.services.clone());
    procedures::run_checkout(&scheduler).await;

    for lock in &h.locks {
        assert_eq!(lock.codes(), vec!["9999".to_string()], "foreign code must survive");
    }
    assert_eq!(h.modes.activated.lock().unwrap().as_slice(), ["vacant"]);
    let checkout = h.analytics.find("checkout");
    assert_eq!(checkout.len(), 1);
    assert!(checkout[0].success);
}

#[tokio::test]
async fn test_safety_cleanup_aborts_on_same_day_checkin() {
    let feed = arrival_feed(&[("1234", "Jordan")]);
    let h = harness(test_settings(), Ok(feed));
    h.locks[0].seed(1, "Staylock Ana", "5678");

    procedures::run_safety_cleanup(&h.services).await;

    assert_eq!(h.locks[0].codes(), vec!["5678".to_string()], "sweep must not run");
    let events = h.analytics.find("safety_cleanup");
    assert_eq!(events.len(), 1);
    assert!(events[0].detail.contains("skipped"));
}

#[tokio::test]
async fn test_safety_cleanup_sweeps_when_no_checkin_today() {
    // Feed with no event today at all.
    let feed = feed_with(&[booking_block(
        "20990101T160000",
        "20990105T110000",
        "1234",
        "Jordan",
    )]);
    let h = harness(test_settings(), Ok(feed));
    h.locks[0].seed(1, "Staylock Ana", "5678");
    h.locks[1].seed(2, "Owner", "9999");

    procedures::run_safety_cleanup(&h.services).await;

    assert!(h.locks[0].codes().is_empty());
    assert_eq!(h.locks[1].codes(), vec!["9999".to_string()]);
    assert!(h
        .sink
        .messages()
        .iter()
        .any(|m| m.contains("1 lingering door code")));

    // A second run with nothing left removes zero and still succeeds.
    procedures::run_safety_cleanup(&h.services).await;
    let events = h.analytics.find("safety_cleanup");
    assert_eq!(events.len(), 2);
    assert!(events[1].success);
    assert!(events[1].detail.contains("0 code(s)"));
}

#[tokio::test]
async fn test_manual_test_writes_result_flag() {
    let feed = arrival_feed(&[("1234", "Jordan")]);
    let h = harness(test_settings(), Ok(feed));

    assert!(procedures::run_manual_test(&h.services).await);
    assert_eq!(h.store.get_flag(flags::LAST_TEST_RESULT).as_deref(), Some("pass"));

    let failing = harness(test_settings(), Err("connection reset".to_string()));
    assert!(!procedures::run_manual_test(&failing.services).await);
    assert_eq!(
        failing.store.get_flag(flags::LAST_TEST_RESULT).as_deref(),
        Some("fail")
    );
}
