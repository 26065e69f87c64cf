//! Integration tests for the full collection flow
//!
//! A scripted in-memory Source drives a real collector against tempdir
//! stores through the whole phase cycle, then again after a restart to
//! prove the machine resumes from its watermark without re-visiting
//! resolved slots.
//!
//! Key integration points tested:
//! - Calibrate → backfill → steady against one source session
//! - Durable resume across a collector restart
//! - Shared result store under concurrent entity collectors
//! - Stored results feeding the encoder and detector unchanged

use async_trait::async_trait;
use chrono::NaiveDate;
use goalflow::clock;
use goalflow::collector_core::machine::markup;
use goalflow::collector_core::{
    CollectorSettings, EntityCollector, Locator, Phase, Source, SourceError, StepOutcome,
};
use goalflow::signal_core::{detector, encoder, ComparisonField, OffsetState};
use goalflow::store::{Outcome, ResultStore, WatermarkStore};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted feed state shared between the test and its Source handle
#[derive(Default)]
struct FeedState {
    /// minute-of-day → outcome text (None = slot still open)
    slots: BTreeMap<u32, Option<Outcome>>,
    opened: Vec<u32>,
    navigations: usize,
}

#[derive(Clone)]
struct ScriptedFeed {
    entity: String,
    state: Arc<Mutex<FeedState>>,
}

impl ScriptedFeed {
    fn new(entity: &str) -> (Self, Arc<Mutex<FeedState>>) {
        let state = Arc::new(Mutex::new(FeedState::default()));
        (
            Self {
                entity: entity.to_string(),
                state: state.clone(),
            },
            state,
        )
    }

    fn slot_for(&self, locator: &Locator) -> Option<u32> {
        let state = self.state.lock().unwrap();
        state.slots.keys().copied().find(|&minute| {
            let row = markup::slot_row(&self.entity, &clock::format_minutes(minute));
            locator.0.starts_with(&row.0)
        })
    }
}

#[async_trait]
impl Source for ScriptedFeed {
    async fn navigate(&mut self, _url: &str) -> Result<(), SourceError> {
        self.state.lock().unwrap().navigations += 1;
        Ok(())
    }

    async fn is_visible(&mut self, locator: &Locator) -> Result<bool, SourceError> {
        if *locator == markup::league_panel(&self.entity) {
            return Ok(true);
        }
        Ok(self.slot_for(locator).is_some())
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), SourceError> {
        if let Some(minute) = self.slot_for(locator) {
            self.state.lock().unwrap().opened.push(minute);
        }
        Ok(())
    }

    async fn read_text(&mut self, locator: &Locator) -> Result<String, SourceError> {
        if *locator == markup::slot_list(&self.entity) {
            let state = self.state.lock().unwrap();
            let labels: Vec<String> = state
                .slots
                .keys()
                .map(|&minute| clock::format_minutes(minute))
                .collect();
            return Ok(labels.join(" "));
        }
        if let Some(minute) = self.slot_for(locator) {
            let state = self.state.lock().unwrap();
            return Ok(match state.slots.get(&minute) {
                Some(Some(outcome)) => outcome.as_str().to_string(),
                _ => String::new(),
            });
        }
        Ok(String::new())
    }

    async fn locate_by_text(
        &mut self,
        text: &str,
        _exact: bool,
    ) -> Result<Vec<Locator>, SourceError> {
        if text == self.entity {
            Ok(vec![Locator::new(format!("header:{}", text))])
        } else {
            Ok(Vec::new())
        }
    }
}

fn settings() -> CollectorSettings {
    CollectorSettings {
        feed_url: "http://feed.local/results".to_string(),
        lookback_hours: 1,
        poll_interval: Duration::from_millis(20),
        delay_min: 0.0,
        delay_max: 0.0,
    }
}

fn test_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 8, 20).unwrap()
}

fn make_collector(
    entity: &str,
    results: &ResultStore,
    watermarks: &WatermarkStore,
) -> (EntityCollector, Arc<Mutex<FeedState>>) {
    let (feed, state) = ScriptedFeed::new(entity);
    let collector = EntityCollector::new(
        entity,
        settings(),
        Box::new(feed),
        results.clone(),
        watermarks.clone(),
    );
    (collector, state)
}

/// Step the collector until it reports an idle pass (or settles)
async fn run_until_idle(collector: &mut EntityCollector, day: NaiveDate) {
    for _ in 0..20 {
        match collector.step_for_day(day).await.unwrap() {
            StepOutcome::Continue => continue,
            StepOutcome::Idle | StepOutcome::Settle => return,
        }
    }
    panic!("collector never went idle");
}

#[tokio::test]
async fn test_full_cycle_then_restart_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let results = ResultStore::new(dir.path()).unwrap();
    let watermarks = WatermarkStore::new(dir.path()).unwrap();
    let day = test_day();

    // First run: resolved history 19:30..20:03, two open slots after
    let (mut collector, state) = make_collector("Premier", &results, &watermarks);
    {
        let mut s = state.lock().unwrap();
        for minute in [1170, 1173, 1176, 1200, 1203] {
            s.slots.insert(minute, Some(Outcome::Yes));
        }
        s.slots.insert(1206, None);
        s.slots.insert(1209, None);
    }

    run_until_idle(&mut collector, day).await;
    assert_eq!(collector.phase(), Phase::Steady);

    // Calibration anchored at the newest resolved slot, backfill caught up
    // the lookback window below it
    let watermark = watermarks.load(day, "Premier").await.unwrap().unwrap();
    assert!(watermark >= 1203);
    let mut stored: Vec<u32> = results
        .all_for(day)
        .await
        .unwrap()
        .iter()
        .map(|r| r.minute_of_day)
        .collect();
    stored.sort_unstable();
    assert_eq!(stored, vec![1170, 1173, 1176, 1200, 1203]);

    // Restart: a fresh collector over the same stores, with the open slots
    // now resolved
    let (mut restarted, state2) = make_collector("Premier", &results, &watermarks);
    {
        let mut s = state2.lock().unwrap();
        for minute in [1170, 1173, 1176, 1200, 1203, 1206, 1209] {
            s.slots.insert(minute, Some(Outcome::Yes));
        }
        s.slots.insert(1206, Some(Outcome::No));
    }

    run_until_idle(&mut restarted, day).await;

    // Resumed straight into steady and only visited the two new slots
    let opened = state2.lock().unwrap().opened.clone();
    assert!(!opened.contains(&1200), "resolved slot re-visited after restart");
    assert!(!opened.contains(&1203), "anchor slot re-visited after restart");
    assert!(opened.contains(&1206));
    assert!(opened.contains(&1209));

    assert_eq!(watermarks.load(day, "Premier").await.unwrap(), Some(1209));
    assert_eq!(results.all_for(day).await.unwrap().len(), 7);
}

#[tokio::test]
async fn test_two_entities_share_one_day_file() {
    let dir = tempfile::tempdir().unwrap();
    let results = ResultStore::new(dir.path()).unwrap();
    let watermarks = WatermarkStore::new(dir.path()).unwrap();
    let day = test_day();

    let (mut premier, premier_state) = make_collector("Premier", &results, &watermarks);
    let (mut euro, euro_state) = make_collector("Euro", &results, &watermarks);
    for minute in [1200, 1203, 1206] {
        premier_state
            .lock()
            .unwrap()
            .slots
            .insert(minute, Some(Outcome::Yes));
        euro_state
            .lock()
            .unwrap()
            .slots
            .insert(minute, Some(Outcome::No));
    }

    // Run both to steady concurrently; all writes land in the same file
    let p = tokio::spawn(async move {
        run_until_idle(&mut premier, day).await;
        run_until_idle(&mut premier, day).await;
    });
    let e = tokio::spawn(async move {
        run_until_idle(&mut euro, day).await;
        run_until_idle(&mut euro, day).await;
    });
    p.await.unwrap();
    e.await.unwrap();

    let rows = results.all_for(day).await.unwrap();
    assert_eq!(rows.iter().filter(|r| r.entity == "Premier").count(), 3);
    assert_eq!(rows.iter().filter(|r| r.entity == "Euro").count(), 3);

    // Each entity kept its own cursor
    assert_eq!(watermarks.load(day, "Premier").await.unwrap(), Some(1206));
    assert_eq!(watermarks.load(day, "Euro").await.unwrap(), Some(1206));
}

#[tokio::test]
async fn test_collected_results_feed_the_signal_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let results = ResultStore::new(dir.path()).unwrap();
    let watermarks = WatermarkStore::new(dir.path()).unwrap();
    let day = test_day();

    // Hour 18 sits below the 1-hour backfill floor, so those rows arrive
    // from an earlier run of the collector
    for entity in ["Premier", "Euro"] {
        results
            .upsert(day, entity, clock::to_minutes(18, 10), Outcome::Yes)
            .await
            .unwrap();
    }

    // Live feed: YES columns at :10 for hours 19/20, plus agreeing pairs
    // at :13 (Premier) and :17 (Euro)
    let (mut collector, state) = make_collector("Premier", &results, &watermarks);
    {
        let mut s = state.lock().unwrap();
        for hour in 19..=20 {
            s.slots.insert(clock::to_minutes(hour, 10), Some(Outcome::Yes));
            s.slots.insert(clock::to_minutes(hour, 13), Some(Outcome::No));
        }
    }
    run_until_idle(&mut collector, day).await;
    run_until_idle(&mut collector, day).await;

    let (mut euro, euro_state) = make_collector("Euro", &results, &watermarks);
    {
        let mut s = euro_state.lock().unwrap();
        for hour in 19..=20 {
            s.slots.insert(clock::to_minutes(hour, 10), Some(Outcome::Yes));
            s.slots.insert(clock::to_minutes(hour, 17), Some(Outcome::No));
        }
    }
    run_until_idle(&mut euro, day).await;
    run_until_idle(&mut euro, day).await;

    let observations = results.all_for(day).await.unwrap();

    // Encoder: every stored row yields exactly one derived record
    let records = encoder::encode_day(&observations);
    assert_eq!(records.len(), observations.len());
    assert!(records
        .iter()
        .all(|r| r.offsets.iter().all(|s| *s != OffsetState::Mismatch)));

    // Detector: both leagues flag their forward minute; Premier's :13 is
    // accepted first, Euro's :17 survives gap and diversity
    let detection = detector::detect(&observations, ComparisonField::Outcome).unwrap();
    assert_eq!(detection.window, [20, 19, 18]);
    let verdicts: Vec<(&str, u32, bool)> = detection
        .candidates
        .iter()
        .map(|c| (c.entity.as_str(), c.minute, c.eliminated))
        .collect();
    assert_eq!(
        verdicts,
        vec![("Premier", 13, false), ("Euro", 17, false)]
    );
}
