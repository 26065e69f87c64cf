//! Per-entity collection state machine
//!
//! One collector owns one league and one Source session and drives the
//! phase cycle UNINITIALIZED → CALIBRATING → BACKFILLING → STEADY. The
//! watermark is reloaded from the store at the top of every backfill/steady
//! pass, so a manual override (or a day rollover wiping it) takes effect
//! within one polling interval without restarting the task.
//!
//! Failure discipline: every source interaction error is caught in the run
//! loop, logged with the entity name, and the machine resumes the same
//! phase after a pause. Nothing here is allowed to take down a sibling
//! entity or the orchestrator.

use crate::clock;
use crate::collector_core::error_handler::RecoveryPacer;
use crate::collector_core::source::{Source, SourceError};
use crate::store::{Outcome, ResultStore, StoreError, WatermarkStore};
use chrono::{Local, NaiveDate};
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

mod pacing {
    /// Settle wait after re-navigating a stale view
    pub const VIEW_SETTLE_SECS: u64 = 30;
    /// Pause before resuming the same phase after a caught failure
    pub const FAILURE_PAUSE_SECS: u64 = 5;
    /// Source recovery pacing bounds
    pub const RECOVERY_BASE_SECS: u64 = 2;
    pub const RECOVERY_CEILING_SECS: u64 = 60;
    pub const RECOVERY_ATTEMPTS: u32 = 5;
}

/// Locator builders for the results feed markup
///
/// The only place that knows what the feed's DOM looks like. Each league
/// renders as a section with a slot-time list; a slot row opens its outcome
/// cell when clicked.
pub mod markup {
    use crate::collector_core::source::Locator;

    pub fn league_panel(entity: &str) -> Locator {
        Locator::new(format!("//section[@data-league='{}']", entity))
    }

    pub fn slot_list(entity: &str) -> Locator {
        Locator::new(format!(
            "//section[@data-league='{}']//*[@class='slot-times']",
            entity
        ))
    }

    pub fn slot_row(entity: &str, label: &str) -> Locator {
        Locator::new(format!(
            "//section[@data-league='{}']//*[@data-slot='{}']",
            entity, label
        ))
    }

    pub fn slot_outcome(entity: &str, label: &str) -> Locator {
        Locator::new(format!(
            "//section[@data-league='{}']//*[@data-slot='{}']//*[@class='outcome']",
            entity, label
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Calibrating,
    Backfilling,
    Steady,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Uninitialized => "UNINITIALIZED",
            Phase::Calibrating => "CALIBRATING",
            Phase::Backfilling => "BACKFILLING",
            Phase::Steady => "STEADY",
        }
    }
}

/// What the run loop should do after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// More work queued, go straight to the next step
    Continue,
    /// Pass complete (or nothing resolvable), sleep the polling interval
    Idle,
    /// View was reloaded, wait for it to settle then rescan immediately
    Settle,
}

#[derive(Debug)]
pub enum CollectError {
    SourceUnavailable(String),
    ResolutionTimeout(String),
    Storage(StoreError),
}

impl From<SourceError> for CollectError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Unavailable(msg) => CollectError::SourceUnavailable(msg),
            SourceError::Timeout(msg) => CollectError::ResolutionTimeout(msg),
        }
    }
}

impl From<StoreError> for CollectError {
    fn from(err: StoreError) -> Self {
        CollectError::Storage(err)
    }
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::SourceUnavailable(msg) => write!(f, "source unavailable: {}", msg),
            CollectError::ResolutionTimeout(msg) => write!(f, "resolution timeout: {}", msg),
            CollectError::Storage(e) => write!(f, "storage write failure: {}", e),
        }
    }
}

impl std::error::Error for CollectError {}

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub feed_url: String,
    pub lookback_hours: u32,
    pub poll_interval: Duration,
    pub delay_min: f64,
    pub delay_max: f64,
}

pub struct EntityCollector {
    entity: String,
    settings: CollectorSettings,
    source: Box<dyn Source>,
    results: ResultStore,
    watermarks: WatermarkStore,
    phase: Phase,
    on_feed: bool,
    recovery: RecoveryPacer,
}

impl EntityCollector {
    pub fn new(
        entity: impl Into<String>,
        settings: CollectorSettings,
        source: Box<dyn Source>,
        results: ResultStore,
        watermarks: WatermarkStore,
    ) -> Self {
        let entity = entity.into();
        Self {
            recovery: RecoveryPacer::new(
                entity.clone(),
                Duration::from_secs(pacing::RECOVERY_BASE_SECS),
                Duration::from_secs(pacing::RECOVERY_CEILING_SECS),
                pacing::RECOVERY_ATTEMPTS,
            ),
            entity,
            settings,
            source,
            results,
            watermarks,
            phase: Phase::Uninitialized,
            on_feed: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Drive the machine until a stop is requested
    ///
    /// The receiver is checked at the top of every iteration and inside
    /// every sleep, so a stop lands within one polling interval and never
    /// interrupts a navigation mid-flight.
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) {
        log::info!("🚀 [{}] collector starting", self.entity);
        loop {
            match shutdown.try_recv() {
                Err(mpsc::error::TryRecvError::Empty) => {}
                _ => break,
            }

            match self.step().await {
                Ok(StepOutcome::Continue) => {
                    self.recovery.reset();
                }
                Ok(StepOutcome::Idle) => {
                    self.recovery.reset();
                    log::debug!(
                        "🔄 [{}] pass complete, sleeping {:?}",
                        self.entity,
                        self.settings.poll_interval
                    );
                    if !self.pause(self.settings.poll_interval, &mut shutdown).await {
                        break;
                    }
                }
                Ok(StepOutcome::Settle) => {
                    self.recovery.reset();
                    if !self
                        .pause(Duration::from_secs(pacing::VIEW_SETTLE_SECS), &mut shutdown)
                        .await
                    {
                        break;
                    }
                }
                Err(err) => {
                    if !self.handle_failure(err, &mut shutdown).await {
                        break;
                    }
                }
            }
        }
        log::info!("🛑 [{}] collector stopped", self.entity);
    }

    /// One state-machine iteration against today's feed
    pub async fn step(&mut self) -> Result<StepOutcome, CollectError> {
        let today = Local::now().date_naive();
        self.step_for_day(today).await
    }

    /// One iteration pinned to an explicit day
    pub async fn step_for_day(&mut self, day: NaiveDate) -> Result<StepOutcome, CollectError> {
        match self.phase {
            Phase::Uninitialized => self.step_uninitialized(day).await,
            Phase::Calibrating => self.step_calibrating(day).await,
            Phase::Backfilling => self.step_backfilling(day).await,
            Phase::Steady => self.step_steady(day).await,
        }
    }

    async fn step_uninitialized(&mut self, day: NaiveDate) -> Result<StepOutcome, CollectError> {
        match self.watermarks.load(day, &self.entity).await? {
            Some(minute) => {
                // A durable anchor is never re-derived
                log::info!(
                    "⚓ [{}] resuming from watermark {}",
                    self.entity,
                    clock::format_minutes(minute)
                );
                self.phase = Phase::Steady;
            }
            None => {
                log::info!("🔍 [{}] no watermark for {}, calibrating", self.entity, day);
                self.phase = Phase::Calibrating;
            }
        }
        Ok(StepOutcome::Continue)
    }

    /// Newest-first scan for the first slot with a concrete outcome
    async fn step_calibrating(&mut self, day: NaiveDate) -> Result<StepOutcome, CollectError> {
        let slots = self.visible_slots().await?;
        log::info!(
            "🔍 [{}] calibrating across {} visible slots",
            self.entity,
            slots.len()
        );

        for &minute in slots.iter().rev() {
            match self.resolve_slot(minute).await? {
                Some(outcome) => {
                    self.results.upsert(day, &self.entity, minute, outcome).await?;
                    self.watermarks.save(day, &self.entity, minute).await?;
                    log::info!(
                        "⚓ [{}] calibrated at {} ({})",
                        self.entity,
                        clock::format_minutes(minute),
                        outcome.as_str()
                    );
                    self.phase = Phase::Backfilling;
                    return Ok(StepOutcome::Continue);
                }
                // The newest slots are usually still open
                None => continue,
            }
        }

        log::info!("⏳ [{}] nothing resolved yet, retrying next poll", self.entity);
        Ok(StepOutcome::Idle)
    }

    /// One-shot catch-up over the lookback window below the watermark
    async fn step_backfilling(&mut self, day: NaiveDate) -> Result<StepOutcome, CollectError> {
        let watermark = match self.watermarks.load(day, &self.entity).await? {
            Some(w) => w,
            None => {
                self.phase = Phase::Calibrating;
                return Ok(StepOutcome::Continue);
            }
        };

        let (anchor_hour, _) = clock::from_minutes(watermark);
        let floor = anchor_hour.saturating_sub(self.settings.lookback_hours) * 60;
        log::info!(
            "⏪ [{}] backfilling [{}, {})",
            self.entity,
            clock::format_minutes(floor),
            clock::format_minutes(watermark)
        );

        let slots = self.visible_slots().await?;
        let mut stored = 0usize;
        let mut skipped = 0usize;
        for &minute in &slots {
            if minute < floor || minute >= watermark {
                continue;
            }
            match self.backfill_slot(day, minute).await {
                Ok(true) => stored += 1,
                Ok(false) => skipped += 1,
                Err(err) => {
                    // Partial backfill is acceptable; the slot stays below
                    // the watermark and is not retried.
                    skipped += 1;
                    log::warn!(
                        "⚠️  [{}] backfill slot {} failed: {}",
                        self.entity,
                        clock::format_minutes(minute),
                        err
                    );
                }
            }
        }

        log::info!(
            "✅ [{}] backfill complete: {} stored, {} skipped",
            self.entity,
            stored,
            skipped
        );
        self.phase = Phase::Steady;
        Ok(StepOutcome::Continue)
    }

    async fn backfill_slot(&mut self, day: NaiveDate, minute: u32) -> Result<bool, CollectError> {
        if self.results.has(day, &self.entity, minute).await? {
            return Ok(false);
        }
        match self.resolve_slot(minute).await? {
            Some(outcome) => {
                self.results.upsert(day, &self.entity, minute, outcome).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// One steady pass: resolve everything at or past the watermark
    async fn step_steady(&mut self, day: NaiveDate) -> Result<StepOutcome, CollectError> {
        let mut watermark = match self.watermarks.load(day, &self.entity).await? {
            Some(w) => w,
            None => {
                // The date rolled over (or an operator cleared the cursor)
                log::info!("📅 [{}] no watermark for {}, recalibrating", self.entity, day);
                self.phase = Phase::Calibrating;
                return Ok(StepOutcome::Continue);
            }
        };

        let slots = self.visible_slots().await?;
        let due: Vec<u32> = slots.into_iter().filter(|&m| m >= watermark).collect();

        let mut resolved = 0usize;
        for &minute in &due {
            if self.results.has(day, &self.entity, minute).await? {
                // Stored on a previous run; advance the cursor without
                // touching the source again
                if minute > watermark {
                    self.watermarks.save(day, &self.entity, minute).await?;
                    watermark = minute;
                }
                continue;
            }

            match self.resolve_slot(minute).await? {
                Some(outcome) => {
                    self.results.upsert(day, &self.entity, minute, outcome).await?;
                    if minute > watermark {
                        self.watermarks.save(day, &self.entity, minute).await?;
                        watermark = minute;
                    }
                    resolved += 1;
                    log::info!(
                        "✅ [{}] {} resolved {}",
                        self.entity,
                        clock::format_minutes(minute),
                        outcome.as_str()
                    );
                }
                None => {
                    // Either the slot is genuinely still open or the view
                    // stopped updating underneath us. Reload and rescan;
                    // the cursor stays put so nothing gets skipped.
                    log::warn!(
                        "🔄 [{}] {} gave no usable result, reloading feed",
                        self.entity,
                        clock::format_minutes(minute)
                    );
                    self.source.navigate(&self.settings.feed_url).await?;
                    self.on_feed = true;
                    return Ok(StepOutcome::Settle);
                }
            }
        }

        if resolved > 0 {
            log::info!("📊 [{}] pass stored {} new outcomes", self.entity, resolved);
        }
        Ok(StepOutcome::Idle)
    }

    /// Ascending, de-duplicated minute labels currently visible for the league
    async fn visible_slots(&mut self) -> Result<Vec<u32>, CollectError> {
        self.ensure_feed().await?;

        let panel = markup::league_panel(&self.entity);
        if !self.source.is_visible(&panel).await? {
            // Collapsed sections expand when their header is clicked
            let headers = self.source.locate_by_text(&self.entity, true).await?;
            let header = headers.into_iter().next().ok_or_else(|| {
                SourceError::Unavailable(format!("league '{}' not on feed", self.entity))
            })?;
            self.jitter().await;
            self.source.click(&header).await?;
        }

        let text = self.source.read_text(&markup::slot_list(&self.entity)).await?;
        let mut slots: Vec<u32> = text
            .split_whitespace()
            .filter_map(clock::parse_clock)
            .collect();
        slots.sort_unstable();
        slots.dedup();
        Ok(slots)
    }

    /// Open a slot row and read its outcome cell
    ///
    /// Ok(None) means the slot exists but carries no terminal outcome yet.
    async fn resolve_slot(&mut self, minute: u32) -> Result<Option<Outcome>, CollectError> {
        let label = clock::format_minutes(minute);
        let row = markup::slot_row(&self.entity, &label);
        if !self.source.is_visible(&row).await? {
            return Ok(None);
        }

        self.jitter().await;
        self.source.click(&row).await?;
        self.jitter().await;
        let text = self
            .source
            .read_text(&markup::slot_outcome(&self.entity, &label))
            .await?;
        Ok(parse_outcome(&text))
    }

    async fn ensure_feed(&mut self) -> Result<(), CollectError> {
        if !self.on_feed {
            log::info!("🧭 [{}] navigating to feed", self.entity);
            self.source.navigate(&self.settings.feed_url).await?;
            self.on_feed = true;
        }
        Ok(())
    }

    /// Randomized pause between interactions so clicks do not land in
    /// lockstep across entities
    async fn jitter(&self) {
        let (lo, hi) = (self.settings.delay_min, self.settings.delay_max);
        if hi <= 0.0 {
            return;
        }
        let secs = rand::thread_rng().gen_range(lo..=hi);
        sleep(Duration::from_secs_f64(secs)).await;
    }

    /// Sleep that a stop request can cut short; false means stop
    async fn pause(&self, duration: Duration, shutdown: &mut mpsc::Receiver<()>) -> bool {
        tokio::select! {
            _ = sleep(duration) => true,
            _ = shutdown.recv() => false,
        }
    }

    /// Absorb a step failure and decide how to resume; false means stop
    async fn handle_failure(
        &mut self,
        err: CollectError,
        shutdown: &mut mpsc::Receiver<()>,
    ) -> bool {
        log::warn!(
            "⚠️  [{}] {} phase error: {}",
            self.entity,
            self.phase.as_str(),
            err
        );

        match err {
            CollectError::SourceUnavailable(_) => {
                // Force a re-navigation once the recovery pause has elapsed
                self.on_feed = false;
                let slept = tokio::select! {
                    result = self.recovery.wait() => Some(result.is_ok()),
                    _ = shutdown.recv() => None,
                };
                match slept {
                    None => false,
                    Some(true) => true,
                    Some(false) => {
                        log::error!(
                            "❌ [{}] source still unavailable after repeated retries",
                            self.entity
                        );
                        self.recovery.reset();
                        self.pause(self.settings.poll_interval, shutdown).await
                    }
                }
            }
            CollectError::ResolutionTimeout(_) | CollectError::Storage(_) => {
                // Not yet resolved / not yet persisted: the pass retries
                // naturally because nothing advanced
                self.pause(Duration::from_secs(pacing::FAILURE_PAUSE_SECS), shutdown)
                    .await
            }
        }
    }
}

/// Map an outcome cell's text to a terminal outcome
fn parse_outcome(text: &str) -> Option<Outcome> {
    match text.trim().to_ascii_uppercase().as_str() {
        "YES" => Some(Outcome::Yes),
        "NO" => Some(Outcome::No),
        _ => None,
    }
}
