//! Lifecycle handle over the per-entity collector tasks
//!
//! The control plane owns exactly one of these. Start spawns one collector
//! task per configured league; stop signals all of them and waits. Entities
//! are independent: a panicked or failing task never takes a sibling down,
//! and the orchestrator only learns about it at stop time.

use crate::collector_core::{CollectorSettings, EntityCollector, SourceFactory};
use crate::store::{ResultStore, StoreError, WatermarkStore};
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct EntityTask {
    entity: String,
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

enum Lifecycle {
    NotStarted,
    Running(Vec<EntityTask>),
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running(usize),
    Stopped,
}

pub struct Orchestrator {
    entities: Vec<String>,
    settings: CollectorSettings,
    sources: Arc<dyn SourceFactory>,
    results: ResultStore,
    watermarks: WatermarkStore,
    lifecycle: Lifecycle,
}

impl Orchestrator {
    pub fn new(
        entities: Vec<String>,
        settings: CollectorSettings,
        sources: Arc<dyn SourceFactory>,
        results: ResultStore,
        watermarks: WatermarkStore,
    ) -> Self {
        Self {
            entities,
            settings,
            sources,
            results,
            watermarks,
            lifecycle: Lifecycle::NotStarted,
        }
    }

    /// Spawn one collector task per entity
    ///
    /// A no-op while already running. An entity whose source session cannot
    /// be opened is logged and skipped; the rest start normally.
    pub async fn start(&mut self) {
        if matches!(self.lifecycle, Lifecycle::Running(_)) {
            log::warn!("⚠️  Orchestrator already running, start ignored");
            return;
        }

        log::info!("🚀 Starting collectors for {} entities", self.entities.len());
        let mut tasks = Vec::with_capacity(self.entities.len());
        for entity in &self.entities {
            let source = match self.sources.create(entity).await {
                Ok(source) => source,
                Err(err) => {
                    log::error!("❌ [{}] source session failed, entity skipped: {}", entity, err);
                    continue;
                }
            };

            let collector = EntityCollector::new(
                entity.clone(),
                self.settings.clone(),
                source,
                self.results.clone(),
                self.watermarks.clone(),
            );
            let (shutdown, rx) = mpsc::channel(1);
            tasks.push(EntityTask {
                entity: entity.clone(),
                shutdown,
                handle: tokio::spawn(collector.run(rx)),
            });
        }

        log::info!("✅ {} collector tasks running", tasks.len());
        self.lifecycle = Lifecycle::Running(tasks);
    }

    /// Signal every collector and wait for it to finish its iteration
    pub async fn stop(&mut self) {
        let tasks = match std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(tasks) => tasks,
            other => {
                self.lifecycle = other;
                return;
            }
        };

        log::info!("🛑 Stopping {} collector tasks...", tasks.len());
        for task in &tasks {
            // Send may fail if the task already exited; the join below
            // still observes it either way
            let _ = task.shutdown.send(()).await;
        }
        for task in tasks {
            if let Err(err) = task.handle.await {
                log::error!("❌ [{}] collector task join failed: {}", task.entity, err);
            }
        }
        log::info!("✅ All collectors stopped");
    }

    pub fn status(&self) -> RunState {
        match &self.lifecycle {
            Lifecycle::NotStarted => RunState::NotStarted,
            Lifecycle::Running(tasks) => RunState::Running(tasks.len()),
            Lifecycle::Stopped => RunState::Stopped,
        }
    }

    /// Control-plane hook: force every entity's watermark for a day
    ///
    /// Collectors reload the cursor at the top of each pass, so the
    /// override lands within one polling interval.
    pub async fn override_watermarks(
        &self,
        day: NaiveDate,
        minute_of_day: u32,
    ) -> Result<(), StoreError> {
        self.watermarks
            .set_all(day, &self.entities, minute_of_day)
            .await
    }
}
