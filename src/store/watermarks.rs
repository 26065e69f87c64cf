//! Per-day watermark cursors, one JSON map per calendar day
//!
//! `watermarks_YYYY-MM-DD.json` maps entity name → `"HH:MM"`, the newest
//! minute that entity has resolved (or attempted) on that day. The store
//! itself enforces no ordering: monotonicity is the collector's job, and a
//! manual override through `set_all` may legitimately move cursors backward.
//!
//! The mutex below only serializes tasks inside this process. An external
//! writer editing the day file between our read and write (a control plane
//! in another process, an operator with an editor) can still lose an update;
//! that race is a known gap left open until the external contract is pinned
//! down.

use super::StoreError;
use crate::clock;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle to the per-day watermark maps
#[derive(Clone)]
pub struct WatermarkStore {
    dir: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl WatermarkStore {
    /// Open (creating the directory if needed) a watermark store rooted at
    /// `<data_dir>/watermarks`
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = data_dir.as_ref().join("watermarks");
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Arc::new(Mutex::new(())),
        })
    }

    fn day_path(&self, day: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("watermarks_{}.json", day.format("%Y-%m-%d")))
    }

    /// Last recorded minute-of-day for (day, entity), if any
    pub async fn load(&self, day: NaiveDate, entity: &str) -> Result<Option<u32>, StoreError> {
        let _guard = self.lock.lock().await;
        let map = read_map(&self.day_path(day))?;
        Ok(map.get(entity).and_then(|label| {
            let parsed = clock::parse_clock(label);
            if parsed.is_none() {
                log::warn!(
                    "⚠️  [{}] unreadable watermark value {:?} for {}, ignoring",
                    entity,
                    label,
                    day
                );
            }
            parsed
        }))
    }

    /// Record the watermark for (day, entity)
    pub async fn save(
        &self,
        day: NaiveDate,
        entity: &str,
        minute_of_day: u32,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let path = self.day_path(day);
        let mut map = read_map(&path)?;
        map.insert(entity.to_string(), clock::format_minutes(minute_of_day));
        write_map(&path, &map)?;
        log::debug!(
            "⚓ [{}] watermark {} saved for {}",
            entity,
            clock::format_minutes(minute_of_day),
            day
        );
        Ok(())
    }

    /// Manual override: point every given entity at the same minute
    ///
    /// Control-plane hook; replaces whatever the collectors have recorded,
    /// including moving cursors backward to force a re-collect.
    pub async fn set_all(
        &self,
        day: NaiveDate,
        entities: &[String],
        minute_of_day: u32,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let path = self.day_path(day);
        let mut map = read_map(&path)?;
        let label = clock::format_minutes(minute_of_day);
        for entity in entities {
            map.insert(entity.clone(), label.clone());
        }
        write_map(&path, &map)?;
        log::info!(
            "⚓ watermark override: {} entities set to {} for {}",
            entities.len(),
            label,
            day
        );
        Ok(())
    }
}

fn read_map(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let json = fs::read_to_string(path)?;
    match serde_json::from_str(&json) {
        Ok(map) => Ok(map),
        Err(e) => {
            log::warn!(
                "⚠️  Unreadable watermark file {} ({}), starting fresh",
                path.display(),
                e
            );
            Ok(BTreeMap::new())
        }
    }
}

fn write_map(path: &Path, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(map)?;
    fs::write(path, json)?;
    Ok(())
}
