//! Per-day JSONL result log with upsert semantics
//!
//! One file per calendar day (`results_YYYY-MM-DD.jsonl`), one Observation
//! per line. Every entity task writes into the same day file, so all
//! mutations run a whole-file read-modify-write under a single shared mutex;
//! interleaving that cycle across tasks would lose rows.
//!
//! Upsert contract: a concrete YES/NO always overwrites, an UNKNOWN over an
//! existing concrete outcome is a no-op, and a key is never duplicated.

use super::{Observation, Outcome, StoreError};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle to the per-day results log
///
/// Cheap to clone; every clone serializes against the same lock.
#[derive(Clone)]
pub struct ResultStore {
    dir: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl ResultStore {
    /// Open (creating the directory if needed) a results store rooted at
    /// `<data_dir>/results`
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = data_dir.as_ref().join("results");
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Arc::new(Mutex::new(())),
        })
    }

    fn day_path(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("results_{}.jsonl", day.format("%Y-%m-%d")))
    }

    /// Insert or upgrade the observation for (day, entity, minute)
    pub async fn upsert(
        &self,
        day: NaiveDate,
        entity: &str,
        minute_of_day: u32,
        outcome: Outcome,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;

        let path = self.day_path(day);
        let mut rows = read_rows(&path)?;

        match rows
            .iter_mut()
            .find(|r| r.entity == entity && r.minute_of_day == minute_of_day)
        {
            Some(existing) => {
                if existing.outcome.is_terminal() && !outcome.is_terminal() {
                    // Never downgrade a resolved slot back to pending
                    return Ok(());
                }
                existing.outcome = outcome;
            }
            None => rows.push(Observation {
                day,
                entity: entity.to_string(),
                minute_of_day,
                outcome,
            }),
        }

        write_rows(&path, &rows)?;
        log::debug!(
            "💾 [{}] stored {} @ {} ({} rows in {})",
            entity,
            outcome.as_str(),
            crate::clock::format_minutes(minute_of_day),
            rows.len(),
            path.display()
        );
        Ok(())
    }

    /// True when a terminal YES/NO is already stored for the key
    ///
    /// Pending UNKNOWN rows report false so the collector revisits them.
    pub async fn has(
        &self,
        day: NaiveDate,
        entity: &str,
        minute_of_day: u32,
    ) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let rows = read_rows(&self.day_path(day))?;
        Ok(rows.iter().any(|r| {
            r.entity == entity && r.minute_of_day == minute_of_day && r.outcome.is_terminal()
        }))
    }

    /// All observations recorded for a day, in file order
    pub async fn all_for(&self, day: NaiveDate) -> Result<Vec<Observation>, StoreError> {
        let _guard = self.lock.lock().await;
        read_rows(&self.day_path(day))
    }
}

/// Read a day file, skipping lines that fail to parse
fn read_rows(path: &Path) -> Result<Vec<Observation>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match Observation::from_jsonl(line) {
            Ok(obs) => rows.push(obs),
            Err(e) => {
                log::warn!(
                    "⚠️  Skipping malformed row {} in {}: {}",
                    idx + 1,
                    path.display(),
                    e
                );
            }
        }
    }
    Ok(rows)
}

fn write_rows(path: &Path, rows: &[Observation]) -> Result<(), StoreError> {
    let mut buf = String::new();
    for row in rows {
        buf.push_str(&serde_json::to_string(row)?);
        buf.push('\n');
    }
    fs::write(path, buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;

    fn test_day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 20).unwrap()
    }

    fn make_store() -> (tempfile::TempDir, ResultStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        // Scenario: repeating the same concrete write must leave one row
        let (_dir, store) = make_store();
        let day = test_day();

        store.upsert(day, "Premier", 1205, Outcome::Yes).await.unwrap();
        store.upsert(day, "Premier", 1205, Outcome::Yes).await.unwrap();
        store.upsert(day, "Premier", 1205, Outcome::Yes).await.unwrap();

        let rows = store.all_for(day).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome, Outcome::Yes);
    }

    #[tokio::test]
    async fn test_unknown_never_downgrades() {
        // Scenario: a pending re-scrape must not clobber a resolved slot
        let (_dir, store) = make_store();
        let day = test_day();

        store.upsert(day, "Premier", 600, Outcome::No).await.unwrap();
        store.upsert(day, "Premier", 600, Outcome::Unknown).await.unwrap();

        let rows = store.all_for(day).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome, Outcome::No);
    }

    #[tokio::test]
    async fn test_concrete_upgrades_pending() {
        // Scenario: a pending row is upgraded in place, not duplicated
        let (_dir, store) = make_store();
        let day = test_day();

        store.upsert(day, "Premier", 600, Outcome::Unknown).await.unwrap();
        assert!(!store.has(day, "Premier", 600).await.unwrap());

        store.upsert(day, "Premier", 600, Outcome::Yes).await.unwrap();

        let rows = store.all_for(day).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome, Outcome::Yes);
        assert!(store.has(day, "Premier", 600).await.unwrap());
    }

    #[tokio::test]
    async fn test_concrete_overwrites_concrete() {
        let (_dir, store) = make_store();
        let day = test_day();

        store.upsert(day, "Premier", 600, Outcome::Yes).await.unwrap();
        store.upsert(day, "Premier", 600, Outcome::No).await.unwrap();

        let rows = store.all_for(day).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome, Outcome::No);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (_dir, store) = make_store();
        let day = test_day();

        store.upsert(day, "Premier", 600, Outcome::Yes).await.unwrap();
        store.upsert(day, "Premier", 603, Outcome::No).await.unwrap();
        store.upsert(day, "Euro", 600, Outcome::No).await.unwrap();

        assert_eq!(store.all_for(day).await.unwrap().len(), 3);
        assert!(store.has(day, "Premier", 600).await.unwrap());
        assert!(!store.has(day, "Euro", 603).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_rows_are_skipped() {
        // Scenario: a corrupt line in the day file must not poison reads
        let (_dir, store) = make_store();
        let day = test_day();

        store.upsert(day, "Premier", 600, Outcome::Yes).await.unwrap();

        let path = store.day_path(day);
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json at all").unwrap();
        writeln!(
            file,
            r#"{{"day":"2026-08-20","entity":"Euro","minute_of_day":605,"outcome":"NO"}}"#
        )
        .unwrap();

        let rows = store.all_for(day).await.unwrap();
        assert_eq!(rows.len(), 2);

        // A write after the corruption drops the bad line but keeps the rest
        store.upsert(day, "Premier", 610, Outcome::No).await.unwrap();
        let rows = store.all_for(day).await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn test_days_are_separate_files() {
        let (_dir, store) = make_store();
        let day1 = test_day();
        let day2 = NaiveDate::from_ymd_opt(2026, 8, 21).unwrap();

        store.upsert(day1, "Premier", 600, Outcome::Yes).await.unwrap();
        store.upsert(day2, "Premier", 600, Outcome::No).await.unwrap();

        assert_eq!(store.all_for(day1).await.unwrap().len(), 1);
        assert_eq!(store.all_for(day2).await.unwrap().len(), 1);
        assert_eq!(store.all_for(day1).await.unwrap()[0].outcome, Outcome::Yes);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_do_not_lose_rows() {
        // Scenario: many tasks hammering the same day file through clones
        let (_dir, store) = make_store();
        let day = test_day();

        let mut handles = Vec::new();
        for i in 0..20u32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.upsert(day, "Premier", 600 + i, Outcome::Yes).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.all_for(day).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_missing_day_reads_empty() {
        let (_dir, store) = make_store();
        assert!(store.all_for(test_day()).await.unwrap().is_empty());
        assert!(!store.has(test_day(), "Premier", 0).await.unwrap());
    }
}
