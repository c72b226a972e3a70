// =============================================================================
// TradeJournal — persistence of historical trades
// =============================================================================
//
// Out of scope as a feature (§1 of SPEC_FULL.md names it an external
// collaborator), but the core still needs something to hand closed positions
// to during tests and local runs, so a minimal idempotent file-backed
// implementation lives here alongside the trait.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{error, warn};
use uuid::Uuid;

use crate::outcome::OutcomeRecord;

#[async_trait]
pub trait TradeJournal: Send + Sync {
    /// Must be idempotent on retry by `position_id`: appending the same
    /// record twice yields one logical record in the journal.
    async fn append(&self, record: OutcomeRecord);
}

/// Append-only JSON-Lines journal. Idempotency is tracked in-memory via the
/// set of `position_id`s already written, seeded by scanning the existing
/// file at construction time.
pub struct FileTradeJournal {
    path: PathBuf,
    seen: Mutex<HashSet<Uuid>>,
}

impl FileTradeJournal {
    pub fn new(path: PathBuf) -> Self {
        let seen = Self::load_seen(&path);
        Self {
            path,
            seen: Mutex::new(seen),
        }
    }

    fn load_seen(path: &PathBuf) -> HashSet<Uuid> {
        let mut seen = HashSet::new();
        let Ok(contents) = std::fs::read_to_string(path) else {
            return seen;
        };
        for line in contents.lines() {
            if let Ok(record) = serde_json::from_str::<OutcomeRecord>(line) {
                seen.insert(record.position_id);
            }
        }
        seen
    }
}

#[async_trait]
impl TradeJournal for FileTradeJournal {
    async fn append(&self, record: OutcomeRecord) {
        {
            let mut seen = self.seen.lock();
            if !seen.insert(record.position_id) {
                warn!(position_id = %record.position_id, "duplicate journal append ignored");
                return;
            }
        }

        let line = match serde_json::to_string(&record) {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "failed to serialize outcome record");
                return;
            }
        };

        let path = self.path.clone();
        let write_result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            writeln!(file, "{line}")
        })
        .await;

        if let Err(e) = write_result {
            error!(error = %e, "journal write task panicked");
        } else if let Ok(Err(e)) = write_result {
            error!(error = %e, "failed to append to trade journal");
        }
    }
}

/// In-memory journal used in tests and as the default when no on-disk journal
/// is configured.
#[derive(Default)]
pub struct InMemoryTradeJournal {
    records: Mutex<Vec<OutcomeRecord>>,
    seen: Mutex<HashSet<Uuid>>,
}

#[async_trait]
impl TradeJournal for InMemoryTradeJournal {
    async fn append(&self, record: OutcomeRecord) {
        if !self.seen.lock().insert(record.position_id) {
            return;
        }
        self.records.lock().push(record);
    }
}

impl InMemoryTradeJournal {
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::ExitReason;

    fn sample_record(id: Uuid) -> OutcomeRecord {
        OutcomeRecord {
            position_id: id,
            cluster_id: "momentum_trend".into(),
            readings: Vec::new(),
            entry_price: 1.0,
            exit_price: 1.1,
            pnl_base: 0.1,
            roi: 0.1,
            hold_duration_secs: 60.0,
            exit_reason: ExitReason::Target,
            slippage_in: 0.0,
            slippage_out: 0.0,
        }
    }

    #[tokio::test]
    async fn in_memory_append_is_idempotent_by_position_id() {
        let journal = InMemoryTradeJournal::default();
        let id = Uuid::new_v4();
        journal.append(sample_record(id)).await;
        journal.append(sample_record(id)).await;
        assert_eq!(journal.len(), 1);
    }
}
