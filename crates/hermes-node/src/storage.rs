//! RocksDB storage backend for settlement history.

use anyhow::Result;
use async_trait::async_trait;
use hermes_core::Identity;
use hermes_settlement::{ExternalError, SettlementHistory, SettlementHistoryEntry};
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use std::path::Path;

const CF_SETTLEMENT_HISTORY: &str = "settlement_history";

/// Append-only settlement history.
///
/// Keys are `<identity>/<entry id>`. Entry ids are UUID v7, so a prefix scan
/// over one identity yields its entries oldest first.
pub struct HistoryStorage {
    db: DB,
}

impl HistoryStorage {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(
            CF_SETTLEMENT_HISTORY,
            Options::default(),
        )];
        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;

        Ok(Self { db })
    }

    fn prefix(identity: &Identity) -> String {
        format!("{}/", identity)
    }

    pub fn put_entry(&self, entry: &SettlementHistoryEntry) -> Result<()> {
        let cf = self
            .db
            .cf_handle(CF_SETTLEMENT_HISTORY)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", CF_SETTLEMENT_HISTORY))?;
        let key = format!("{}{}", Self::prefix(&entry.identity), entry.id);
        let value = serde_json::to_vec(entry)?;
        self.db.put_cf(&cf, key.as_bytes(), value)?;
        Ok(())
    }

    pub fn entries(&self, identity: &Identity) -> Result<Vec<SettlementHistoryEntry>> {
        let cf = self
            .db
            .cf_handle(CF_SETTLEMENT_HISTORY)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", CF_SETTLEMENT_HISTORY))?;
        let prefix = Self::prefix(identity);

        let mut entries = Vec::new();
        for item in self.db.prefix_iterator_cf(&cf, prefix.as_bytes()) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl SettlementHistory for HistoryStorage {
    async fn store(&self, entry: &SettlementHistoryEntry) -> Result<(), ExternalError> {
        self.put_entry(entry)
            .map_err(|e| ExternalError::Unavailable(e.to_string()))
    }

    async fn list(&self, identity: &Identity) -> Result<Vec<SettlementHistoryEntry>, ExternalError> {
        self.entries(identity)
            .map_err(|e| ExternalError::Unavailable(e.to_string()))
    }
}
