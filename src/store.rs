//! Durable local ledger of expense records.
//!
//! The whole ledger is one versioned JSON document under a single storage key.
//! Each mutation loads the document, changes it in memory and writes it back
//! inside one `Storage::update`, so concurrent writers (other threads or other
//! kakeibo processes on the same database) cannot lose each other's changes,
//! and a failed write leaves the previous ledger untouched.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{KakeiboError, Result};
use crate::models::{Category, Record, SyncState, SyncStatus, Tombstone};
use crate::storage::Storage;

pub const LEDGER_KEY: &str = "kakeibo.ledger";
pub const SYNC_STATUS_KEY: &str = "kakeibo.sync_status";
pub const SYNC_LEASE_KEY: &str = "kakeibo.sync_lease";
/// Key the web app kept its bare record array under.
pub const LEGACY_KEY: &str = "smart_kakeibo_cache";
pub const SCHEMA_VERSION: u32 = 1;
/// A lease not renewed within this window is considered abandoned.
const SYNC_LEASE_TTL_MS: i64 = 120_000;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ledger {
    schema_version: u32,
    records: Vec<Record>,
    #[serde(default)]
    tombstones: Vec<Tombstone>,
}

impl Ledger {
    fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            ..Default::default()
        }
    }
}

/// Record shape written before the ledger carried a schema version: a bare
/// array with `userId`/`storeName`/`isSynced` fields and data-URL receipts.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRecord {
    id: String,
    date: String,
    amount: f64,
    category: String,
    user_id: String,
    user_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    store_name: Option<String>,
    #[serde(default)]
    receipt_image: Option<String>,
    created_at: i64,
    #[serde(default)]
    is_synced: Option<bool>,
}

/// Outcome of confirming a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMark {
    /// Pending before, Synced now.
    Confirmed,
    AlreadySynced,
    /// Deleted locally in the meantime.
    Missing,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncLease {
    holder: String,
    expires_at: i64,
}

impl SyncLease {
    fn parse(text: Option<&str>) -> Option<Self> {
        serde_json::from_str(text?).ok()
    }
}

impl LegacyRecord {
    fn upgrade(self) -> Option<Record> {
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").ok()?;
        if self.amount.is_nan() || self.amount < 0.0 || self.amount.fract() != 0.0 {
            return None;
        }
        let receipt_image = self.receipt_image.map(|img| match img.split_once(',') {
            Some((prefix, data)) if prefix.starts_with("data:") => data.to_string(),
            _ => img,
        });
        Some(Record {
            id: self.id,
            date,
            amount: self.amount as u64,
            category: Category::lookup(&self.category).unwrap_or(Category::Other),
            owner_id: self.user_id,
            owner_name: self.user_name,
            description: self.description,
            merchant_name: self.store_name.filter(|s| !s.is_empty()),
            receipt_image,
            created_at: self.created_at,
            sync_state: if self.is_synced.unwrap_or(false) {
                SyncState::Synced
            } else {
                SyncState::Pending
            },
        })
    }
}

fn parse_ledger(text: &str) -> Result<(Ledger, bool)> {
    let raw: serde_json::Value = serde_json::from_str(text)?;
    if raw.is_array() {
        let rows: Vec<serde_json::Value> = serde_json::from_value(raw)?;
        let total = rows.len();
        let records: Vec<Record> = rows
            .into_iter()
            .filter_map(|row| serde_json::from_value::<LegacyRecord>(row).ok()?.upgrade())
            .collect();
        if records.len() < total {
            tracing::warn!(dropped = total - records.len(), "skipped unreadable legacy records");
        }
        let ledger = Ledger {
            schema_version: SCHEMA_VERSION,
            records,
            tombstones: Vec::new(),
        };
        return Ok((ledger, true));
    }

    let version = raw
        .get("schemaVersion")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    if version > SCHEMA_VERSION {
        return Err(KakeiboError::UnsupportedSchema(version));
    }
    let mut ledger: Ledger = serde_json::from_value(raw)?;
    let upgraded = ledger.schema_version != SCHEMA_VERSION;
    ledger.schema_version = SCHEMA_VERSION;
    Ok((ledger, upgraded))
}

pub struct RecordStore<S: Storage> {
    storage: S,
}

impl<S: Storage> RecordStore<S> {
    /// Open the ledger, upgrading an older persisted layout in place.
    pub fn open(storage: S) -> Result<Self> {
        let store = Self { storage };
        store.migrate()?;
        Ok(store)
    }

    /// Upgrade an unversioned ledger, or import the web app's record array
    /// when no ledger exists yet. The legacy key itself is left as it was.
    fn migrate(&self) -> Result<()> {
        let keys = self.storage.list()?;
        let has_ledger = keys.iter().any(|k| k == LEDGER_KEY);
        let legacy = if !has_ledger && keys.iter().any(|k| k == LEGACY_KEY) {
            self.storage.get(LEGACY_KEY)?
        } else {
            None
        };
        if !has_ledger && legacy.is_none() {
            return Ok(());
        }

        self.storage.update(LEDGER_KEY, |current| {
            let Some(text) = current.or(legacy) else {
                return Ok((None, ()));
            };
            let (ledger, upgraded) = parse_ledger(&text)?;
            if !upgraded {
                return Ok((None, ()));
            }
            tracing::info!(records = ledger.records.len(), "upgraded ledger to schema v{SCHEMA_VERSION}");
            Ok((Some(serde_json::to_string(&ledger)?), ()))
        })
    }

    fn load(&self) -> Result<Ledger> {
        match self.storage.get(LEDGER_KEY)? {
            Some(text) => parse_ledger(&text).map(|(ledger, _)| ledger),
            None => Ok(Ledger::empty()),
        }
    }

    /// Apply `f` to the current ledger and persist the result atomically.
    fn mutate<T>(&self, f: impl FnOnce(&mut Ledger) -> Result<T>) -> Result<T> {
        self.storage.update(LEDGER_KEY, |current| {
            let mut ledger = match current {
                Some(text) => parse_ledger(&text)?.0,
                None => Ledger::empty(),
            };
            let out = f(&mut ledger)?;
            Ok((Some(serde_json::to_string(&ledger)?), out))
        })
    }

    /// All records, newest first.
    pub fn list(&self) -> Result<Vec<Record>> {
        let mut records = self.load()?.records;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    pub fn get(&self, id: &str) -> Result<Option<Record>> {
        Ok(self.load()?.records.into_iter().find(|r| r.id == id))
    }

    /// Persist a new record. It always enters the ledger as Pending.
    pub fn insert(&self, mut record: Record) -> Result<()> {
        record.sync_state = SyncState::Pending;
        self.mutate(|ledger| {
            let taken = ledger.records.iter().any(|r| r.id == record.id)
                || ledger.tombstones.iter().any(|t| t.id == record.id);
            if taken {
                return Err(KakeiboError::DuplicateId(record.id.clone()));
            }
            tracing::debug!(id = %record.id, amount = record.amount, "inserted record");
            ledger.records.insert(0, record);
            Ok(())
        })
    }

    /// Delete a record locally. A record the remote already holds leaves a
    /// tombstone behind so the next sync deletes it there too.
    pub fn remove(&self, id: &str) -> Result<Record> {
        self.mutate(|ledger| {
            let idx = ledger
                .records
                .iter()
                .position(|r| r.id == id)
                .ok_or_else(|| KakeiboError::NotFound(id.to_string()))?;
            let record = ledger.records.remove(idx);
            if record.is_synced() {
                ledger.tombstones.push(Tombstone {
                    id: record.id.clone(),
                    deleted_at: chrono::Utc::now().timestamp_millis(),
                });
            }
            Ok(record)
        })
    }

    /// Flip a record to Synced. Only a Pending record counts as confirmed.
    pub fn mark_synced(&self, id: &str) -> Result<SyncMark> {
        self.mutate(|ledger| {
            Ok(match ledger.records.iter_mut().find(|r| r.id == id) {
                Some(record) if record.is_synced() => SyncMark::AlreadySynced,
                Some(record) => {
                    record.sync_state = SyncState::Synced;
                    SyncMark::Confirmed
                }
                None => SyncMark::Missing,
            })
        })
    }

    /// Pending records, oldest first.
    pub fn pending(&self) -> Result<Vec<Record>> {
        let mut pending: Vec<Record> = self
            .load()?
            .records
            .into_iter()
            .filter(|r| r.sync_state == SyncState::Pending)
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    pub fn tombstones(&self) -> Result<Vec<Tombstone>> {
        Ok(self.load()?.tombstones)
    }

    pub fn clear_tombstone(&self, id: &str) -> Result<()> {
        self.mutate(|ledger| {
            ledger.tombstones.retain(|t| t.id != id);
            Ok(())
        })
    }

    /// Queue a remote delete for an id that is no longer held locally.
    pub fn queue_remote_delete(&self, id: &str) -> Result<()> {
        self.mutate(|ledger| {
            let known = ledger.records.iter().any(|r| r.id == id)
                || ledger.tombstones.iter().any(|t| t.id == id);
            if !known {
                ledger.tombstones.push(Tombstone {
                    id: id.to_string(),
                    deleted_at: chrono::Utc::now().timestamp_millis(),
                });
            }
            Ok(())
        })
    }

    pub fn sync_status(&self) -> Result<SyncStatus> {
        match self.storage.get(SYNC_STATUS_KEY)? {
            Some(text) => Ok(serde_json::from_str(&text)?),
            None => Ok(SyncStatus::default()),
        }
    }

    pub fn set_sync_status(&self, status: &SyncStatus) -> Result<()> {
        let json = serde_json::to_string(status)?;
        self.storage.set(SYNC_STATUS_KEY, &json)
    }

    /// Take or renew the sync lease for `holder`. Returns false while another
    /// holder's lease is still live. The lease lives in storage, so it also
    /// excludes reconcile passes running in other processes.
    pub fn claim_sync_lease(&self, holder: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        self.storage.update(SYNC_LEASE_KEY, |current| {
            let taken = SyncLease::parse(current.as_deref())
                .is_some_and(|lease| lease.holder != holder && lease.expires_at > now);
            if taken {
                return Ok((None, false));
            }
            let lease = SyncLease {
                holder: holder.to_string(),
                expires_at: now + SYNC_LEASE_TTL_MS,
            };
            Ok((Some(serde_json::to_string(&lease)?), true))
        })
    }

    /// Give the lease up if `holder` still owns it.
    pub fn release_sync_lease(&self, holder: &str) -> Result<()> {
        self.storage.update(SYNC_LEASE_KEY, |current| {
            let ours = SyncLease::parse(current.as_deref()).is_some_and(|lease| lease.holder == holder);
            if !ours {
                return Ok((None, ()));
            }
            let released = SyncLease {
                holder: String::new(),
                expires_at: 0,
            };
            Ok((Some(serde_json::to_string(&released)?), ()))
        })
    }
}
