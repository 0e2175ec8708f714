use crate::error::{KakeiboError, Result};
use crate::models::SyncStatus;
use crate::remote::RemoteStore;
use crate::storage::Storage;
use crate::store::{RecordStore, SyncMark};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncReport {
    /// Records newly confirmed Synced by this pass.
    pub confirmed: usize,
    /// Pushes that failed; those records stay Pending.
    pub failed: usize,
    /// Tombstones propagated to the remote.
    pub deleted: usize,
    pub delete_failed: usize,
    pub connected: bool,
}

/// Holds the store's sync lease for one pass and gives it back on drop.
struct Lease<'a, S: Storage> {
    store: &'a RecordStore<S>,
    holder: String,
}

impl<'a, S: Storage> Lease<'a, S> {
    fn acquire(store: &'a RecordStore<S>) -> Result<Self> {
        let holder = uuid::Uuid::new_v4().to_string();
        if !store.claim_sync_lease(&holder)? {
            return Err(KakeiboError::SyncInProgress);
        }
        Ok(Self { store, holder })
    }

    /// Extend the lease before a remote call; fails if another pass took it.
    fn renew(&self) -> Result<()> {
        if self.store.claim_sync_lease(&self.holder)? {
            Ok(())
        } else {
            tracing::warn!("sync lease lost to another pass; stopping");
            Err(KakeiboError::SyncInProgress)
        }
    }
}

impl<S: Storage> Drop for Lease<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_sync_lease(&self.holder) {
            tracing::warn!(error = %e, "could not release sync lease; it will expire");
        }
    }
}

pub struct SyncEngine<'a, S: Storage, R: RemoteStore> {
    store: &'a RecordStore<S>,
    remote: R,
}

impl<'a, S: Storage, R: RemoteStore> SyncEngine<'a, S, R> {
    pub fn new(store: &'a RecordStore<S>, remote: R) -> Self {
        Self { store, remote }
    }

    /// Push pending work to the remote and return how many records were
    /// newly confirmed Synced.
    pub fn reconcile(&self) -> Result<usize> {
        Ok(self.reconcile_report()?.confirmed)
    }

    /// One reconcile pass. Only one pass per ledger runs at a time, across
    /// engines and processes; a second caller gets `SyncInProgress` without
    /// touching any record. Remote failures are counted, local storage
    /// failures abort the pass.
    pub fn reconcile_report(&self) -> Result<SyncReport> {
        let lease = Lease::acquire(self.store)?;
        let mut report = SyncReport::default();
        let mut attempts = 0usize;
        let mut successes = 0usize;

        for tombstone in self.store.tombstones()? {
            lease.renew()?;
            attempts += 1;
            match self.remote.delete(&tombstone.id) {
                Ok(()) => {
                    successes += 1;
                    self.store.clear_tombstone(&tombstone.id)?;
                    report.deleted += 1;
                    tracing::debug!(id = %tombstone.id, "remote delete confirmed");
                }
                Err(e) => {
                    report.delete_failed += 1;
                    tracing::warn!(id = %tombstone.id, error = %e, "remote delete failed; will retry");
                }
            }
        }

        // Snapshot: records inserted after this point wait for the next pass.
        for record in self.store.pending()? {
            lease.renew()?;
            attempts += 1;
            match self.remote.upsert(&record) {
                Ok(()) => {
                    successes += 1;
                    match self.store.mark_synced(&record.id)? {
                        SyncMark::Confirmed => {
                            report.confirmed += 1;
                            tracing::debug!(id = %record.id, "record synced");
                        }
                        SyncMark::AlreadySynced => {}
                        // Deleted locally while the push was in flight.
                        SyncMark::Missing => self.store.queue_remote_delete(&record.id)?,
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(id = %record.id, error = %e, "push failed; record stays pending");
                }
            }
        }

        report.connected = attempts == 0 || successes > 0;
        let previous = self.store.sync_status()?;
        let status = SyncStatus {
            connected: report.connected,
            last_sync: if report.connected {
                Some(chrono::Utc::now().timestamp_millis())
            } else {
                previous.last_sync
            },
        };
        self.store.set_sync_status(&status)?;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};

    use chrono::NaiveDate;

    use crate::models::{Category, Member, Record, SyncState};
    use crate::remote::RemoteError;
    use crate::storage::{MemoryStorage, SqliteStorage};
    use crate::store::SYNC_LEASE_KEY;

    #[derive(Default)]
    struct FakeRemote {
        fail_all: bool,
        fail_ids: HashSet<String>,
        upserts: Mutex<Vec<String>>,
        deletes: Mutex<Vec<String>>,
    }

    impl FakeRemote {
        fn failing() -> Self {
            Self {
                fail_all: true,
                ..Default::default()
            }
        }

        fn upserts(&self) -> Vec<String> {
            self.upserts.lock().unwrap().clone()
        }

        fn deletes(&self) -> Vec<String> {
            self.deletes.lock().unwrap().clone()
        }
    }

    impl RemoteStore for FakeRemote {
        fn upsert(&self, record: &Record) -> std::result::Result<(), RemoteError> {
            self.upserts.lock().unwrap().push(record.id.clone());
            if self.fail_all || self.fail_ids.contains(&record.id) {
                return Err(RemoteError::Transport("offline".into()));
            }
            Ok(())
        }

        fn delete(&self, id: &str) -> std::result::Result<(), RemoteError> {
            self.deletes.lock().unwrap().push(id.to_string());
            if self.fail_all {
                return Err(RemoteError::Transport("offline".into()));
            }
            Ok(())
        }
    }

    /// Parks inside the first upsert until the test releases it.
    struct ParkedRemote {
        entered: Barrier,
        release: Barrier,
        parked: AtomicBool,
        pushes: AtomicUsize,
    }

    impl ParkedRemote {
        fn new() -> Self {
            Self {
                entered: Barrier::new(2),
                release: Barrier::new(2),
                parked: AtomicBool::new(false),
                pushes: AtomicUsize::new(0),
            }
        }
    }

    impl RemoteStore for ParkedRemote {
        fn upsert(&self, _record: &Record) -> std::result::Result<(), RemoteError> {
            self.pushes.fetch_add(1, Ordering::SeqCst);
            if !self.parked.swap(true, Ordering::SeqCst) {
                self.entered.wait();
                self.release.wait();
            }
            Ok(())
        }

        fn delete(&self, _id: &str) -> std::result::Result<(), RemoteError> {
            Ok(())
        }
    }

    fn record(owner_id: &str, amount: u64, category: Category) -> Record {
        let owner = Member::resolve(owner_id).unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        Record::new(owner, date, amount, category)
    }

    #[test]
    fn test_scenario_insert_then_reconcile() {
        let store = RecordStore::open(MemoryStorage::new()).unwrap();
        let r = record("user-1", 1200, Category::Food);
        store.insert(r.clone()).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed[0], r);
        assert_eq!(listed[0].sync_state, SyncState::Pending);

        let engine = SyncEngine::new(&store, FakeRemote::default());
        assert_eq!(engine.reconcile().unwrap(), 1);
        assert_eq!(store.list().unwrap()[0].sync_state, SyncState::Synced);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let store = RecordStore::open(MemoryStorage::new()).unwrap();
        store.insert(record("user-1", 100, Category::Food)).unwrap();
        store.insert(record("user-2", 200, Category::Transport)).unwrap();

        let remote = FakeRemote::default();
        let engine = SyncEngine::new(&store, &remote);
        assert_eq!(engine.reconcile().unwrap(), 2);
        assert_eq!(engine.reconcile().unwrap(), 0);
        assert_eq!(remote.upserts().len(), 2);
    }

    #[test]
    fn test_failed_push_stays_pending_and_retries_next_call() {
        let store = RecordStore::open(MemoryStorage::new()).unwrap();
        let good = record("user-1", 100, Category::Food);
        let bad = record("user-1", 200, Category::Food);
        store.insert(good.clone()).unwrap();
        store.insert(bad.clone()).unwrap();

        let remote = FakeRemote {
            fail_ids: HashSet::from([bad.id.clone()]),
            ..Default::default()
        };
        let engine = SyncEngine::new(&store, &remote);
        let report = engine.reconcile_report().unwrap();
        assert_eq!(report.confirmed, 1);
        assert_eq!(report.failed, 1);
        assert!(report.connected);
        assert_eq!(store.get(&bad.id).unwrap().unwrap().sync_state, SyncState::Pending);
        assert_eq!(remote.upserts().iter().filter(|id| **id == bad.id).count(), 1);

        let retry = SyncEngine::new(&store, FakeRemote::default());
        assert_eq!(retry.reconcile().unwrap(), 1);
        assert!(store.pending().unwrap().is_empty());
    }

    #[test]
    fn test_unreachable_remote_marks_disconnected() {
        let store = RecordStore::open(MemoryStorage::new()).unwrap();
        store
            .set_sync_status(&SyncStatus { connected: true, last_sync: Some(7) })
            .unwrap();
        store.insert(record("user-3", 900, Category::Housing)).unwrap();

        let engine = SyncEngine::new(&store, FakeRemote::failing());
        let report = engine.reconcile_report().unwrap();
        assert_eq!(report.confirmed, 0);
        assert!(!report.connected);

        let status = store.sync_status().unwrap();
        assert!(!status.connected);
        assert_eq!(status.last_sync, Some(7));
        assert_eq!(store.pending().unwrap().len(), 1);
    }

    #[test]
    fn test_nothing_to_do_counts_as_connected() {
        let store = RecordStore::open(MemoryStorage::new()).unwrap();
        let engine = SyncEngine::new(&store, FakeRemote::failing());
        let report = engine.reconcile_report().unwrap();
        assert!(report.connected);
        assert!(store.sync_status().unwrap().last_sync.is_some());
    }

    #[test]
    fn test_deleted_synced_record_does_not_reappear() {
        let store = RecordStore::open(MemoryStorage::new()).unwrap();
        let r = record("user-1", 1200, Category::Food);
        store.insert(r.clone()).unwrap();
        SyncEngine::new(&store, FakeRemote::default()).reconcile().unwrap();

        store.remove(&r.id).unwrap();

        let offline = SyncEngine::new(&store, FakeRemote::failing());
        let report = offline.reconcile_report().unwrap();
        assert_eq!(report.delete_failed, 1);
        assert!(store.get(&r.id).unwrap().is_none());
        assert_eq!(store.tombstones().unwrap().len(), 1);

        let remote = FakeRemote::default();
        let online = SyncEngine::new(&store, &remote);
        let report = online.reconcile_report().unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.confirmed, 0);
        assert_eq!(remote.deletes(), vec![r.id.clone()]);
        assert!(remote.upserts().is_empty());
        assert!(store.tombstones().unwrap().is_empty());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_overlapping_reconcile_is_rejected() {
        let store = RecordStore::open(MemoryStorage::new()).unwrap();
        store.insert(record("user-1", 100, Category::Food)).unwrap();
        let engine = SyncEngine::new(&store, ParkedRemote::new());

        std::thread::scope(|s| {
            let first = s.spawn(|| engine.reconcile());
            engine.remote.entered.wait();
            assert!(matches!(engine.reconcile(), Err(KakeiboError::SyncInProgress)));
            engine.remote.release.wait();
            assert_eq!(first.join().unwrap().unwrap(), 1);
        });

        assert_eq!(engine.reconcile().unwrap(), 0);
    }

    #[test]
    fn test_second_engine_on_same_store_is_rejected() {
        let store = RecordStore::open(MemoryStorage::new()).unwrap();
        store.insert(record("user-1", 100, Category::Food)).unwrap();
        let remote = ParkedRemote::new();
        let first = SyncEngine::new(&store, &remote);
        let second = SyncEngine::new(&store, &remote);

        std::thread::scope(|s| {
            let running = s.spawn(|| first.reconcile());
            remote.entered.wait();
            assert!(matches!(second.reconcile(), Err(KakeiboError::SyncInProgress)));
            remote.release.wait();
            assert_eq!(running.join().unwrap().unwrap(), 1);
        });

        assert_eq!(remote.pushes.load(Ordering::SeqCst), 1);
        assert_eq!(second.reconcile().unwrap(), 0);
    }

    #[test]
    fn test_separate_connections_share_one_sync_lease() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store_a = RecordStore::open(SqliteStorage::open(&path).unwrap()).unwrap();
        let store_b = RecordStore::open(SqliteStorage::open(&path).unwrap()).unwrap();
        let r = record("user-2", 450, Category::DailyGoods);
        store_a.insert(r.clone()).unwrap();

        let remote = ParkedRemote::new();
        let engine_a = SyncEngine::new(&store_a, &remote);
        let engine_b = SyncEngine::new(&store_b, &remote);

        std::thread::scope(|s| {
            let running = s.spawn(|| engine_a.reconcile());
            remote.entered.wait();
            assert!(matches!(engine_b.reconcile(), Err(KakeiboError::SyncInProgress)));
            remote.release.wait();
            assert_eq!(running.join().unwrap().unwrap(), 1);
        });

        assert_eq!(remote.pushes.load(Ordering::SeqCst), 1);
        assert_eq!(store_b.get(&r.id).unwrap().unwrap().sync_state, SyncState::Synced);
        assert_eq!(engine_b.reconcile().unwrap(), 0);
    }

    #[test]
    fn test_live_foreign_lease_leaves_records_untouched() {
        let storage = MemoryStorage::new();
        let store = RecordStore::open(&storage).unwrap();
        store.insert(record("user-1", 100, Category::Food)).unwrap();
        let far_future = chrono::Utc::now().timestamp_millis() + 600_000;
        storage
            .set(
                SYNC_LEASE_KEY,
                &format!(r#"{{"holder": "other-process", "expiresAt": {far_future}}}"#),
            )
            .unwrap();

        let remote = FakeRemote::default();
        let engine = SyncEngine::new(&store, &remote);
        assert!(matches!(engine.reconcile(), Err(KakeiboError::SyncInProgress)));
        assert!(remote.upserts().is_empty());
        assert_eq!(store.pending().unwrap().len(), 1);
    }

    #[test]
    fn test_insert_during_reconcile_waits_for_next_pass() {
        let store = RecordStore::open(MemoryStorage::new()).unwrap();
        store.insert(record("user-1", 100, Category::Food)).unwrap();
        let engine = SyncEngine::new(&store, ParkedRemote::new());
        let late = record("user-2", 300, Category::Social);

        std::thread::scope(|s| {
            let first = s.spawn(|| engine.reconcile());
            engine.remote.entered.wait();
            store.insert(late.clone()).unwrap();
            engine.remote.release.wait();
            assert_eq!(first.join().unwrap().unwrap(), 1);
        });

        assert_eq!(store.get(&late.id).unwrap().unwrap().sync_state, SyncState::Pending);
        assert_eq!(engine.reconcile().unwrap(), 1);
    }

    #[test]
    fn test_delete_during_push_queues_remote_delete() {
        let store = RecordStore::open(MemoryStorage::new()).unwrap();
        let r = record("user-1", 100, Category::Food);
        store.insert(r.clone()).unwrap();
        let engine = SyncEngine::new(&store, ParkedRemote::new());

        std::thread::scope(|s| {
            let first = s.spawn(|| engine.reconcile());
            engine.remote.entered.wait();
            store.remove(&r.id).unwrap();
            engine.remote.release.wait();
            assert_eq!(first.join().unwrap().unwrap(), 0);
        });

        let tombstones = store.tombstones().unwrap();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].id, r.id);
    }

    #[test]
    fn test_storage_failure_aborts_and_releases_guard() {
        let storage = MemoryStorage::new();
        let store = RecordStore::open(&storage).unwrap();
        store.insert(record("user-1", 100, Category::Food)).unwrap();
        let engine = SyncEngine::new(&store, FakeRemote::default());

        storage.fail_writes(true);
        assert!(matches!(engine.reconcile(), Err(KakeiboError::Storage(_))));
        assert_eq!(store.pending().unwrap().len(), 1);

        storage.fail_writes(false);
        assert_eq!(engine.reconcile().unwrap(), 1);
    }
}
