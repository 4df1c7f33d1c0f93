//! Registry of live checkers and the only entry point for callers.
//!
//! Layout on disk: `ch-<id>` holds the JSON [`CheckerRecord`], `up-<id>`
//! holds the check history, one JSON [`Check`] per line, oldest first.

use crate::common::time::{Clock, SystemClock, unix_millis};
use crate::config::{CheckerId, ConfigError, EndPoint};
use crate::metrics::{CheckSummary, summarize};
use crate::probe::Check;
use crate::probe_engine::ProberFactory;
use crate::runtime::{CheckSink, Checker, CheckerError, CheckerRecord};
use crate::storage::{FileStore, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{info, warn};

pub const CHECKER_PREFIX: &str = "ch-";
pub const HISTORY_PREFIX: &str = "up-";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Checker(#[from] CheckerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("checker {0} not found")]
    NotFound(CheckerId),
}

pub fn definition_key(id: CheckerId) -> String {
    format!("{CHECKER_PREFIX}{id}")
}

pub fn history_key(id: CheckerId) -> String {
    format!("{HISTORY_PREFIX}{id}")
}

/// Appends each check to the checker's history key.
pub struct StoreSink {
    store: Arc<FileStore>,
}

impl StoreSink {
    pub fn new(store: Arc<FileStore>) -> Self {
        Self { store }
    }
}

impl CheckSink for StoreSink {
    fn record(&self, checker_id: CheckerId, check: &Check) -> Result<(), StoreError> {
        let key = history_key(checker_id);
        let line = serde_json::to_string(check).map_err(|source| StoreError::Json {
            key: key.clone(),
            source,
        })?;
        self.store.append(&key, &line)
    }
}

/// Every readable `ch-*` record in the store. Unreadable ones are logged
/// and skipped.
pub fn persisted_records(store: &FileStore) -> Vec<CheckerRecord> {
    let mut records = Vec::new();
    for key in store.keys() {
        if !key.starts_with(CHECKER_PREFIX) {
            continue;
        }
        match store.read_json::<CheckerRecord>(&key) {
            Ok(record) if key == definition_key(record.id) => records.push(record),
            Ok(record) => {
                warn!(%key, checker_id = %record.id, "skipping checker record stored under a foreign key");
            }
            Err(err) => warn!(%key, error = %err, "skipping unreadable checker record"),
        }
    }
    records
}

/// Reads a checker's history with `ts >= since`, oldest first. A checker
/// that has never recorded a check has an empty history.
pub fn read_history(
    store: &FileStore,
    id: CheckerId,
    since: SystemTime,
) -> Result<Vec<Check>, StoreError> {
    let key = history_key(id);
    let since_ms = unix_millis(since);

    let mut checks = Vec::new();
    let mut decode_error = None;
    let scanned = store.scan_lines(&key, |line| {
        if line.trim().is_empty() {
            return true;
        }
        match serde_json::from_str::<Check>(line) {
            Ok(check) => {
                if check.ts >= since_ms {
                    checks.push(check);
                }
                true
            }
            Err(source) => {
                decode_error = Some(source);
                false
            }
        }
    });

    match scanned {
        Ok(()) => {}
        Err(err) if err.is_not_found() => return Ok(Vec::new()),
        Err(err) => return Err(err),
    }
    if let Some(source) = decode_error {
        return Err(StoreError::Json { key, source });
    }
    Ok(checks)
}

struct Entry {
    checker: Arc<Checker>,
    /// Serializes start/stop with the write of the resulting record. Holds
    /// `true` once the entry has been deleted; a deleted entry never starts.
    lifecycle: Mutex<bool>,
}

impl Entry {
    fn new(checker: Checker) -> Arc<Self> {
        Arc::new(Self {
            checker: Arc::new(checker),
            lifecycle: Mutex::new(false),
        })
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, bool> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct Engine {
    store: Arc<FileStore>,
    sink: Arc<dyn CheckSink>,
    prober_factory: ProberFactory,
    clock: Arc<dyn Clock>,
    checkers: RwLock<HashMap<CheckerId, Arc<Entry>>>,
}

impl Engine {
    /// An empty registry over `store`; persisted checkers are not loaded.
    pub fn new(store: Arc<FileStore>, prober_factory: ProberFactory) -> Self {
        Self {
            sink: Arc::new(StoreSink::new(Arc::clone(&store))),
            store,
            prober_factory,
            clock: Arc::new(SystemClock),
            checkers: RwLock::new(HashMap::new()),
        }
    }

    /// Loads every persisted checker and restarts the ones saved as active.
    pub fn open(store: Arc<FileStore>, prober_factory: ProberFactory) -> Self {
        let engine = Self::new(store, prober_factory);
        let restored = engine.restore();
        info!(restored, "engine opened");
        engine
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    fn restore(&self) -> usize {
        let mut restored = 0;
        for record in persisted_records(&self.store) {
            let checker = match Checker::from_record(&record) {
                Ok(checker) => checker,
                Err(err) => {
                    warn!(checker_id = %record.id, error = %err, "skipping invalid checker record");
                    continue;
                }
            };

            let entry = Entry::new(checker);
            if record.active
                && let Err(err) = entry
                    .checker
                    .start((self.prober_factory)(), Arc::clone(&self.sink))
            {
                warn!(checker_id = %record.id, error = %err, "failed to resume checker");
            }
            self.write_registry().insert(record.id, entry);
            restored += 1;
        }
        restored
    }

    pub fn create_checker(
        &self,
        path: &str,
        method: &str,
        allow_redirects: bool,
        timeout: Duration,
        interval: Duration,
    ) -> Result<CheckerRecord, EngineError> {
        let endpoint = EndPoint::new(path, method, allow_redirects)?;
        let checker = Checker::new(endpoint, timeout, interval)?;
        let record = checker.record();
        self.store.create_json(&definition_key(record.id), &record)?;

        self.write_registry().insert(record.id, Entry::new(checker));
        info!(checker_id = %record.id, endpoint = %record.end_point, "checker created");
        Ok(record)
    }

    pub fn start_checker(&self, id: CheckerId) -> Result<(), EngineError> {
        let entry = self.entry(id)?;
        self.start_entry(id, &entry)
    }

    pub fn stop_checker(&self, id: CheckerId) -> Result<(), EngineError> {
        let entry = self.entry(id)?;
        self.stop_entry(id, &entry)
    }

    /// The entry may have been deleted between the registry lookup and the
    /// lifecycle lock; a deleted entry reports `NotFound`.
    fn start_entry(&self, id: CheckerId, entry: &Entry) -> Result<(), EngineError> {
        let removed = entry.lock_lifecycle();
        if *removed {
            return Err(EngineError::NotFound(id));
        }
        entry
            .checker
            .start((self.prober_factory)(), Arc::clone(&self.sink))?;
        self.persist(&entry.checker)
    }

    fn stop_entry(&self, id: CheckerId, entry: &Entry) -> Result<(), EngineError> {
        let removed = entry.lock_lifecycle();
        if *removed {
            return Err(EngineError::NotFound(id));
        }
        entry.checker.stop()?;
        self.persist(&entry.checker)
    }

    /// Unregisters the checker, stops it if needed, waits for its loop to
    /// exit, then removes its definition and history.
    pub fn delete_checker(&self, id: CheckerId) -> Result<(), EngineError> {
        let entry = self
            .write_registry()
            .remove(&id)
            .ok_or(EngineError::NotFound(id))?;
        {
            let mut removed = entry.lock_lifecycle();
            *removed = true;
            if entry.checker.is_active() {
                entry.checker.stop()?;
            }
        }
        entry.checker.wait_stopped();

        match self.store.delete(&definition_key(id)) {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        match self.store.delete(&history_key(id)) {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        info!(checker_id = %id, "checker deleted");
        Ok(())
    }

    pub fn get_checker(&self, id: CheckerId) -> Result<CheckerRecord, EngineError> {
        Ok(self.entry(id)?.checker.record())
    }

    pub fn list_checkers(&self) -> Vec<CheckerRecord> {
        let mut records: Vec<CheckerRecord> = self
            .read_registry()
            .values()
            .map(|entry| entry.checker.record())
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }

    /// Makes sure a running checker probes the endpoint. A registered checker
    /// for the same endpoint is reused (and started if idle) instead of
    /// adding a duplicate; its schedule is kept as it was persisted.
    pub fn ensure_running(
        &self,
        path: &str,
        method: &str,
        allow_redirects: bool,
        timeout: Duration,
        interval: Duration,
    ) -> Result<CheckerRecord, EngineError> {
        let endpoint = EndPoint::new(path, method, allow_redirects)?;
        let record = match self.find_by_endpoint(&endpoint) {
            Some(existing) => {
                info!(checker_id = %existing.id, endpoint = %endpoint, "reusing registered checker");
                existing
            }
            None => self.create_checker(path, method, allow_redirects, timeout, interval)?,
        };

        match self.start_checker(record.id) {
            Ok(()) | Err(EngineError::Checker(CheckerError::AlreadyStarted)) => {}
            Err(err) => return Err(err),
        }
        self.get_checker(record.id)
    }

    /// The checker probing exactly this endpoint, if one is registered.
    pub fn find_by_endpoint(&self, endpoint: &EndPoint) -> Option<CheckerRecord> {
        self.read_registry()
            .values()
            .filter(|entry| entry.checker.endpoint() == endpoint)
            .map(|entry| entry.checker.record())
            .min_by_key(|record| record.id)
    }

    /// Checks with `ts >= since`, oldest first.
    pub fn list_checks(&self, id: CheckerId, since: SystemTime) -> Result<Vec<Check>, EngineError> {
        self.entry(id)?;
        Ok(read_history(&self.store, id, since)?)
    }

    /// Checks recorded within `window` of the engine clock's now.
    pub fn list_recent_checks(
        &self,
        id: CheckerId,
        window: Duration,
    ) -> Result<Vec<Check>, EngineError> {
        self.list_checks(id, self.clock.window_start(window))
    }

    pub fn summary(&self, id: CheckerId, since: SystemTime) -> Result<CheckSummary, EngineError> {
        Ok(summarize(&self.list_checks(id, since)?))
    }

    /// Stops every running loop and waits for it. Records keep their active
    /// flag so the next `open` resumes them.
    pub fn shutdown(&self) {
        let entries: Vec<Arc<Entry>> = self.read_registry().values().cloned().collect();
        for entry in &entries {
            let _lifecycle = entry.lock_lifecycle();
            if entry.checker.stop().is_ok() {
                info!(checker_id = %entry.checker.id(), "checker suspended for shutdown");
            }
        }
        for entry in entries {
            entry.checker.wait_stopped();
        }
    }

    fn persist(&self, checker: &Checker) -> Result<(), EngineError> {
        self.store
            .write_json(&definition_key(checker.id()), &checker.record())?;
        Ok(())
    }

    fn entry(&self, id: CheckerId) -> Result<Arc<Entry>, EngineError> {
        self.read_registry()
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, HashMap<CheckerId, Arc<Entry>>> {
        self.checkers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, HashMap<CheckerId, Arc<Entry>>> {
        self.checkers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
