//! Shared registry of verification challenges.
//!
//! Records live in a JSON file that the worker and the admin process both
//! read and write. Every operation reloads the file under one mutex before it
//! acts, so a change made by the other process is always visible. Live browser
//! handles are kept in a separate process-local map and never persisted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use super::record::{PendingView, VerificationRecord, VerificationStatus};
use crate::auth::ChallengeScreen;
use crate::browser::BrowserHandle;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry file io: {0}")]
    Io(#[from] io::Error),

    #[error("registry encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Applies a code against the live browser when the registry has no handle
/// for the record itself.
#[async_trait]
pub trait HandleSource: Send + Sync {
    /// `None` when no browser is available right now.
    async fn apply_code(&self, code: &str) -> Option<bool>;
}

#[derive(Default)]
struct State {
    records: BTreeMap<String, VerificationRecord>,
    handles: HashMap<String, Arc<dyn BrowserHandle>>,
    /// Records whose code is being applied by this process
    in_flight: HashSet<String>,
}

pub struct VerificationRegistry {
    path: PathBuf,
    state: Mutex<State>,
    challenge: ChallengeScreen,
    source: RwLock<Option<Weak<dyn HandleSource>>>,
    horizon: chrono::Duration,
    handoff_timeout: Duration,
    handoff_poll: Duration,
}

impl VerificationRegistry {
    /// Open the registry file, recovering from corruption.
    pub fn open(path: impl Into<PathBuf>, challenge: ChallengeScreen) -> Self {
        let registry = Self {
            path: path.into(),
            state: Mutex::new(State::default()),
            challenge,
            source: RwLock::new(None),
            horizon: chrono::Duration::minutes(60),
            handoff_timeout: Duration::from_secs(60),
            handoff_poll: Duration::from_secs(1),
        };

        let count = registry.lock_fresh().records.len();
        info!(path = %registry.path.display(), records = count, "verification_registry_opened");
        registry
    }

    /// Records older than `horizon` are left out of [`list_pending`](Self::list_pending).
    pub fn with_horizon(mut self, horizon: chrono::Duration) -> Self {
        self.horizon = horizon;
        self
    }

    /// How long `submit_code` waits for another holder of the browser to apply a code.
    pub fn with_handoff(mut self, timeout: Duration, poll: Duration) -> Self {
        self.handoff_timeout = timeout;
        self.handoff_poll = poll;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_handle_source(&self, source: Weak<dyn HandleSource>) {
        if let Ok(mut slot) = self.source.write() {
            *slot = Some(source);
        }
    }

    fn handle_source(&self) -> Option<Arc<dyn HandleSource>> {
        self.source
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().and_then(Weak::upgrade))
    }

    /// Lock the state after replacing the records with the file contents.
    fn lock_fresh(&self) -> MutexGuard<'_, State> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.records = self.read_file();
        state
    }

    fn read_file(&self) -> BTreeMap<String, VerificationRecord> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "verification_registry_read_failed");
                return BTreeMap::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "verification_registry_corrupt");
                self.quarantine_corrupt_file();
                BTreeMap::new()
            }
        }
    }

    /// Move the unreadable file aside and start over with an empty registry.
    fn quarantine_corrupt_file(&self) {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let mut backup = self.path.clone().into_os_string();
        backup.push(format!(".corrupt-{}", stamp));
        let backup = PathBuf::from(backup);

        match std::fs::rename(&self.path, &backup) {
            Ok(()) => warn!(backup = %backup.display(), "verification_registry_backed_up"),
            Err(e) => error!(error = %e, "verification_registry_backup_failed"),
        }

        if let Err(e) = self.write_file(&BTreeMap::new()) {
            error!(error = %e, "verification_registry_reset_failed");
        }
    }

    fn write_file(&self, records: &BTreeMap<String, VerificationRecord>) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_vec_pretty(records)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn persist(&self, state: &State) -> bool {
        match self.write_file(&state.records) {
            Ok(()) => true,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "verification_registry_save_failed");
                false
            }
        }
    }

    /// A fresh `verify_<epoch>` id not yet present in the file.
    pub fn new_id(&self) -> String {
        let state = self.lock_fresh();
        let base = format!("verify_{}", Utc::now().timestamp());
        if !state.records.contains_key(&base) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !state.records.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Create a pending record. The handle, if any, stays in this process.
    pub fn register(
        &self,
        id: &str,
        screenshot_path: Option<String>,
        handle: Option<Arc<dyn BrowserHandle>>,
    ) -> bool {
        let mut state = self.lock_fresh();
        state
            .records
            .insert(id.to_string(), VerificationRecord::pending(screenshot_path));
        match handle {
            Some(handle) => {
                state.handles.insert(id.to_string(), handle);
            }
            None => {
                state.handles.remove(id);
            }
        }
        let saved = self.persist(&state);
        info!(verification_id = %id, persisted = saved, "verification_registered");
        saved
    }

    pub fn get(&self, id: &str) -> Option<VerificationRecord> {
        self.lock_fresh().records.get(id).cloned()
    }

    pub fn status(&self, id: &str) -> Option<VerificationStatus> {
        self.lock_fresh().records.get(id).map(|r| r.status)
    }

    pub fn is_completed(&self, id: &str) -> bool {
        self.status(id) == Some(VerificationStatus::Completed)
    }

    /// Whether this process holds a live browser handle for the record.
    pub fn has_handle(&self, id: &str) -> bool {
        self.lock_fresh().handles.contains_key(id)
    }

    pub fn complete(&self, id: &str) -> bool {
        self.set_final(id, VerificationStatus::Completed)
    }

    /// Cancel an open record. Returns false if it is unknown or already closed.
    pub fn cancel(&self, id: &str) -> bool {
        self.set_final(id, VerificationStatus::Cancelled)
    }

    fn set_final(&self, id: &str, status: VerificationStatus) -> bool {
        let mut state = self.lock_fresh();
        let Some(record) = state.records.get_mut(id) else {
            warn!(verification_id = %id, "verification_not_found");
            return false;
        };
        if !record.status.is_open() {
            info!(verification_id = %id, status = %record.status, "verification_already_closed");
            return false;
        }
        record.status = status;
        state.handles.remove(id);
        state.in_flight.remove(id);
        let saved = self.persist(&state);
        info!(verification_id = %id, status = %status, "verification_closed");
        saved
    }

    /// Open records inside the horizon, for the admin view.
    pub fn list_pending(&self) -> BTreeMap<String, PendingView> {
        let state = self.lock_fresh();
        let now = Utc::now();
        state
            .records
            .iter()
            .filter(|(_, r)| r.status.is_open() && r.age(now) <= self.horizon)
            .map(|(id, r)| (id.clone(), PendingView::from(r)))
            .collect()
    }

    /// Drop records older than `max_age_hours`. Returns how many were removed.
    pub fn cleanup_old(&self, max_age_hours: i64) -> usize {
        let mut state = self.lock_fresh();
        let now = Utc::now();
        let max_age = chrono::Duration::hours(max_age_hours);

        let stale: Vec<String> = state
            .records
            .iter()
            .filter(|(_, r)| r.age(now) > max_age)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            state.records.remove(id);
            state.handles.remove(id);
            state.in_flight.remove(id);
        }

        if !stale.is_empty() {
            self.persist(&state);
            info!(removed = stale.len(), "verification_records_cleaned");
        }
        stale.len()
    }

    /// Take over a code that was submitted elsewhere and not yet applied.
    ///
    /// The caller must hold the browser and report back with [`finish`](Self::finish).
    pub fn claim_submitted_code(&self, id: &str) -> Option<String> {
        let mut state = self.lock_fresh();
        let record = state.records.get(id)?;
        if record.status != VerificationStatus::Processing || state.in_flight.contains(id) {
            return None;
        }
        let code = record.code.clone()?;
        state.in_flight.insert(id.to_string());
        Some(code)
    }

    /// Record the result of applying a code.
    pub fn finish(&self, id: &str, accepted: bool) {
        let mut state = self.lock_fresh();
        state.in_flight.remove(id);
        let status = if accepted {
            VerificationStatus::Completed
        } else {
            VerificationStatus::Failed
        };
        if let Some(record) = state.records.get_mut(id) {
            record.status = status;
        }
        if accepted {
            state.handles.remove(id);
        }
        self.persist(&state);
        if accepted {
            info!(verification_id = %id, "verification_code_accepted");
        } else {
            warn!(verification_id = %id, "verification_code_rejected");
        }
    }

    /// Mark the record processing and apply `code`.
    ///
    /// The code goes to the browser handle registered with the record, else
    /// to the [`HandleSource`]. When neither can take it now, the holder of
    /// the browser applies it on its next poll and this call waits for the
    /// outcome. Never fails loudly: every problem is logged and reported as
    /// `false`.
    pub async fn submit_code(&self, id: &str, code: &str) -> bool {
        let code = code.trim();
        if code.is_empty() {
            warn!(verification_id = %id, "verification_code_empty");
            return false;
        }

        let handle = {
            let mut state = self.lock_fresh();
            let in_flight = state.in_flight.contains(id);
            let Some(record) = state.records.get_mut(id) else {
                warn!(verification_id = %id, "verification_not_found");
                return false;
            };
            if !record.status.accepts_code() || in_flight {
                warn!(verification_id = %id, status = %record.status, "verification_not_accepting_code");
                return false;
            }
            record.status = VerificationStatus::Processing;
            record.code = Some(code.to_string());
            state.in_flight.insert(id.to_string());
            let handle = state.handles.get(id).cloned();
            self.persist(&state);
            handle
        };

        info!(verification_id = %id, has_handle = handle.is_some(), "verification_code_submitted");

        let applied = match handle {
            Some(handle) => Some(self.challenge.submit_code(handle.as_ref(), code).await),
            None => match self.handle_source() {
                Some(source) => source.apply_code(code).await,
                None => None,
            },
        };

        match applied {
            Some(accepted) => {
                self.finish(id, accepted);
                accepted
            }
            None => {
                self.lock_fresh().in_flight.remove(id);
                info!(verification_id = %id, "verification_code_handed_off");
                self.await_outcome(id).await
            }
        }
    }

    async fn await_outcome(&self, id: &str) -> bool {
        let deadline = Instant::now() + self.handoff_timeout;
        loop {
            match self.status(id) {
                Some(VerificationStatus::Completed) => return true,
                Some(VerificationStatus::Processing) => {}
                Some(status) => {
                    info!(verification_id = %id, status = %status, "verification_handoff_resolved");
                    return false;
                }
                None => return false,
            }
            if Instant::now() >= deadline {
                warn!(verification_id = %id, "verification_handoff_timeout");
                return false;
            }
            sleep(self.handoff_poll).await;
        }
    }
}
