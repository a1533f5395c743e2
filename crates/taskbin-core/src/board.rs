use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::access::AccessGate;
use crate::address::AddressSync;
use crate::criteria::{Criteria, CriteriaStore};
use crate::editor::{self, DeleteRequest, TaskForm, ValidationError};
use crate::filter::{self, PageWindow};
use crate::store::{RecordStore, StoreError};
use crate::task::{TaskKey, TaskRecord};

pub const MSG_CREATED: &str = "Task created";
pub const MSG_UPDATED: &str = "Task updated";
pub const MSG_DELETED: &str = "Deleted";
pub const MSG_TOKEN_SAVED: &str = "Token saved";
pub const MSG_TOKEN_INVALID: &str = "Invalid token";
pub const MSG_LOGGED_OUT: &str = "Logged out";
pub const MSG_FETCH_FAILED: &str = "Failed to fetch data";
pub const MSG_SAVE_FAILED: &str = "Failed to save data";

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("read-only session; unlock with the access token first")]
    ReadOnly,

    #[error("another save is still in flight")]
    Busy,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no delete is awaiting confirmation")]
    NoPendingDelete,

    #[error(transparent)]
    Access(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    fn new(level: NoticeLevel, message: &str) -> Self {
        Self {
            level,
            message: message.to_string(),
        }
    }
}

/// What a form submission did to the remote collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Saved {
    Created(TaskKey),
    Updated(TaskKey),
    /// The edited key was gone; nothing was written.
    Missing(TaskKey),
}

#[derive(Debug, Default)]
struct BoardState {
    collection: Vec<TaskRecord>,
    criteria: CriteriaStore,
    address: AddressSync,
    loading: bool,
    submitting: bool,
    deleting: Option<TaskKey>,
    pending_delete: Option<DeleteRequest>,
    notices: Vec<Notice>,
}

impl BoardState {
    fn notify(&mut self, level: NoticeLevel, message: &str) {
        self.notices.push(Notice::new(level, message));
    }

    fn write_in_flight(&self) -> bool {
        self.submitting || self.deleting.is_some()
    }
}

/// Clears the busy flags when a write ends, including when the future
/// driving it is dropped mid-flight. Must not drop while `state` is locked.
struct WriteGuard<'a> {
    state: &'a Mutex<BoardState>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.submitting = false;
        state.deleting = None;
    }
}

/// Owns the in-memory collection and everything that decides what is shown
/// and who may write. Locks are never held across a store call, so busy
/// flags stay observable while a write is pending.
pub struct Board<S> {
    store: S,
    gate: Mutex<AccessGate>,
    state: Mutex<BoardState>,
}

impl<S: RecordStore> Board<S> {
    /// Seeds the criteria from `address`; the collection starts empty until
    /// [`Board::refresh`] runs.
    pub fn new(store: S, gate: AccessGate, address: &str) -> Self {
        let (sync, criteria) = AddressSync::seed(address);
        Self {
            store,
            gate: Mutex::new(gate),
            state: Mutex::new(BoardState {
                criteria: CriteriaStore::new(criteria),
                address: sync,
                ..BoardState::default()
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_writable(&self) -> bool {
        self.gate.lock().is_writable()
    }

    pub fn criteria(&self) -> Criteria {
        self.state.lock().criteria.current().clone()
    }

    pub fn address(&self) -> String {
        self.state.lock().address.address().to_string()
    }

    pub fn collection(&self) -> Vec<TaskRecord> {
        self.state.lock().collection.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    pub fn is_submitting(&self) -> bool {
        self.state.lock().submitting
    }

    pub fn deleting(&self) -> Option<TaskKey> {
        self.state.lock().deleting.clone()
    }

    pub fn pending_delete(&self) -> Option<DeleteRequest> {
        self.state.lock().pending_delete.clone()
    }

    pub fn drain_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut self.state.lock().notices)
    }

    pub fn find(&self, key: &TaskKey) -> Option<TaskRecord> {
        self.state
            .lock()
            .collection
            .iter()
            .find(|record| &record.key == key)
            .cloned()
    }

    /// Prefilled edit form for `key`, if the record is loaded.
    pub fn edit_form(&self, key: &TaskKey) -> Option<TaskForm> {
        self.find(key).map(|record| TaskForm::from_record(&record))
    }

    /// Pulls the whole collection. On failure the previous collection stays
    /// and an error notice is recorded.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<usize, BoardError> {
        self.state.lock().loading = true;
        let fetched = self.store.fetch_all().await;

        let mut state = self.state.lock();
        state.loading = false;
        match fetched {
            Ok(records) => {
                let count = records.len();
                debug!(count, "collection refreshed");
                state.collection = records;
                Ok(count)
            }
            Err(err) => {
                warn!(error = %err, "keeping previous collection after failed fetch");
                state.notify(NoticeLevel::Error, MSG_FETCH_FAILED);
                Err(err.into())
            }
        }
    }

    /// Runs one criteria setter and pushes the result into the address.
    /// Returns true when the address changed.
    pub fn update_criteria(&self, change: impl FnOnce(&mut CriteriaStore)) -> bool {
        let mut state = self.state.lock();
        change(&mut state.criteria);
        let current = state.criteria.current().clone();
        state.address.push(&current)
    }

    /// Applies an address that changed outside the board (back/forward).
    pub fn navigate(&self, address: &str) -> Criteria {
        let mut state = self.state.lock();
        let current = state.criteria.current().clone();
        let next = state.address.navigate(address, &current);
        state.criteria.replace(next.clone());
        next
    }

    /// The page of matching records for the current criteria.
    pub fn visible(&self) -> PageWindow<TaskRecord> {
        let state = self.state.lock();
        let criteria = state.criteria.current();
        let selected: Vec<TaskRecord> = filter::select(&state.collection, criteria)
            .into_iter()
            .cloned()
            .collect();
        filter::paginate(&selected, criteria.page_size, criteria.page_index)
    }

    fn ensure_writable(&self) -> Result<(), BoardError> {
        if self.is_writable() {
            Ok(())
        } else {
            warn!("refused mutation on a read-only session");
            Err(BoardError::ReadOnly)
        }
    }

    /// Creates (`editing == None`) or updates a task, writes the whole
    /// collection and fetches it back.
    #[tracing::instrument(skip(self, form))]
    pub async fn submit(
        &self,
        form: &TaskForm,
        editing: Option<&TaskKey>,
    ) -> Result<Saved, BoardError> {
        self.ensure_writable()?;
        let draft = form.validate()?;

        let edit = {
            let mut state = self.state.lock();
            if state.write_in_flight() {
                warn!("refused submit while another write is in flight");
                return Err(BoardError::Busy);
            }

            let edit = match editing {
                None => editor::create(&state.collection, draft),
                Some(key) => editor::update(&state.collection, key, draft),
            };
            if !edit.target_found {
                warn!(key = %edit.key, "edit target no longer in collection; skipping write");
                return Ok(Saved::Missing(edit.key));
            }
            state.submitting = true;
            edit
        };

        let guard = WriteGuard { state: &self.state };
        let written = self.store.replace_all(&edit.collection).await;
        drop(guard);
        {
            let mut state = self.state.lock();
            if let Err(err) = written {
                warn!(error = %err, "discarding local edit after failed write");
                state.notify(NoticeLevel::Error, MSG_SAVE_FAILED);
                return Err(err.into());
            }
            let message = if editing.is_some() { MSG_UPDATED } else { MSG_CREATED };
            state.notify(NoticeLevel::Success, message);
        }

        if let Err(err) = self.refresh().await {
            debug!(error = %err, "write landed but refetch failed");
        }

        info!(key = %edit.key, "task saved");
        Ok(match editing {
            None => Saved::Created(edit.key),
            Some(_) => Saved::Updated(edit.key),
        })
    }

    /// First phase of deleting `key`. `None` when the key is not loaded.
    #[tracing::instrument(skip(self))]
    pub fn request_delete(&self, key: &TaskKey) -> Result<Option<DeleteRequest>, BoardError> {
        self.ensure_writable()?;
        let mut state = self.state.lock();
        let Some(record) = state.collection.iter().find(|record| &record.key == key) else {
            warn!(key = %key, "delete requested for a key not in the collection");
            return Ok(None);
        };
        let request = DeleteRequest::new(record);
        state.pending_delete = Some(request.clone());
        Ok(Some(request))
    }

    /// Drops the pending request. Returns false when there was none.
    pub fn cancel_delete(&self) -> bool {
        let cancelled = self.state.lock().pending_delete.take();
        if let Some(request) = cancelled.as_ref() {
            debug!(key = %request.key(), "delete cancelled");
        }
        cancelled.is_some()
    }

    /// Second phase: removes the pending record remotely and refetches.
    /// Returns false when the record had already vanished.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_delete(&self) -> Result<bool, BoardError> {
        self.ensure_writable()?;

        let (key, edit) = {
            let mut state = self.state.lock();
            if state.write_in_flight() {
                warn!("refused delete while another write is in flight");
                return Err(BoardError::Busy);
            }
            let request = state
                .pending_delete
                .take()
                .ok_or(BoardError::NoPendingDelete)?;
            let key = request.key().clone();
            let edit = request.confirm(&state.collection);
            if !edit.target_found {
                warn!(key = %key, "delete target no longer in collection; skipping write");
                return Ok(false);
            }
            state.deleting = Some(key.clone());
            (key, edit)
        };

        let guard = WriteGuard { state: &self.state };
        let written = self.store.replace_all(&edit.collection).await;
        drop(guard);
        {
            let mut state = self.state.lock();
            if let Err(err) = written {
                warn!(error = %err, key = %key, "delete write failed");
                state.notify(NoticeLevel::Error, MSG_SAVE_FAILED);
                return Err(err.into());
            }
            state.notify(NoticeLevel::Success, MSG_DELETED);
        }

        if let Err(err) = self.refresh().await {
            debug!(error = %err, "delete landed but refetch failed");
        }

        info!(key = %key, "task deleted");
        Ok(true)
    }

    pub fn unlock(&self, candidate: &str) -> Result<bool, BoardError> {
        let accepted = self.gate.lock().unlock(candidate)?;
        let (level, message) = if accepted {
            (NoticeLevel::Success, MSG_TOKEN_SAVED)
        } else {
            (NoticeLevel::Error, MSG_TOKEN_INVALID)
        };
        self.state.lock().notify(level, message);
        Ok(accepted)
    }

    pub fn lock(&self) -> Result<(), BoardError> {
        let cleared = self.gate.lock().lock();
        self.state.lock().notify(NoticeLevel::Info, MSG_LOGGED_OUT);
        cleared.map_err(BoardError::from)
    }
}
