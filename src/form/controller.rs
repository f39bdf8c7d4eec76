use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use thiserror::Error;

use super::diff;
use super::model::ValueError;
use super::path::{self, FieldPath, IntoFieldPath, PathError, SEPARATOR};
use super::shift::ArrayOp;
use super::validation::{ErrorMap, FormValidator};
use super::value::Value;

static FORM_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FormId(pub u64);

impl FormId {
    pub fn next() -> Self {
        Self(FORM_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

impl Display for FormId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "form-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationTicket(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriptionId(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitState {
    Idle,
    Validating,
    Submitting,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    Submitted,
    /// Validation failed; no submit callback ran.
    Rejected,
    /// Another submit was already in flight.
    Skipped,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldReset {
    Restored,
    /// The path had no initial value and was removed from the data.
    Cleared,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationMode {
    OnChange,
    OnBlur,
    OnSubmit,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ArrayOpOptions {
    pub touch: bool,
    pub dirty: bool,
    pub validate: bool,
}

impl Default for ArrayOpOptions {
    fn default() -> Self {
        Self {
            touch: true,
            dirty: true,
            validate: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FormOptions {
    pub validate_mode: ValidationMode,
    pub array_ops: ArrayOpOptions,
    pub validation_debounce: Duration,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            validate_mode: ValidationMode::OnChange,
            array_ops: ArrayOpOptions::default(),
            validation_debounce: Duration::ZERO,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum StateTopic {
    InitialValues,
    Data,
    Errors,
    Touched,
    Dirty,
    IsValid,
    IsDirty,
    IsSubmitting,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FormSnapshot {
    pub initial_values: Value,
    pub data: Value,
    pub errors: ErrorMap,
    pub touched: BTreeMap<FieldPath, bool>,
    pub dirty: BTreeMap<FieldPath, bool>,
    pub is_valid: bool,
    pub is_dirty: bool,
    pub is_submitting: bool,
    pub submit_state: SubmitState,
    pub submit_count: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FormError {
    #[error("form state lock poisoned while {0}")]
    StatePoisoned(&'static str),
    #[error("top-level field name `{0}` contains the path separator")]
    InvalidFieldName(String),
    #[error("form values must be an object, found {0}")]
    RootNotObject(&'static str),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("`{path}` is not an array (found {found})")]
    NotAnArray { path: String, found: &'static str },
    #[error("index {index} is out of range for `{path}` with {len} elements")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },
    #[error("invalid submit state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: SubmitState, to: SubmitState },
    #[error("submit failed: {0}")]
    SubmitFailed(String),
    #[error(transparent)]
    Model(#[from] ValueError),
}

pub type FormResult<T> = Result<T, FormError>;

pub type BoxedSubmitFuture = Pin<Box<dyn Future<Output = FormResult<()>> + Send + 'static>>;

pub(super) type ChangeHandler = Arc<dyn Fn(&FieldPath, Option<&Value>) + Send + Sync>;
pub(super) type SubmitHandlerFn = Arc<dyn Fn(Value) -> BoxedSubmitFuture + Send + Sync>;
pub(super) type ResetHandler = Arc<dyn Fn() + Send + Sync>;
pub(super) type Subscriber = Arc<dyn Fn(&FormSnapshot) + Send + Sync>;

#[derive(Clone, Default)]
pub(super) struct FormHooks {
    pub(super) validator: Option<Arc<dyn FormValidator>>,
    pub(super) on_change: Option<ChangeHandler>,
    pub(super) on_submit: Option<SubmitHandlerFn>,
    pub(super) on_reset: Option<ResetHandler>,
}

#[derive(Clone)]
pub(super) struct SubscriberEntry {
    pub(super) topic: Option<StateTopic>,
    pub(super) callback: Subscriber,
}

#[derive(Default)]
pub(super) struct Subscribers {
    pub(super) next_id: u64,
    pub(super) entries: BTreeMap<SubscriptionId, SubscriberEntry>,
}

/// A value change produced by a write, reported through `on_change`.
#[derive(Clone, Debug, PartialEq)]
pub(super) struct FieldChange {
    pub(super) path: FieldPath,
    pub(super) value: Option<Value>,
}

pub(super) struct FormState {
    pub(super) id: FormId,
    pub(super) initial_values: Value,
    pub(super) data: Value,
    pub(super) errors: ErrorMap,
    pub(super) touched: BTreeMap<FieldPath, bool>,
    pub(super) dirty: BTreeMap<FieldPath, bool>,
    pub(super) is_dirty: bool,
    pub(super) submit_state: SubmitState,
    pub(super) submit_count: u32,
    pub(super) submit_ticket: u64,
    /// Paths waiting for the next settle.
    pub(super) pending: BTreeSet<FieldPath>,
    pub(super) settle_ticket: ValidationTicket,
    /// Bumped by whole-state replacements; validation results from an older
    /// generation are discarded.
    pub(super) generation: u64,
    pub(super) in_flight: usize,
    /// Array edits applied while validation was in flight, oldest first.
    pub(super) layout_log: Vec<(FieldPath, ArrayOp)>,
    pub(super) layout_base: u64,
    pub(super) topics: BTreeSet<StateTopic>,
}

impl FormState {
    pub(super) fn layout_epoch(&self) -> u64 {
        self.layout_base + self.layout_log.len() as u64
    }

    pub(super) fn mark(&mut self, topics: &[StateTopic]) {
        self.topics.extend(topics.iter().copied());
    }

    pub(super) fn is_valid(&self) -> bool {
        self.errors.values().all(Vec::is_empty)
    }

    pub(super) fn refresh_is_dirty(&mut self) {
        let is_dirty = self.data != self.initial_values;
        if is_dirty != self.is_dirty {
            self.is_dirty = is_dirty;
            self.mark(&[StateTopic::IsDirty]);
        }
    }

    pub(super) fn refresh_dirty(&mut self, path: &FieldPath) {
        let dirty = path::read(&self.data, path) != path::read(&self.initial_values, path);
        set_flag(&mut self.dirty, path, dirty);
    }

    /// Runs the synchronous part of the observation step for the paths a
    /// write changed: dirty flags, touched flags and the change list for
    /// `on_change`. Changed paths are queued for validation per `mode`.
    pub(super) fn observe(
        &mut self,
        changed: BTreeSet<FieldPath>,
        mode: ValidationMode,
    ) -> Vec<FieldChange> {
        if changed.is_empty() {
            return Vec::new();
        }
        self.refresh_is_dirty();
        let mut changes = Vec::with_capacity(changed.len());
        for path in &changed {
            self.refresh_dirty(path);
            self.touched.insert(path.clone(), true);
            changes.push(FieldChange {
                path: path.clone(),
                value: path::read(&self.data, path).cloned(),
            });
        }
        if mode == ValidationMode::OnChange {
            self.pending.extend(changed);
        }
        self.mark(&[StateTopic::Data, StateTopic::Touched, StateTopic::Dirty]);
        changes
    }

    pub(super) fn snapshot(&self) -> FormSnapshot {
        FormSnapshot {
            initial_values: self.initial_values.clone(),
            data: self.data.clone(),
            errors: self.errors.clone(),
            touched: self.touched.clone(),
            dirty: self.dirty.clone(),
            is_valid: self.is_valid(),
            is_dirty: self.is_dirty,
            is_submitting: self.submit_state == SubmitState::Submitting,
            submit_state: self.submit_state,
            submit_count: self.submit_count,
        }
    }
}

#[derive(Clone)]
pub struct FormController {
    pub(super) options: FormOptions,
    pub(super) state: Arc<RwLock<FormState>>,
    pub(super) hooks: Arc<RwLock<FormHooks>>,
    pub(super) subscribers: Arc<RwLock<Subscribers>>,
}

impl FormController {
    pub fn new(initial: impl Into<Value>, options: FormOptions) -> FormResult<Self> {
        let initial = initial.into();
        check_form_root(&initial)?;
        let id = FormId::next();
        tracing::debug!(form = %id, "creating form controller");
        Ok(Self {
            options,
            state: Arc::new(RwLock::new(FormState {
                id,
                data: initial.clone(),
                initial_values: initial,
                errors: ErrorMap::new(),
                touched: BTreeMap::new(),
                dirty: BTreeMap::new(),
                is_dirty: false,
                submit_state: SubmitState::Idle,
                submit_count: 0,
                submit_ticket: 0,
                pending: BTreeSet::new(),
                settle_ticket: ValidationTicket(0),
                generation: 0,
                in_flight: 0,
                layout_log: Vec::new(),
                layout_base: 0,
                topics: BTreeSet::new(),
            })),
            hooks: Arc::new(RwLock::new(FormHooks::default())),
            subscribers: Arc::new(RwLock::new(Subscribers::default())),
        })
    }

    pub fn options(&self) -> FormOptions {
        self.options
    }

    pub fn form_id(&self) -> FormResult<FormId> {
        Ok(read_lock(&self.state, "reading form id")?.id)
    }

    pub fn on_change(
        &self,
        handler: impl Fn(&FieldPath, Option<&Value>) + Send + Sync + 'static,
    ) -> FormResult<()> {
        write_lock(&self.hooks, "registering change handler")?.on_change = Some(Arc::new(handler));
        Ok(())
    }

    pub fn on_submit<F, Fut>(&self, handler: F) -> FormResult<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FormResult<()>> + Send + 'static,
    {
        let wrapped: SubmitHandlerFn = Arc::new(move |data| Box::pin(handler(data)));
        write_lock(&self.hooks, "registering submit handler")?.on_submit = Some(wrapped);
        Ok(())
    }

    pub fn on_reset(&self, handler: impl Fn() + Send + Sync + 'static) -> FormResult<()> {
        write_lock(&self.hooks, "registering reset handler")?.on_reset = Some(Arc::new(handler));
        Ok(())
    }

    /// Calls `callback` with a fresh snapshot after every operation that
    /// touched `topic`.
    pub fn subscribe(
        &self,
        topic: StateTopic,
        callback: impl Fn(&FormSnapshot) + Send + Sync + 'static,
    ) -> FormResult<SubscriptionId> {
        self.add_subscriber(Some(topic), Arc::new(callback))
    }

    /// Calls `callback` after every operation that changed any state.
    pub fn subscribe_all(
        &self,
        callback: impl Fn(&FormSnapshot) + Send + Sync + 'static,
    ) -> FormResult<SubscriptionId> {
        self.add_subscriber(None, Arc::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> FormResult<bool> {
        Ok(write_lock(&self.subscribers, "removing subscriber")?
            .entries
            .remove(&id)
            .is_some())
    }

    fn add_subscriber(
        &self,
        topic: Option<StateTopic>,
        callback: Subscriber,
    ) -> FormResult<SubscriptionId> {
        let mut subscribers = write_lock(&self.subscribers, "adding subscriber")?;
        subscribers.next_id += 1;
        let id = SubscriptionId(subscribers.next_id);
        subscribers
            .entries
            .insert(id, SubscriberEntry { topic, callback });
        Ok(id)
    }

    pub fn set_data<P>(&self, path: P, value: impl Into<Value>) -> FormResult<()>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        let value = value.into();
        let changes = {
            let mut state = write_lock(&self.state, "writing form data")?;
            let anchor = write_anchor(&state.data, &path);
            let before = path::read(&state.data, &anchor).cloned();
            path::write(&mut state.data, &path, value)?;
            let changed =
                diff::changed_paths_at(&anchor, before.as_ref(), path::read(&state.data, &anchor));
            state.observe(changed, self.options.validate_mode)
        };
        self.dispatch(changes)
    }

    /// Deletes the key at `path`. Removing an array element this way shifts
    /// the elements after it without re-keying errors; use
    /// [`FormController::array_remove`] for that.
    pub fn remove_data<P>(&self, path: P) -> FormResult<Option<Value>>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        let (removed, changes) = {
            let mut state = write_lock(&self.state, "removing form data")?;
            let anchor = path.parent().unwrap_or_else(|| path.clone());
            let before = path::read(&state.data, &anchor).cloned();
            let removed = path::remove(&mut state.data, &path);
            let changed =
                diff::changed_paths_at(&anchor, before.as_ref(), path::read(&state.data, &anchor));
            (removed, state.observe(changed, self.options.validate_mode))
        };
        self.dispatch(changes)?;
        Ok(removed)
    }

    /// Replaces the whole data tree, diffing it against the current one.
    pub fn replace_data(&self, data: impl Into<Value>) -> FormResult<()> {
        let data = data.into();
        check_form_root(&data)?;
        let changes = {
            let mut state = write_lock(&self.state, "replacing form data")?;
            let before = std::mem::replace(&mut state.data, data);
            let changed = diff::changed_paths(&before, &state.data);
            state.observe(changed, self.options.validate_mode)
        };
        self.dispatch(changes)
    }

    pub fn set_initial_values(&self, initial: impl Into<Value>) -> FormResult<()> {
        let initial = initial.into();
        check_form_root(&initial)?;
        {
            let mut state = write_lock(&self.state, "replacing initial values")?;
            state.dirty = diff::changed_paths(&initial, &state.data)
                .into_iter()
                .map(|path| (path, true))
                .collect();
            state.initial_values = initial;
            state.refresh_is_dirty();
            state.mark(&[StateTopic::InitialValues, StateTopic::Dirty]);
        }
        self.flush_notifications()
    }

    /// Marks `path` as touched, as a blur does. In
    /// [`ValidationMode::OnBlur`] the field is queued for validation.
    pub fn touch<P>(&self, path: P) -> FormResult<()>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        {
            let mut state = write_lock(&self.state, "touching field")?;
            state.touched.insert(path.clone(), true);
            if self.options.validate_mode == ValidationMode::OnBlur {
                state.pending.insert(path);
            }
            state.mark(&[StateTopic::Touched]);
        }
        self.flush_notifications()
    }

    pub fn set_touched<P>(&self, path: P, touched: bool) -> FormResult<()>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        {
            let mut state = write_lock(&self.state, "setting touched flag")?;
            set_flag(&mut state.touched, &path, touched);
            state.mark(&[StateTopic::Touched]);
        }
        self.flush_notifications()
    }

    /// Sets the messages of one field. An empty list removes the entry.
    pub fn set_error<P>(&self, path: P, messages: Vec<String>) -> FormResult<()>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        {
            let mut state = write_lock(&self.state, "setting field error")?;
            if messages.is_empty() {
                state.errors.remove(&path);
            } else {
                state.errors.insert(path, messages);
            }
            state.mark(&[StateTopic::Errors, StateTopic::IsValid]);
        }
        self.flush_notifications()
    }

    pub fn remove_error<P>(&self, path: P) -> FormResult<()>
    where
        P: IntoFieldPath,
    {
        self.set_error(path, Vec::new())
    }

    pub fn set_errors(&self, errors: ErrorMap) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "replacing errors")?;
            state.errors = errors
                .into_iter()
                .filter(|(_, messages)| !messages.is_empty())
                .collect();
            state.mark(&[StateTopic::Errors, StateTopic::IsValid]);
        }
        self.flush_notifications()
    }

    pub fn clear_errors(&self) -> FormResult<()> {
        self.set_errors(ErrorMap::new())
    }

    pub async fn submit(&self) -> FormResult<SubmitOutcome> {
        self.run_submit(None::<fn(Value) -> std::future::Ready<FormResult<()>>>)
            .await
    }

    /// Submits with `callback` instead of the registered `on_submit` handler.
    pub async fn submit_with<F, Fut>(&self, callback: F) -> FormResult<SubmitOutcome>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = FormResult<()>>,
    {
        self.run_submit(Some(callback)).await
    }

    async fn run_submit<F, Fut>(&self, callback: Option<F>) -> FormResult<SubmitOutcome>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = FormResult<()>>,
    {
        let ticket = {
            let mut state = write_lock(&self.state, "preparing submit")?;
            if state.submit_state != SubmitState::Idle {
                tracing::debug!(form = %state.id, "submit already in flight");
                return Ok(SubmitOutcome::Skipped);
            }
            transition_submit_state(&mut state, SubmitState::Validating)?;
            state.submit_count = state.submit_count.saturating_add(1);
            state.submit_ticket += 1;
            state.submit_ticket
        };
        let guard = SubmitGuard {
            controller: self,
            ticket,
        };

        if self.validator()?.is_some() && !self.validate().await? {
            drop(guard);
            return Ok(SubmitOutcome::Rejected);
        }

        let data = {
            let mut state = write_lock(&self.state, "moving submit state to submitting")?;
            transition_submit_state(&mut state, SubmitState::Submitting)?;
            state.mark(&[StateTopic::IsSubmitting]);
            state.data.clone()
        };
        self.flush_notifications()?;

        let result = match callback {
            Some(callback) => callback(data).await,
            None => {
                let handler = read_lock(&self.hooks, "reading submit handler")?
                    .on_submit
                    .clone();
                match handler {
                    Some(handler) => handler(data).await,
                    None => Ok(()),
                }
            }
        };
        drop(guard);
        result.map(|()| SubmitOutcome::Submitted)
    }

    pub fn reset(&self) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "resetting form")?;
            state.data = state.initial_values.clone();
            state.errors.clear();
            state.touched.clear();
            state.dirty.clear();
            state.pending.clear();
            state.is_dirty = false;
            state.submit_state = SubmitState::Idle;
            state.generation += 1;
            state.mark(&[
                StateTopic::Data,
                StateTopic::Errors,
                StateTopic::Touched,
                StateTopic::Dirty,
                StateTopic::IsValid,
                StateTopic::IsDirty,
                StateTopic::IsSubmitting,
            ]);
        }
        let on_reset = read_lock(&self.hooks, "reading reset handler")?
            .on_reset
            .clone();
        if let Some(on_reset) = on_reset {
            on_reset();
        }
        self.flush_notifications()
    }

    /// Restores one subtree from the initial values and forgets its
    /// touched, dirty and error entries.
    pub fn reset_field<P>(&self, path: P) -> FormResult<FieldReset>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        let outcome = {
            let mut state = write_lock(&self.state, "resetting field")?;
            let outcome = match path::read(&state.initial_values, &path).cloned() {
                Some(initial) => {
                    path::write(&mut state.data, &path, initial)?;
                    FieldReset::Restored
                }
                None => {
                    tracing::warn!(
                        form = %state.id,
                        path = %path,
                        "field has no initial value; clearing it instead"
                    );
                    path::remove(&mut state.data, &path);
                    FieldReset::Cleared
                }
            };
            state.touched.retain(|key, _| !key.starts_with(&path));
            state.dirty.retain(|key, _| !key.starts_with(&path));
            state.errors.retain(|key, _| !key.starts_with(&path));
            state.pending.retain(|key| !key.starts_with(&path));
            for ancestor in path.ancestors().collect::<Vec<_>>() {
                state.refresh_dirty(&ancestor);
            }
            state.refresh_is_dirty();
            state.mark(&[
                StateTopic::Data,
                StateTopic::Touched,
                StateTopic::Dirty,
                StateTopic::Errors,
                StateTopic::IsValid,
            ]);
            outcome
        };
        self.flush_notifications()?;
        Ok(outcome)
    }

    pub fn data(&self) -> FormResult<Value> {
        Ok(read_lock(&self.state, "reading form data")?.data.clone())
    }

    pub fn value<P>(&self, path: P) -> FormResult<Option<Value>>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        Ok(path::read(&read_lock(&self.state, "reading field value")?.data, &path).cloned())
    }

    pub fn initial_values(&self) -> FormResult<Value> {
        Ok(read_lock(&self.state, "reading initial values")?
            .initial_values
            .clone())
    }

    pub fn errors(&self) -> FormResult<ErrorMap> {
        Ok(read_lock(&self.state, "reading errors")?.errors.clone())
    }

    pub fn field_errors<P>(&self, path: P) -> FormResult<Vec<String>>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        Ok(read_lock(&self.state, "reading field errors")?
            .errors
            .get(&path)
            .cloned()
            .unwrap_or_default())
    }

    /// First error of a field, once the field was touched or a submit was
    /// attempted.
    pub fn field_error_for_display<P>(&self, path: P) -> FormResult<Option<String>>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        let state = read_lock(&self.state, "reading display error message")?;
        let touched = state.touched.get(&path).copied().unwrap_or(false);
        if !touched && state.submit_count == 0 {
            return Ok(None);
        }
        Ok(state
            .errors
            .get(&path)
            .and_then(|messages| messages.first().cloned()))
    }

    pub fn is_touched<P>(&self, path: P) -> FormResult<bool>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        Ok(read_lock(&self.state, "reading touched flag")?
            .touched
            .get(&path)
            .copied()
            .unwrap_or(false))
    }

    pub fn is_field_dirty<P>(&self, path: P) -> FormResult<bool>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        Ok(read_lock(&self.state, "reading dirty flag")?
            .dirty
            .get(&path)
            .copied()
            .unwrap_or(false))
    }

    pub fn is_valid(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading validity")?.is_valid())
    }

    pub fn is_dirty(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading dirty state")?.is_dirty)
    }

    pub fn is_submitting(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading submit state")?.submit_state == SubmitState::Submitting)
    }

    pub fn submit_state(&self) -> FormResult<SubmitState> {
        Ok(read_lock(&self.state, "reading submit state")?.submit_state)
    }

    /// True when no validation is queued or running.
    pub fn is_settled(&self) -> FormResult<bool> {
        let state = read_lock(&self.state, "reading settle state")?;
        Ok(state.pending.is_empty() && state.in_flight == 0)
    }

    pub fn snapshot(&self) -> FormResult<FormSnapshot> {
        Ok(read_lock(&self.state, "creating form snapshot")?.snapshot())
    }

    pub(super) fn validator(&self) -> FormResult<Option<Arc<dyn FormValidator>>> {
        Ok(read_lock(&self.hooks, "reading validator")?.validator.clone())
    }

    /// Fires `on_change` for each change, then notifies subscribers. Runs
    /// outside the state lock so handlers may call back into the form.
    pub(super) fn dispatch(&self, changes: Vec<FieldChange>) -> FormResult<()> {
        if !changes.is_empty() {
            let on_change = read_lock(&self.hooks, "reading change handler")?
                .on_change
                .clone();
            if let Some(on_change) = on_change {
                for change in &changes {
                    on_change(&change.path, change.value.as_ref());
                }
            }
        }
        self.flush_notifications()
    }

    pub(super) fn flush_notifications(&self) -> FormResult<()> {
        let (topics, snapshot) = {
            let mut state = write_lock(&self.state, "collecting notifications")?;
            if state.topics.is_empty() {
                return Ok(());
            }
            (std::mem::take(&mut state.topics), state.snapshot())
        };
        let callbacks = read_lock(&self.subscribers, "reading subscribers")?
            .entries
            .values()
            .filter(|entry| entry.topic.is_none_or(|topic| topics.contains(&topic)))
            .map(|entry| entry.callback.clone())
            .collect::<Vec<_>>();
        for callback in callbacks {
            callback(&snapshot);
        }
        Ok(())
    }
}

struct SubmitGuard<'a> {
    controller: &'a FormController,
    ticket: u64,
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        let Ok(mut state) = self.controller.state.write() else {
            return;
        };
        // A reset may have started a newer submit cycle.
        if state.submit_ticket != self.ticket || state.submit_state == SubmitState::Idle {
            return;
        }
        state.submit_state = SubmitState::Idle;
        state.mark(&[StateTopic::IsSubmitting]);
        drop(state);
        let _ = self.controller.flush_notifications();
    }
}

pub(super) fn transition_submit_state(state: &mut FormState, next: SubmitState) -> FormResult<()> {
    let current = state.submit_state;
    if current == next {
        return Ok(());
    }

    let allowed = matches!(
        (current, next),
        (SubmitState::Idle, SubmitState::Validating)
            | (SubmitState::Validating, SubmitState::Submitting)
            | (_, SubmitState::Idle)
    );
    if !allowed {
        return Err(FormError::InvalidStateTransition {
            from: current,
            to: next,
        });
    }
    state.submit_state = next;
    Ok(())
}

pub(super) fn set_flag(map: &mut BTreeMap<FieldPath, bool>, path: &FieldPath, flag: bool) {
    if flag {
        map.insert(path.clone(), true);
    } else {
        map.remove(path);
    }
}

/// Deepest prefix of `path` present before a write, so that padding and
/// auto-created containers are part of the diff.
fn write_anchor(data: &Value, path: &FieldPath) -> FieldPath {
    std::iter::once(path.clone())
        .chain(path.ancestors())
        .find(|candidate| path::exists(data, candidate))
        .unwrap_or_else(|| path.top_level())
}

fn check_form_root(value: &Value) -> FormResult<()> {
    let Some(entries) = value.as_object() else {
        return Err(FormError::RootNotObject(value.kind()));
    };
    if let Some(key) = entries.keys().find(|key| key.contains(SEPARATOR)) {
        return Err(FormError::InvalidFieldName(key.clone()));
    }
    Ok(())
}

pub(super) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(super) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}
