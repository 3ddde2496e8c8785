use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, trace};

use super::rules::ValidationRule;
use super::subscription::{Subscribers, Subscription};
use super::validation::{ValidationError, ValidationStatus};
use super::value::{FieldValue, FormState};

static FORM_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FormId(pub u64);

impl FormId {
    pub fn next() -> Self {
        Self(FORM_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

/// Per-field generation number. Bumped by every value write and every
/// validation run on the field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationTicket(pub u64);

/// What happens to the outcome of a validation run that was overtaken by a
/// newer write or a newer run on the same field.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StaleValidation {
    /// Only the run holding the latest ticket commits status, error cache
    /// and notifications. The caller still receives its errors.
    #[default]
    Discard,
    /// Every run commits its outcome, even over a fresher `NotStarted`.
    Commit,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FormOptions {
    pub stale_validation: StaleValidation,
    /// Quiet period before [`FormEngine::change_field_value`] validates.
    pub change_debounce: Duration,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            stale_validation: StaleValidation::Discard,
            change_debounce: Duration::from_millis(300),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FieldMeta {
    pub status: ValidationStatus,
    pub errors: Vec<ValidationError>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FormError {
    #[error("validation failed with {} error(s)", .0.len())]
    Invalid(Vec<ValidationError>),
    #[error("field '{0}' is not registered")]
    UnknownField(String),
    #[error("field '{field}' type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("index {index} is out of range for field '{field}' with {len} item(s)")]
    IndexOutOfRange {
        field: String,
        index: usize,
        len: usize,
    },
    #[error("submit handler failed: {0}")]
    Submit(String),
    #[error("failed to convert form state: {0}")]
    Serialization(String),
    #[error("form state lock poisoned while {0}")]
    StatePoisoned(&'static str),
}

impl FormError {
    /// Errors carried by [`FormError::Invalid`], empty for every other
    /// variant.
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            FormError::Invalid(errors) => errors,
            _ => &[],
        }
    }
}

pub type FormResult<T> = Result<T, FormError>;

pub(super) struct FieldStore {
    pub(super) initial: FormState,
    pub(super) values: FormState,
    pub(super) field_meta: BTreeMap<String, FieldMeta>,
    pub(super) tickets: BTreeMap<String, ValidationTicket>,
    pub(super) revisions: BTreeMap<String, u64>,
}

/// Outcome of resetting one field's cached error and status.
#[derive(Clone, Copy, Debug, Default)]
struct MetaReset {
    cleared_errors: bool,
    status_reset: bool,
}

struct WriteEffect {
    field: String,
    value: FieldValue,
    reset: MetaReset,
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum WriteMode {
    Merge,
    Replace,
}

impl FieldStore {
    pub(super) fn next_ticket(&mut self, field: &str) -> ValidationTicket {
        let next = ValidationTicket(self.tickets.get(field).map_or(0, |ticket| ticket.0) + 1);
        self.tickets.insert(field.to_owned(), next);
        next
    }

    pub(super) fn is_latest_ticket(&self, field: &str, ticket: ValidationTicket) -> bool {
        self.tickets.get(field).copied() == Some(ticket)
    }

    fn reset_meta(&mut self, field: &str) -> MetaReset {
        let Some(meta) = self.field_meta.get_mut(field) else {
            return MetaReset::default();
        };
        let reset = MetaReset {
            cleared_errors: !meta.errors.is_empty(),
            status_reset: meta.status != ValidationStatus::NotStarted,
        };
        meta.errors.clear();
        meta.status = ValidationStatus::NotStarted;
        reset
    }

    fn write_field(&mut self, field: String, value: FieldValue) -> WriteEffect {
        self.values.insert(field.clone(), value.clone());
        *self.revisions.entry(field.clone()).or_default() += 1;
        self.next_ticket(&field);
        let reset = self.reset_meta(&field);
        WriteEffect {
            field,
            value,
            reset,
        }
    }

    fn remove_field(&mut self, field: String) -> WriteEffect {
        self.values.remove(&field);
        *self.revisions.entry(field.clone()).or_default() += 1;
        self.next_ticket(&field);
        let reset = self.reset_meta(&field);
        WriteEffect {
            field,
            value: FieldValue::Undefined,
            reset,
        }
    }
}

/// Form state container with a validation pipeline and per-field observers.
///
/// Cloning yields another handle to the same form.
#[derive(Clone)]
pub struct FormEngine {
    pub(super) id: FormId,
    pub(super) options: FormOptions,
    pub(super) store: Arc<RwLock<FieldStore>>,
    pub(super) rules: Arc<RwLock<BTreeMap<String, Vec<ValidationRule>>>>,
    pub(super) subscribers: Arc<Subscribers>,
}

impl FormEngine {
    pub fn new(initial: FormState) -> Self {
        Self::with_options(initial, FormOptions::default())
    }

    pub fn with_options(initial: FormState, options: FormOptions) -> Self {
        Self {
            id: FormId::next(),
            options,
            store: Arc::new(RwLock::new(FieldStore {
                initial: initial.clone(),
                values: initial,
                field_meta: BTreeMap::new(),
                tickets: BTreeMap::new(),
                revisions: BTreeMap::new(),
            })),
            rules: Arc::new(RwLock::new(BTreeMap::new())),
            subscribers: Arc::new(Subscribers::new()),
        }
    }

    pub fn form_id(&self) -> FormId {
        self.id
    }

    pub fn options(&self) -> FormOptions {
        self.options
    }

    /// Snapshot of every field value.
    pub fn get_state(&self) -> FormResult<FormState> {
        Ok(read_lock(&self.store, "reading form state")?.values.clone())
    }

    pub fn get_field_value(&self, field: impl AsRef<str>) -> FormResult<FieldValue> {
        Ok(read_lock(&self.store, "reading field value")?
            .values
            .value(field.as_ref()))
    }

    /// The whole state for `None`, otherwise a projection holding exactly the
    /// requested fields.
    pub fn get_fields_value(&self, fields: Option<&[&str]>) -> FormResult<FormState> {
        let store = read_lock(&self.store, "reading field values")?;
        Ok(match fields {
            None => store.values.clone(),
            Some(fields) => fields
                .iter()
                .map(|field| (*field, store.values.value(field)))
                .collect(),
        })
    }

    /// Writes `value`, then notifies change subscribers, clears a cached
    /// error (notifying error subscribers) and resets the validation status
    /// to `NotStarted` (notifying status subscribers), in that order.
    pub fn set_field_value(&self, field: impl AsRef<str>, value: impl Into<FieldValue>) -> FormResult<()> {
        let field = field.as_ref();
        let value = value.into();
        self.write_fields("writing field value", WriteMode::Merge, move |_| {
            Ok((FormState::from([(field, value)]), ()))
        })
    }

    /// Like [`set_field_value`](Self::set_field_value) with the new value
    /// computed from the current one. `update` runs while the state lock is
    /// held and must not call back into the engine.
    pub fn update_field_value<F>(&self, field: impl AsRef<str>, update: F) -> FormResult<()>
    where
        F: FnOnce(&FieldValue) -> FieldValue,
    {
        self.try_update_field_value(field.as_ref(), "updating field value", move |current| {
            Ok((update(current), ()))
        })
    }

    /// Merges `patch` into the state. Every key of the patch gets the same
    /// notifications as [`set_field_value`](Self::set_field_value).
    pub fn set_fields_value(&self, patch: FormState) -> FormResult<()> {
        self.write_fields("writing field values", WriteMode::Merge, move |_| Ok((patch, ())))
    }

    /// Merges the partial state returned by `update`. `update` runs while the
    /// state lock is held and must not call back into the engine.
    pub fn update_fields_value<F>(&self, update: F) -> FormResult<()>
    where
        F: FnOnce(&FormState) -> FormState,
    {
        self.write_fields("updating field values", WriteMode::Merge, move |state| {
            Ok((update(state), ()))
        })
    }

    /// Restores the initial snapshot. Fields missing from the snapshot are
    /// removed and their change subscribers see `Undefined`.
    pub fn reset_fields(&self) -> FormResult<()> {
        let initial = read_lock(&self.store, "reading initial state")?.initial.clone();
        self.write_fields("resetting fields", WriteMode::Replace, move |_| Ok((initial, ())))
    }

    /// Replaces the reset baseline and applies it as the current state.
    pub fn set_initial_state(&self, state: FormState) -> FormResult<()> {
        write_lock(&self.store, "replacing initial state")?.initial = state.clone();
        self.write_fields("applying initial state", WriteMode::Replace, move |_| Ok((state, ())))
    }

    /// Overwrites the rule set of `field`. An empty rule list is ignored.
    pub fn set_field_rules(
        &self,
        field: impl AsRef<str>,
        rules: impl IntoIterator<Item = ValidationRule>,
    ) -> FormResult<()> {
        let rules = rules.into_iter().collect::<Vec<_>>();
        if rules.is_empty() {
            return Ok(());
        }
        write_lock(&self.rules, "setting field rules")?.insert(field.as_ref().to_owned(), rules);
        Ok(())
    }

    /// Appends to the rule set of `field`. An empty rule list is ignored.
    pub fn add_field_rules(
        &self,
        field: impl AsRef<str>,
        rules: impl IntoIterator<Item = ValidationRule>,
    ) -> FormResult<()> {
        let rules = rules.into_iter().collect::<Vec<_>>();
        if rules.is_empty() {
            return Ok(());
        }
        write_lock(&self.rules, "adding field rules")?
            .entry(field.as_ref().to_owned())
            .or_default()
            .extend(rules);
        Ok(())
    }

    pub fn field_rules(&self, field: impl AsRef<str>) -> FormResult<Vec<ValidationRule>> {
        Ok(read_lock(&self.rules, "reading field rules")?
            .get(field.as_ref())
            .cloned()
            .unwrap_or_default())
    }

    /// Entry point for a binding that mounts a field: installs `rules` and
    /// seeds the value with `Undefined` when the field is not in state yet.
    pub fn register_field(
        &self,
        field: impl AsRef<str>,
        rules: impl IntoIterator<Item = ValidationRule>,
    ) -> FormResult<()> {
        let field = field.as_ref();
        self.set_field_rules(field, rules)?;
        let present = read_lock(&self.store, "checking registered field")?
            .values
            .contains(field);
        if !present {
            self.set_field_value(field, FieldValue::Undefined)?;
        }
        Ok(())
    }

    /// State keys plus every field with rules, in name order.
    pub fn known_fields(&self) -> FormResult<Vec<String>> {
        let mut fields = read_lock(&self.store, "listing known fields")?
            .values
            .keys()
            .map(str::to_owned)
            .collect::<BTreeSet<_>>();
        fields.extend(read_lock(&self.rules, "listing fields with rules")?.keys().cloned());
        Ok(fields.into_iter().collect())
    }

    pub fn is_known_field(&self, field: impl AsRef<str>) -> FormResult<bool> {
        let field = field.as_ref();
        if read_lock(&self.store, "checking known field")?.values.contains(field) {
            return Ok(true);
        }
        Ok(read_lock(&self.rules, "checking field rules")?.contains_key(field))
    }

    pub fn get_field_validation_status(&self, field: impl AsRef<str>) -> FormResult<ValidationStatus> {
        Ok(read_lock(&self.store, "reading validation status")?
            .field_meta
            .get(field.as_ref())
            .map(|meta| meta.status)
            .unwrap_or_default())
    }

    pub fn field_meta(&self, field: impl AsRef<str>) -> FormResult<FieldMeta> {
        Ok(read_lock(&self.store, "reading field meta")?
            .field_meta
            .get(field.as_ref())
            .cloned()
            .unwrap_or_default())
    }

    /// Errors of the latest committed validation run, without validating.
    pub fn get_cached_field_errors(&self, field: impl AsRef<str>) -> FormResult<Vec<ValidationError>> {
        Ok(self.field_meta(field)?.errors)
    }

    /// Injects errors produced outside the rule pipeline, such as a server
    /// response. Any validation run in flight for the field is superseded.
    pub fn set_field_errors<I, S>(&self, field: impl AsRef<str>, texts: I) -> FormResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let field = field.as_ref();
        let (errors, status, state) = {
            let mut store = write_lock(&self.store, "setting external field errors")?;
            let value = store.values.value(field);
            let errors = texts
                .into_iter()
                .map(|text| ValidationError::external(field, value.clone(), text))
                .collect::<Vec<_>>();
            let status = if errors.is_empty() {
                ValidationStatus::Success
            } else {
                ValidationStatus::Error
            };
            store.next_ticket(field);
            let meta = store.field_meta.entry(field.to_owned()).or_default();
            meta.errors = errors.clone();
            meta.status = status;
            (errors, status, store.values.clone())
        };
        debug!(form = self.id.0, field, errors = errors.len(), "external field errors set");
        self.notify_errors(field, &errors, &state)?;
        self.notify_status(field, status, &errors)
    }

    /// Empties the error cache and returns the field to `NotStarted`.
    pub fn clear_field_errors(&self, field: impl AsRef<str>) -> FormResult<()> {
        let field = field.as_ref();
        let (reset, state) = {
            let mut store = write_lock(&self.store, "clearing field errors")?;
            store.next_ticket(field);
            let reset = store.reset_meta(field);
            let state = reset.cleared_errors.then(|| store.values.clone());
            (reset, state)
        };
        if let Some(state) = state {
            self.notify_errors(field, &[], &state)?;
        }
        if reset.status_reset {
            self.notify_status(field, ValidationStatus::NotStarted, &[])?;
        }
        Ok(())
    }

    pub fn on_field_change<F>(&self, field: impl AsRef<str>, callback: F) -> FormResult<Subscription>
    where
        F: Fn(&FieldValue) + Send + Sync + 'static,
    {
        self.subscribers.change.subscribe(field.as_ref(), Arc::new(callback))
    }

    /// `callback` receives the field's errors and the form state at the time
    /// they were committed.
    pub fn on_field_error<F>(&self, field: impl AsRef<str>, callback: F) -> FormResult<Subscription>
    where
        F: Fn(&[ValidationError], &FormState) + Send + Sync + 'static,
    {
        self.subscribers.error.subscribe(field.as_ref(), Arc::new(callback))
    }

    pub fn on_field_validation_status_change<F>(
        &self,
        field: impl AsRef<str>,
        callback: F,
    ) -> FormResult<Subscription>
    where
        F: Fn(ValidationStatus, &[ValidationError]) + Send + Sync + 'static,
    {
        self.subscribers.status.subscribe(field.as_ref(), Arc::new(callback))
    }

    pub(super) fn field_revision(&self, field: &str) -> FormResult<u64> {
        Ok(read_lock(&self.store, "reading field revision")?
            .revisions
            .get(field)
            .copied()
            .unwrap_or_default())
    }

    /// Replaces the value of `field` with the one computed by `update`. An
    /// `Err` from `update` leaves the state untouched and notifies nobody.
    pub(super) fn try_update_field_value<F, R>(
        &self,
        field: &str,
        context: &'static str,
        update: F,
    ) -> FormResult<R>
    where
        F: FnOnce(&FieldValue) -> FormResult<(FieldValue, R)>,
    {
        self.write_fields(context, WriteMode::Merge, move |state| {
            let (next, output) = update(&state.value(field))?;
            Ok((FormState::from([(field, next)]), output))
        })
    }

    fn write_fields<F, R>(&self, context: &'static str, mode: WriteMode, build: F) -> FormResult<R>
    where
        F: FnOnce(&FormState) -> FormResult<(FormState, R)>,
    {
        let (effects, state, output) = {
            let mut store = write_lock(&self.store, context)?;
            let (patch, output) = build(&store.values)?;
            let removed = match mode {
                WriteMode::Merge => Vec::new(),
                WriteMode::Replace => store
                    .values
                    .keys()
                    .filter(|field| !patch.contains(field))
                    .map(str::to_owned)
                    .collect::<Vec<_>>(),
            };
            let mut effects = patch
                .into_iter()
                .map(|(field, value)| store.write_field(field, value))
                .collect::<Vec<_>>();
            effects.extend(removed.into_iter().map(|field| store.remove_field(field)));
            let state = effects
                .iter()
                .any(|effect| effect.reset.cleared_errors)
                .then(|| store.values.clone());
            (effects, state, output)
        };

        for effect in &effects {
            self.notify_change(&effect.field, &effect.value)?;
            if let Some(state) = state.as_ref().filter(|_| effect.reset.cleared_errors) {
                self.notify_errors(&effect.field, &[], state)?;
            }
            if effect.reset.status_reset {
                self.notify_status(&effect.field, ValidationStatus::NotStarted, &[])?;
            }
        }
        Ok(output)
    }

    pub(super) fn notify_change(&self, field: &str, value: &FieldValue) -> FormResult<()> {
        let callbacks = self.subscribers.change.snapshot(field)?;
        trace!(form = self.id.0, field, subscribers = callbacks.len(), "field change");
        for callback in callbacks {
            callback(value);
        }
        Ok(())
    }

    pub(super) fn notify_errors(
        &self,
        field: &str,
        errors: &[ValidationError],
        state: &FormState,
    ) -> FormResult<()> {
        let callbacks = self.subscribers.error.snapshot(field)?;
        trace!(form = self.id.0, field, subscribers = callbacks.len(), errors = errors.len(), "field errors");
        for callback in callbacks {
            callback(errors, state);
        }
        Ok(())
    }

    pub(super) fn notify_status(
        &self,
        field: &str,
        status: ValidationStatus,
        errors: &[ValidationError],
    ) -> FormResult<()> {
        let callbacks = self.subscribers.status.snapshot(field)?;
        trace!(form = self.id.0, field, subscribers = callbacks.len(), ?status, "field status");
        for callback in callbacks {
            callback(status, errors);
        }
        Ok(())
    }
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
