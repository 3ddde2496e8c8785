//! Observer registries backing the `on_*` methods of
//! [`FormEngine`](super::FormEngine).
//!
//! Three registries are keyed by field name (change, error, validation
//! status) and one is global (submit). Every registration returns a
//! [`Subscription`] that removes exactly that registration.
//!
//! # Invariants
//!
//! 1. Callbacks run in registration order.
//! 2. Callbacks are cloned out of the registry before they run, so a callback
//!    may subscribe, unsubscribe or call back into the engine.
//! 3. `Subscription::unsubscribe` is idempotent and never touches other
//!    registrations on the same field.

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use super::controller::{FormResult, read_lock, write_lock};
use super::validation::{ValidationError, ValidationStatus};
use super::value::{FieldValue, FormState};

static SUBSCRIPTION_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    pub fn next() -> Self {
        Self(SUBSCRIPTION_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

pub(super) type ChangeCallback = Arc<dyn Fn(&FieldValue) + Send + Sync>;
pub(super) type ErrorCallback = Arc<dyn Fn(&[ValidationError], &FormState) + Send + Sync>;
pub(super) type StatusCallback = Arc<dyn Fn(ValidationStatus, &[ValidationError]) + Send + Sync>;
pub(super) type SubmitCallback = Arc<dyn Fn(&FormState) -> FormResult<()> + Send + Sync>;

type Remover = Box<dyn Fn(SubscriptionId) + Send + Sync>;

/// Disposer handle returned by the engine's `on_*` methods.
///
/// Dropping the handle keeps the callback registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription {
    id: SubscriptionId,
    active: AtomicBool,
    remove: Remover,
}

impl Subscription {
    fn new(id: SubscriptionId, remove: Remover) -> Self {
        Self {
            id,
            active: AtomicBool::new(true),
            remove,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            (self.remove)(self.id);
        }
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Callbacks keyed by field name.
pub(super) struct FieldChannel<C> {
    entries: RwLock<BTreeMap<String, Vec<(SubscriptionId, C)>>>,
}

impl<C> FieldChannel<C>
where
    C: Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub(super) fn subscribe(self: &Arc<Self>, field: &str, callback: C) -> FormResult<Subscription> {
        let id = SubscriptionId::next();
        write_lock(&self.entries, "registering field subscriber")?
            .entry(field.to_owned())
            .or_default()
            .push((id, callback));

        let channel: Weak<Self> = Arc::downgrade(self);
        let field = field.to_owned();
        Ok(Subscription::new(
            id,
            Box::new(move |id| {
                if let Some(channel) = channel.upgrade() {
                    channel.remove(&field, id);
                }
            }),
        ))
    }

    fn remove(&self, field: &str, id: SubscriptionId) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(callbacks) = entries.get_mut(field) {
            callbacks.retain(|(entry, _)| *entry != id);
            if callbacks.is_empty() {
                entries.remove(field);
            }
        }
    }

    pub(super) fn snapshot(&self, field: &str) -> FormResult<Vec<C>> {
        Ok(read_lock(&self.entries, "reading field subscribers")?
            .get(field)
            .map(|callbacks| callbacks.iter().map(|(_, callback)| callback.clone()).collect())
            .unwrap_or_default())
    }

    #[cfg(test)]
    pub(super) fn len(&self, field: &str) -> FormResult<usize> {
        Ok(read_lock(&self.entries, "counting field subscribers")?
            .get(field)
            .map_or(0, Vec::len))
    }
}

/// Callbacks with no field key.
pub(super) struct Channel<C> {
    entries: RwLock<Vec<(SubscriptionId, C)>>,
}

impl<C> Channel<C>
where
    C: Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub(super) fn subscribe(self: &Arc<Self>, callback: C) -> FormResult<Subscription> {
        let id = SubscriptionId::next();
        write_lock(&self.entries, "registering subscriber")?.push((id, callback));

        let channel: Weak<Self> = Arc::downgrade(self);
        Ok(Subscription::new(
            id,
            Box::new(move |id| {
                if let Some(channel) = channel.upgrade() {
                    channel.remove(id);
                }
            }),
        ))
    }

    fn remove(&self, id: SubscriptionId) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.retain(|(entry, _)| *entry != id);
    }

    pub(super) fn snapshot(&self) -> FormResult<Vec<C>> {
        Ok(read_lock(&self.entries, "reading subscribers")?
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect())
    }
}

pub(super) struct Subscribers {
    pub(super) change: Arc<FieldChannel<ChangeCallback>>,
    pub(super) error: Arc<FieldChannel<ErrorCallback>>,
    pub(super) status: Arc<FieldChannel<StatusCallback>>,
    pub(super) submit: Arc<Channel<SubmitCallback>>,
}

impl Subscribers {
    pub(super) fn new() -> Self {
        Self {
            change: Arc::new(FieldChannel::new()),
            error: Arc::new(FieldChannel::new()),
            status: Arc::new(FieldChannel::new()),
            submit: Arc::new(Channel::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_callback(counter: &Arc<AtomicUsize>) -> ChangeCallback {
        let counter = counter.clone();
        Arc::new(move |_value: &FieldValue| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn unsubscribe_is_idempotent_and_scoped_to_one_registration() {
        let channel = Arc::new(FieldChannel::<ChangeCallback>::new());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let first_sub = channel
            .subscribe("name", counter_callback(&first))
            .expect("subscribe first");
        let _second_sub = channel
            .subscribe("name", counter_callback(&second))
            .expect("subscribe second");
        assert_eq!(channel.len("name").expect("len"), 2);

        first_sub.unsubscribe();
        first_sub.unsubscribe();
        assert!(!first_sub.is_active());
        assert_eq!(channel.len("name").expect("len"), 1);

        for callback in channel.snapshot("name").expect("snapshot") {
            callback(&FieldValue::from("x"));
        }
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handle_outliving_channel_is_harmless() {
        let channel = Arc::new(Channel::<SubmitCallback>::new());
        let subscription = channel
            .subscribe(Arc::new(|_state: &FormState| -> FormResult<()> { Ok(()) }))
            .expect("subscribe");
        drop(channel);
        subscription.unsubscribe();
        assert!(!subscription.is_active());
    }
}
