//! In-process change notification: `Property<T>` holds a value and tells
//! its subscribers about every write, `Signal<T>` is the same without a
//! stored value. Delivery is serialized per observable, so all
//! subscribers see the identical sequence, and callbacks run on the
//! thread that performed the write.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread::{self, ThreadId},
};

use crate::Error;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    entries: Mutex<Vec<(u64, Listener<T>)>>,
    next_id: AtomicU64,
}

impl<T: 'static> Listeners<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        })
    }

    fn add(self: &Arc<Self>, listener: Listener<T>) -> Subscription
    where
        T: Send + Sync,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().unwrap().push((id, listener));

        let weak = Arc::downgrade(self);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(listeners) = weak.upgrade() {
                    listeners
                        .entries
                        .lock()
                        .unwrap()
                        .retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    // Snapshot so callbacks are free to connect and disconnect while a
    // notification is in flight.
    fn snapshot(&self) -> Vec<Listener<T>> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }
}

/// Serializes delivery for one observable and remembers which thread is
/// currently inside a callback, so same-thread re-entry can be refused
/// instead of deadlocking on the gate.
struct DispatchGate {
    gate: Mutex<()>,
    owner: Mutex<Option<ThreadId>>,
}

impl DispatchGate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Mutex::new(()),
            owner: Mutex::new(None),
        })
    }

    fn held_by_current_thread(&self) -> bool {
        *self.owner.lock().unwrap() == Some(thread::current().id())
    }

    fn dispatch<T>(&self, listeners: &Listeners<T>, value: &T)
    where
        T: 'static,
    {
        let _serialized = self.gate.lock().unwrap();
        *self.owner.lock().unwrap() = Some(thread::current().id());
        for listener in listeners.snapshot() {
            listener(value);
        }
        *self.owner.lock().unwrap() = None;
    }
}

/// Handle for one subscription. Dropping it disconnects the callback.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn disconnect(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subscription {{ }}")
    }
}

/// Stateless broadcast. Clones share the subscriber list, so a cloned
/// signal can be handed to a producer thread as the emitting end.
pub struct Signal<T> {
    listeners: Arc<Listeners<T>>,
    dispatch: Arc<DispatchGate>,
}

impl<T: Send + Sync + 'static> Signal<T> {
    pub fn new() -> Self {
        Self {
            listeners: Listeners::new(),
            dispatch: DispatchGate::new(),
        }
    }

    pub fn connect(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.listeners.add(Arc::new(listener))
    }

    pub fn emit(&self, value: &T) {
        if self.dispatch.held_by_current_thread() {
            tracing::error!("signal re-entered from one of its own callbacks, dropping emission");
            return;
        }
        self.dispatch.dispatch(&self.listeners, value);
    }
}

impl<T: Send + Sync + 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
            dispatch: self.dispatch.clone(),
        }
    }
}

/// A value with change notification. Every write notifies, including
/// writes of a value equal to the current one; subscribers rely on that
/// for refresh semantics.
pub struct Property<T> {
    value: Arc<Mutex<T>>,
    listeners: Arc<Listeners<T>>,
    dispatch: Arc<DispatchGate>,
}

impl<T: Clone + Send + Sync + 'static> Property<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: Arc::new(Mutex::new(initial)),
            listeners: Listeners::new(),
            dispatch: DispatchGate::new(),
        }
    }

    pub fn get(&self) -> T {
        self.value.lock().unwrap().clone()
    }

    /// Store `next` and notify. Fails with [`Error::ReentrancyRejected`]
    /// when called from inside one of this property's own callbacks.
    pub fn set(&self, next: T) -> Result<(), Error> {
        if self.dispatch.held_by_current_thread() {
            return Err(Error::ReentrancyRejected);
        }

        let _serialized = self.dispatch.gate.lock().unwrap();
        *self.value.lock().unwrap() = next.clone();
        *self.dispatch.owner.lock().unwrap() = Some(thread::current().id());
        for listener in self.listeners.snapshot() {
            listener(&next);
        }
        *self.dispatch.owner.lock().unwrap() = None;
        Ok(())
    }

    /// Read-modify-write under the dispatch gate. Returns whether a new
    /// value was stored. The closure deciding on the replacement runs
    /// with the gate held, so concurrent writers cannot interleave
    /// between the read and the write.
    pub fn replace_if<F>(&self, decide: F) -> Result<bool, Error>
    where
        F: FnOnce(&T) -> Option<T>,
    {
        if self.dispatch.held_by_current_thread() {
            return Err(Error::ReentrancyRejected);
        }

        let _serialized = self.dispatch.gate.lock().unwrap();
        let next = decide(&self.value.lock().unwrap());
        let Some(next) = next else {
            return Ok(false);
        };

        *self.value.lock().unwrap() = next.clone();
        *self.dispatch.owner.lock().unwrap() = Some(thread::current().id());
        for listener in self.listeners.snapshot() {
            listener(&next);
        }
        *self.dispatch.owner.lock().unwrap() = None;
        Ok(true)
    }

    /// The change source of this property.
    pub fn connect(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.listeners.add(Arc::new(listener))
    }
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            listeners: self.listeners.clone(),
            dispatch: self.dispatch.clone(),
        }
    }
}
