//! Thread-safe registry of room event subscribers.

use std::{
    cell::Cell,
    collections::HashMap,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use parking_lot::{ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::error;
use uuid::Uuid;

use crate::event::{InviteEvent, RoomEvent};

/// Capability implemented by anything that wants decoded events.
///
/// Callbacks run on the sync loop; a slow listener delays delivery to every
/// other listener, so heavy work should be handed off (see [`ChannelListener`]).
pub trait EventListener: Send + Sync {
    fn notify(&self, event: &RoomEvent);

    /// Stripped state for rooms the user was invited to. Ignored by default.
    fn notify_invite(&self, invite: &InviteEvent) {
        let _ = invite;
    }
}

impl<F> EventListener for F
where
    F: Fn(&RoomEvent) + Send + Sync,
{
    fn notify(&self, event: &RoomEvent) {
        self(event)
    }
}

/// Pushes every event onto an unbounded queue for consumption elsewhere.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<RoomEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RoomEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventListener for ChannelListener {
    fn notify(&self, event: &RoomEvent) {
        // A dropped receiver only means nobody is reading any more.
        let _ = self.tx.send(event.clone());
    }
}

/// Fans events out to any number of `broadcast` subscribers.
///
/// Lagging subscribers lose the oldest events, as `broadcast` does.
#[derive(Debug, Clone)]
pub struct BroadcastListener {
    tx: broadcast::Sender<RoomEvent>,
}

impl BroadcastListener {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.tx.subscribe()
    }
}

impl EventListener for BroadcastListener {
    fn notify(&self, event: &RoomEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Opaque identity of one registration, used only for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerHandle(Uuid);

impl fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct ListenerSlot {
    handle: ListenerHandle,
    listener: Arc<dyn EventListener>,
    // Held for the duration of every invocation; removal takes it to flip the
    // flag, so it waits out a callback already running on another thread.
    // Reentrant so a listener can remove itself from inside its callback.
    active: ReentrantMutex<Cell<bool>>,
}

impl ListenerSlot {
    fn invoke(&self, deliver: impl FnOnce(&dyn EventListener)) -> bool {
        let active = self.active.lock();
        if !active.get() {
            return false;
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| deliver(self.listener.as_ref())));
        if outcome.is_err() {
            error!(listener = %self.handle, "event listener panicked; continuing dispatch");
        }
        true
    }
}

/// Set of registered listeners keyed by handle.
#[derive(Default)]
pub struct ListenerRegistry {
    slots: RwLock<HashMap<ListenerHandle, Arc<ListenerSlot>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: impl EventListener + 'static) -> ListenerHandle {
        self.add_shared(Arc::new(listener))
    }

    /// Register a listener that is also referenced elsewhere.
    pub fn add_shared(&self, listener: Arc<dyn EventListener>) -> ListenerHandle {
        let handle = ListenerHandle(Uuid::new_v4());
        let slot = Arc::new(ListenerSlot {
            handle,
            listener,
            active: ReentrantMutex::new(Cell::new(true)),
        });
        self.slots.write().insert(handle, slot);
        handle
    }

    /// Unregister a listener. Once this returns the listener is never invoked
    /// again, including from snapshots taken before the call.
    ///
    /// Returns `false` when the handle was not registered.
    pub fn remove(&self, handle: ListenerHandle) -> bool {
        let Some(slot) = self.slots.write().remove(&handle) else {
            return false;
        };
        slot.active.lock().set(false);
        true
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Stable view of the current listeners for one dispatch round.
    pub fn snapshot(&self) -> ListenerSnapshot {
        ListenerSnapshot {
            slots: self.slots.read().values().cloned().collect(),
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Listeners captured at the start of a dispatch round.
pub struct ListenerSnapshot {
    slots: Vec<Arc<ListenerSlot>>,
}

impl ListenerSnapshot {
    /// Deliver one event to every listener still registered; returns how many received it.
    pub fn deliver(&self, event: &RoomEvent) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.invoke(|listener| listener.notify(event)))
            .count()
    }

    pub fn deliver_invite(&self, invite: &InviteEvent) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.invoke(|listener| listener.notify_invite(invite)))
            .count()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
