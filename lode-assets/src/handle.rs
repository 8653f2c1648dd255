use crate::error::LodeError;
use crate::key::ResourceKey;
use crossbeam_channel::Sender;
use lode_base::OnceSlot;
use std::any::Any;
use std::fmt::Formatter;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Lifecycle of a resource. Pending is the initial state; Loaded and Failed
/// are terminal. There are no other transitions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResourceState {
    Pending,
    Loaded,
    Failed,
}

impl ResourceState {
    pub fn is_terminal(self) -> bool {
        self != ResourceState::Pending
    }
}

const STATE_PENDING: u8 = 0;
const STATE_LOADED: u8 = 1;
const STATE_FAILED: u8 = 2;
// A terminal transition has been claimed but payload/error is still being
// written. Externally indistinguishable from Pending.
const STATE_MARKING: u8 = 3;

pub type Payload = Box<dyn Any + Send + Sync>;
type SubscriberFn = Box<dyn FnOnce(&ResourceHandle) + Send>;

pub(crate) struct HandleInner {
    key: ResourceKey,
    path: String,
    state: AtomicU8,
    payload: OnceSlot<Payload>,
    error: OnceSlot<LodeError>,
    subscribers: Mutex<Vec<SubscriberFn>>,
    sub_resources: Mutex<Vec<ResourceHandle>>,
    // None for detached handles (unknown resource type) that never entered
    // the cache index.
    drop_tx: Option<Sender<ResourceKey>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if let Some(drop_tx) = &self.drop_tx {
            // The cache may already be gone during teardown.
            let _ = drop_tx.send(self.key);
        }
    }
}

/// A shared, ref-counted handle to a resource. Cloning is `addRef`,
/// dropping is `release`; when the last external clone drops, the resource
/// (payload and sub-resource references included) is destroyed and the
/// cache is signalled to evict its index entry.
#[derive(Clone)]
pub struct ResourceHandle {
    inner: Arc<HandleInner>,
}

/// Non-owning reference held by the cache index so that a cached entry does
/// not keep an unreferenced resource alive.
#[derive(Clone)]
pub(crate) struct WeakResourceHandle {
    inner: Weak<HandleInner>,
}

impl WeakResourceHandle {
    pub(crate) fn upgrade(&self) -> Option<ResourceHandle> {
        self.inner.upgrade().map(|inner| ResourceHandle { inner })
    }
}

impl ResourceHandle {
    pub(crate) fn new_pending(
        key: ResourceKey,
        path: &str,
        drop_tx: Sender<ResourceKey>,
    ) -> Self {
        ResourceHandle {
            inner: Arc::new(HandleInner {
                key,
                path: path.to_string(),
                state: AtomicU8::new(STATE_PENDING),
                payload: OnceSlot::new(),
                error: OnceSlot::new(),
                subscribers: Mutex::new(Vec::new()),
                sub_resources: Mutex::new(Vec::new()),
                drop_tx: Some(drop_tx),
            }),
        }
    }

    /// Builds a handle that is already Failed and is not tracked by any
    /// cache. Used for unknown resource types, which must not occupy index
    /// space.
    pub(crate) fn new_failed(
        path: &str,
        error: LodeError,
    ) -> Self {
        let handle = ResourceHandle {
            inner: Arc::new(HandleInner {
                key: ResourceKey::from_path(path),
                path: path.to_string(),
                state: AtomicU8::new(STATE_FAILED),
                payload: OnceSlot::new(),
                error: OnceSlot::new(),
                subscribers: Mutex::new(Vec::new()),
                sub_resources: Mutex::new(Vec::new()),
                drop_tx: None,
            }),
        };
        handle.inner.error.set(error);
        handle
    }

    pub(crate) fn downgrade(&self) -> WeakResourceHandle {
        WeakResourceHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn key(&self) -> ResourceKey {
        self.inner.key
    }

    /// The normalized path this resource was requested with.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn state(&self) -> ResourceState {
        match self.inner.state.load(Ordering::Acquire) {
            STATE_LOADED => ResourceState::Loaded,
            STATE_FAILED => ResourceState::Failed,
            _ => ResourceState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == ResourceState::Pending
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == ResourceState::Loaded
    }

    pub fn has_failed(&self) -> bool {
        self.state() == ResourceState::Failed
    }

    /// Typed access to the loaded payload. Returns None unless the resource
    /// is Loaded and the payload is a `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        if !self.is_loaded() {
            return None;
        }
        self.inner.payload.get().and_then(|p| p.downcast_ref::<T>())
    }

    /// The failure reason, if the resource is Failed.
    pub fn error(&self) -> Option<&LodeError> {
        if !self.has_failed() {
            return None;
        }
        self.inner.error.get()
    }

    /// Number of strong references currently alive, including clones held
    /// by an in-flight load task.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// True if both handles refer to the same underlying resource.
    pub fn same_resource(
        &self,
        other: &ResourceHandle,
    ) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Registers a callback invoked exactly once with the final state. If
    /// the resource is already terminal the callback runs synchronously
    /// before `subscribe` returns; otherwise it runs on whichever thread
    /// performs the terminal transition, in registration order.
    pub fn subscribe<F>(
        &self,
        callback: F,
    ) where
        F: FnOnce(&ResourceHandle) + Send + 'static,
    {
        {
            let mut subscribers = self.inner.subscribers.lock().unwrap();
            if !self.state().is_terminal() {
                subscribers.push(Box::new(callback));
                return;
            }
            // Terminal: drop the lock before running user code.
        }
        callback(self);
    }

    /// Blocks the calling thread until the resource reaches a terminal
    /// state, then returns it. Do not call from a load task running on the
    /// same single-threaded pool that must finish this resource.
    pub fn wait(&self) -> ResourceState {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.subscribe(move |handle| {
            let _ = tx.send(handle.state());
        });
        rx.recv().unwrap_or_else(|_| self.state())
    }

    /// Takes a strong reference to a resource this one depends on, so a
    /// parent cannot outlive needed children. Ownership only; load ordering
    /// is the concrete load logic's concern.
    pub fn add_sub_resource(
        &self,
        sub_resource: ResourceHandle,
    ) {
        self.inner.sub_resources.lock().unwrap().push(sub_resource);
    }

    pub fn sub_resource_count(&self) -> usize {
        self.inner.sub_resources.lock().unwrap().len()
    }

    /// Terminal transition performed by the load task. Writes the payload,
    /// publishes Loaded, and drains subscribers.
    pub(crate) fn mark_loaded(
        &self,
        payload: Payload,
    ) {
        if !self.claim_terminal("mark_loaded") {
            return;
        }
        self.inner.payload.set(payload);
        self.inner.state.store(STATE_LOADED, Ordering::Release);
        log::trace!("resource '{}' loaded", self.path());
        self.notify_subscribers();
    }

    /// Terminal transition for a failed load. Failures are logged here so
    /// fire-and-forget callers still leave a record.
    pub(crate) fn mark_failed(
        &self,
        error: LodeError,
    ) {
        if !self.claim_terminal("mark_failed") {
            return;
        }
        log::error!("resource '{}' failed to load: {}", self.path(), error);
        self.inner.error.set(error);
        self.inner.state.store(STATE_FAILED, Ordering::Release);
        self.notify_subscribers();
    }

    /// Claims the single terminal transition. A second claim is a broken
    /// at-most-one-load invariant somewhere upstream: panic in debug
    /// builds, keep the first terminal state in release builds.
    fn claim_terminal(
        &self,
        operation: &str,
    ) -> bool {
        match self.inner.state.compare_exchange(
            STATE_PENDING,
            STATE_MARKING,
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => true,
            Err(_) => {
                if cfg!(debug_assertions) {
                    panic!("{} called on non-Pending resource '{}'", operation, self.path());
                }
                log::error!(
                    "{} called on non-Pending resource '{}'; keeping existing state",
                    operation,
                    self.path()
                );
                false
            }
        }
    }

    fn notify_subscribers(&self) {
        let drained = {
            let mut subscribers = self.inner.subscribers.lock().unwrap();
            std::mem::take(&mut *subscribers)
        };

        // Invoked outside the lock; a subscriber may itself call subscribe.
        for callback in drained {
            callback(self);
        }
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("path", &self.path())
            .field("key", &self.key())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn pending_handle(path: &str) -> ResourceHandle {
        let (drop_tx, _drop_rx) = crossbeam_channel::unbounded();
        ResourceHandle::new_pending(ResourceKey::from_path(path), path, drop_tx)
    }

    #[test]
    fn starts_pending() {
        let handle = pending_handle("a.txt");
        assert_eq!(handle.state(), ResourceState::Pending);
        assert!(handle.is_pending());
        assert!(handle.payload::<String>().is_none());
        assert!(handle.error().is_none());
    }

    #[test]
    fn mark_loaded_publishes_payload() {
        let handle = pending_handle("a.txt");
        handle.mark_loaded(Box::new("hello".to_string()));

        assert!(handle.is_loaded());
        assert_eq!(handle.payload::<String>().unwrap(), "hello");
        // Wrong type reads as None.
        assert!(handle.payload::<u32>().is_none());
    }

    #[test]
    fn mark_failed_records_error() {
        let handle = pending_handle("a.txt");
        handle.mark_failed(LodeError::from("bad data"));

        assert!(handle.has_failed());
        assert!(handle.payload::<String>().is_none());
        assert!(matches!(handle.error(), Some(LodeError::StringError(_))));
    }

    #[test]
    #[should_panic(expected = "non-Pending")]
    fn double_mark_panics_in_debug() {
        let handle = pending_handle("a.txt");
        handle.mark_loaded(Box::new(1_u32));
        handle.mark_failed(LodeError::from("late failure"));
    }

    #[test]
    fn subscribers_fire_in_registration_order() {
        let handle = pending_handle("a.txt");
        let (tx, rx) = mpsc::channel();

        for i in 0..3 {
            let tx = tx.clone();
            handle.subscribe(move |h| {
                assert!(h.is_loaded());
                let _ = tx.send(i);
            });
        }

        handle.mark_loaded(Box::new(()));
        let order: Vec<i32> = rx.try_iter().collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn late_subscriber_fires_synchronously() {
        let handle = pending_handle("a.txt");
        handle.mark_failed(LodeError::from("nope"));

        let (tx, rx) = mpsc::channel();
        handle.subscribe(move |h| {
            assert!(h.has_failed());
            let _ = tx.send(());
        });
        // Synchronous replay: already delivered by the time subscribe returns.
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn detached_failed_handle_replays_synchronously() {
        let handle = ResourceHandle::new_failed(
            "model.xyz",
            LodeError::UnknownResourceType("xyz".to_string()),
        );
        assert!(handle.has_failed());

        let (tx, rx) = mpsc::channel();
        handle.subscribe(move |h| {
            let _ = tx.send(h.state());
        });
        assert_eq!(rx.try_recv().unwrap(), ResourceState::Failed);
    }

    #[test]
    fn wait_returns_terminal_state() {
        let handle = pending_handle("a.txt");

        let waiter = {
            let handle = handle.clone();
            std::thread::spawn(move || handle.wait())
        };

        handle.mark_loaded(Box::new(5_u8));
        assert_eq!(waiter.join().unwrap(), ResourceState::Loaded);

        // Already terminal: returns immediately.
        assert_eq!(handle.wait(), ResourceState::Loaded);
    }

    #[test]
    fn drop_signals_cache_with_key() {
        let (drop_tx, drop_rx) = crossbeam_channel::unbounded();
        let key = ResourceKey::from_path("a.txt");
        let handle = ResourceHandle::new_pending(key, "a.txt", drop_tx);
        let clone = handle.clone();

        drop(handle);
        assert!(drop_rx.try_recv().is_err());

        drop(clone);
        assert_eq!(drop_rx.try_recv().unwrap(), key);
    }

    #[test]
    fn sub_resources_released_exactly_once() {
        struct DropTracker(crossbeam_channel::Sender<&'static str>);
        impl Drop for DropTracker {
            fn drop(&mut self) {
                let _ = self.0.send("dropped");
            }
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let parent = pending_handle("parent.scene");

        for name in ["child_a.txt", "child_b.txt"] {
            let child = pending_handle(name);
            child.mark_loaded(Box::new(DropTracker(tx.clone())));
            parent.add_sub_resource(child);
        }
        drop(tx);

        assert_eq!(parent.sub_resource_count(), 2);
        assert!(rx.try_recv().is_err());

        drop(parent);
        assert_eq!(rx.iter().count(), 2);
    }
}
