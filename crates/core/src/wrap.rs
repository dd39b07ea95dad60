//! One wrapper per native handle
//!
//! [`WrapRegistry`] maps a handle's identity to the wrapper bound to it.
//! The registry holds only weak references: the scripting runtime owns the
//! wrapper, and the wrapper calls [`WrapRegistry::release`] from its
//! teardown.
//!
//! Each key gets its own slot. The table lock covers only lookup, insert
//! and erase; the factory runs outside it, serialized per slot, so
//! concurrent first observations of one handle construct a single wrapper
//! and every caller observes it.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::debug;

// ============================================================================
// Handle identity
// ============================================================================

/// Identity of a shared native handle
///
/// Compares and hashes by address. Holding the key keeps the allocation
/// reserved, so the address cannot be reused for a different handle, but it
/// does not keep the handle alive.
pub struct HandleKey<T: ?Sized>(Weak<T>);

impl<T: ?Sized> HandleKey<T> {
    pub fn of(handle: &Arc<T>) -> Self {
        Self(Arc::downgrade(handle))
    }

    fn addr(&self) -> usize {
        Weak::as_ptr(&self.0) as *const () as usize
    }

    /// Whether the handle is still alive
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub fn upgrade(&self) -> Option<Arc<T>> {
        self.0.upgrade()
    }
}

impl<T: ?Sized> Clone for HandleKey<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: ?Sized> PartialEq for HandleKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ?Sized> Eq for HandleKey<T> {}

impl<T: ?Sized> Hash for HandleKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for HandleKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandleKey({:#x})", self.addr())
    }
}

// ============================================================================
// Shared pointers
// ============================================================================

/// Reference-counted pointer the registry can hold weakly
///
/// The registry never upgrades while holding its table lock, so a wrapper's
/// teardown may call [`WrapRegistry::release`] from any thread.
pub trait Shared: Clone {
    type Weak;

    fn downgrade(this: &Self) -> Self::Weak;
    fn upgrade(weak: &Self::Weak) -> Option<Self>;
    /// Liveness without taking a strong reference
    fn is_alive(weak: &Self::Weak) -> bool;
    /// Address of the pointee, for ownership checks in [`WrapRegistry::release`]
    fn weak_addr(weak: &Self::Weak) -> usize;
}

impl<T: ?Sized> Shared for Arc<T> {
    type Weak = Weak<T>;

    fn downgrade(this: &Self) -> Weak<T> {
        Arc::downgrade(this)
    }

    fn upgrade(weak: &Weak<T>) -> Option<Self> {
        weak.upgrade()
    }

    fn is_alive(weak: &Weak<T>) -> bool {
        weak.strong_count() > 0
    }

    fn weak_addr(weak: &Weak<T>) -> usize {
        Weak::as_ptr(weak) as *const () as usize
    }
}

impl<T: ?Sized> Shared for Rc<T> {
    type Weak = std::rc::Weak<T>;

    fn downgrade(this: &Self) -> std::rc::Weak<T> {
        Rc::downgrade(this)
    }

    fn upgrade(weak: &std::rc::Weak<T>) -> Option<Self> {
        weak.upgrade()
    }

    fn is_alive(weak: &std::rc::Weak<T>) -> bool {
        weak.strong_count() > 0
    }

    fn weak_addr(weak: &std::rc::Weak<T>) -> usize {
        std::rc::Weak::as_ptr(weak) as *const () as usize
    }
}

// ============================================================================
// Registry
// ============================================================================

struct Slot<W: Shared> {
    bound: OnceLock<W::Weak>,
}

impl<W: Shared> Slot<W> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bound: OnceLock::new(),
        })
    }

    /// True once bound to a wrapper that has since been destroyed
    fn is_dead(&self) -> bool {
        match self.bound.get() {
            Some(weak) => !W::is_alive(weak),
            None => false,
        }
    }
}

pub struct WrapRegistry<K, W: Shared> {
    name: &'static str,
    slots: Mutex<HashMap<K, Arc<Slot<W>>>>,
}

impl<K, W> WrapRegistry<K, W>
where
    K: Eq + Hash + Clone + fmt::Debug,
    W: Shared,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Slot for `key`, replacing one whose wrapper has died
    fn slot(&self, key: &K) -> Arc<Slot<W>> {
        let mut slots = self.slots.lock();
        match slots.get(key) {
            Some(slot) if !slot.is_dead() => slot.clone(),
            _ => {
                let slot = Slot::new();
                slots.insert(key.clone(), slot.clone());
                slot
            }
        }
    }

    /// The live wrapper for `key`, or the one `factory` creates
    ///
    /// `factory` runs at most once per binding of `key`, outside the table
    /// lock. Callers racing the first construction wait for it and receive
    /// the same wrapper.
    pub fn get_or_create(&self, key: K, factory: impl FnOnce() -> W) -> W {
        let mut factory = Some(factory);
        loop {
            let slot = self.slot(&key);
            let mut created = None;
            let weak = slot.bound.get_or_init(|| {
                let wrapper = match factory.take() {
                    Some(factory) => factory(),
                    // Taking the factory always returns below.
                    None => unreachable!("wrapper factory consumed twice"),
                };
                let weak = W::downgrade(&wrapper);
                created = Some(wrapper);
                weak
            });
            if let Some(wrapper) = created {
                debug!(target: "rtcbridge::wrap", registry = self.name, ?key, "bound new wrapper");
                return wrapper;
            }
            if let Some(wrapper) = W::upgrade(weak) {
                return wrapper;
            }
            // Bound wrapper died between binding and this lookup: rebind.
        }
    }

    /// The live wrapper for `key`, if any
    pub fn get(&self, key: &K) -> Option<W> {
        let slot = self.slots.lock().get(key).cloned()?;
        slot.bound.get().and_then(W::upgrade)
    }

    /// Unbind `key` if it is still bound to `wrapper` (by address) or to a dead wrapper
    ///
    /// Idempotent. Never unbinds a newer wrapper, nor a slot whose
    /// construction is still in progress. Returns whether an entry was removed.
    pub fn release<T: ?Sized>(&self, key: &K, wrapper: *const T) -> bool {
        let addr = wrapper as *const () as usize;
        let mut slots = self.slots.lock();
        let owned = match slots.get(key).and_then(|slot| slot.bound.get()) {
            Some(weak) => W::weak_addr(weak) == addr || !W::is_alive(weak),
            None => false,
        };
        if owned {
            slots.remove(key);
            debug!(target: "rtcbridge::wrap", registry = self.name, ?key, "released wrapper");
        }
        owned
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Drop every entry; wrappers themselves are untouched
    pub fn clear(&self) -> usize {
        let mut slots = self.slots.lock();
        let count = slots.len();
        slots.clear();
        if count > 0 {
            debug!(target: "rtcbridge::wrap", registry = self.name, count, "registry cleared");
        }
        count
    }
}
