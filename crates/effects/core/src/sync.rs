//! Process-wide synchronization for property values and effect bindings.
//!
//! Every mutation of type metadata, property cells and effect bindings runs
//! under the single [`SyncRoot`] returned by [`sync_root`]. The lock is
//! reentrant: a modifier folding one property may read other properties, and a
//! change callback may write them, all on the same thread.
//!
//! Fine-grained interior state is kept behind ordinary mutexes that are never
//! held across user callbacks; see [`lock`].

use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Reentrant process-wide lock.
#[derive(Debug)]
pub struct SyncRoot {
    owner: Mutex<Ownership>,
    released: Condvar,
}

#[derive(Debug)]
struct Ownership {
    thread: Option<ThreadId>,
    depth: usize,
}

impl SyncRoot {
    pub const fn new() -> Self {
        Self {
            owner: Mutex::new(Ownership {
                thread: None,
                depth: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Acquires the lock, blocking while another thread holds it.
    ///
    /// Re-entering from the owning thread only increases the hold depth.
    pub fn enter(&self) -> SyncGuard<'_> {
        let me = thread::current().id();
        let mut owner = lock(&self.owner);
        loop {
            match owner.thread {
                None => {
                    owner.thread = Some(me);
                    owner.depth = 1;
                    break;
                }
                Some(holder) if holder == me => {
                    owner.depth += 1;
                    break;
                }
                Some(_) => {
                    owner = self
                        .released
                        .wait(owner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        SyncGuard {
            root: self,
            _not_send: PhantomData,
        }
    }

    /// Returns true if the calling thread currently holds the lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        lock(&self.owner).thread == Some(thread::current().id())
    }

    fn exit(&self) {
        let mut owner = lock(&self.owner);
        owner.depth = owner.depth.saturating_sub(1);
        if owner.depth == 0 {
            owner.thread = None;
            drop(owner);
            self.released.notify_one();
        }
    }
}

impl Default for SyncRoot {
    fn default() -> Self {
        Self::new()
    }
}

/// Hold on a [`SyncRoot`]. Released on drop, on the thread that acquired it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SyncGuard<'a> {
    root: &'a SyncRoot,
    _not_send: PhantomData<*const ()>,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.root.exit();
    }
}

/// Returns the lock shared by the whole property and effect subsystem.
pub fn sync_root() -> &'static SyncRoot {
    static ROOT: SyncRoot = SyncRoot::new();
    &ROOT
}

/// Locks an interior mutex, recovering the data if a panicking thread poisoned it.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
