//! Per-thread state with an explicit lifecycle
//!
//! Each thread sees its own slot. Slots are created on first use and dropped
//! again as soon as they hold nothing, so threads that exit without cleaning up
//! leave nothing behind unless they abandon live state.

use std::collections::HashMap;
use std::thread::{self, ThreadId};

use indexmap::IndexMap;
use parking_lot::Mutex;

/// State that can tell whether it still holds anything worth keeping
pub trait Vacancy {
   /// Returns true when the value is equivalent to a freshly created one
   fn is_vacant(&self) -> bool;
}

impl<T> Vacancy for Vec<T> {
   fn is_vacant(&self) -> bool {
      self.is_empty()
   }
}

impl<K, V> Vacancy for IndexMap<K, V> {
   fn is_vacant(&self) -> bool {
      self.is_empty()
   }
}

/// A map from thread identity to a value of `T`
///
/// The slot lock is held while a closure passed to [`with`](Self::with) runs,
/// so closures must not reach back into the same state.
pub struct ThreadScopedState<T> {
   slots: Mutex<HashMap<ThreadId, T>>,
}

impl<T: Default + Vacancy> ThreadScopedState<T> {
   pub fn new() -> Self {
      Self {
         slots: Mutex::new(HashMap::new()),
      }
   }

   /// Runs `f` against the calling thread's value, creating it on first use
   pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
      let id = thread::current().id();
      let mut slots = self.slots.lock();
      let slot = slots.entry(id).or_default();
      let result = f(slot);
      if slot.is_vacant() {
         slots.remove(&id);
      }
      result
   }

   /// Reads the calling thread's value without creating one
   pub fn inspect<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
      let slots = self.slots.lock();
      f(slots.get(&thread::current().id()))
   }

   /// Removes and returns the calling thread's value
   pub fn take(&self) -> T {
      self
         .slots
         .lock()
         .remove(&thread::current().id())
         .unwrap_or_default()
   }

   /// Drops whatever the calling thread has stored
   pub fn clear_for_current_thread(&self) {
      self.slots.lock().remove(&thread::current().id());
   }

   /// Number of threads currently holding a slot
   pub fn occupied_slots(&self) -> usize {
      self.slots.lock().len()
   }
}

impl<T: Default + Vacancy> Default for ThreadScopedState<T> {
   fn default() -> Self {
      Self::new()
   }
}
