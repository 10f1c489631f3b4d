use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

/// A tiny pool of reusable scratch values.
///
/// Matching engines need a pile of per-call scratch (thread pools, job
/// stacks, capture buffers). Allocating it fresh on every `match_at` would
/// dominate matching on small inputs, so a program keeps a pool per engine
/// family and each call borrows a cached value, returning it on drop.
///
/// Values start from `Default` and size themselves lazily on first use, so
/// the pool needs no construction callback.
pub struct Pool<T> {
    stack: Mutex<Vec<T>>,
}

/// A guard providing access to a pooled value. Dropping it returns the value
/// to the pool.
#[derive(Debug)]
pub struct PoolGuard<'a, T: Default> {
    pool: &'a Pool<T>,
    val: Option<T>,
}

impl<T: Default> Pool<T> {
    /// Create an empty pool.
    pub fn new() -> Pool<T> {
        Pool { stack: Mutex::new(vec![]) }
    }

    /// Fetch a value from the pool, creating one if none are free.
    pub fn get(&self) -> PoolGuard<'_, T> {
        let mut stack = self.stack.lock().unwrap();
        let val = stack.pop().unwrap_or_default();
        PoolGuard { pool: self, val: Some(val) }
    }

    fn put(&self, val: T) {
        let mut stack = self.stack.lock().unwrap();
        stack.push(val);
    }
}

impl<T: Default> Default for Pool<T> {
    fn default() -> Pool<T> {
        Pool::new()
    }
}

impl<'a, T: Default> Deref for PoolGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.val.as_ref().unwrap()
    }
}

impl<'a, T: Default> DerefMut for PoolGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.val.as_mut().unwrap()
    }
}

impl<'a, T: Default> Drop for PoolGuard<'a, T> {
    fn drop(&mut self) {
        if let Some(val) = self.val.take() {
            self.pool.put(val);
        }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let len = self.stack.lock().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("Pool").field("cached", &len).finish()
    }
}
