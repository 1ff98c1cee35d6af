//! Shared-state alias for values owned jointly by the listener thread, the
//! sender thread and the caller.

use parking_lot::Mutex;
use std::sync::Arc;

/// Mutex-protected value shared across threads
pub type ThreadSafe<T> = Arc<Mutex<T>>;

#[inline]
pub fn thread_safe<T>(value: T) -> ThreadSafe<T> {
    Arc::new(Mutex::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_shared_between_threads() {
        let value: ThreadSafe<Vec<u32>> = thread_safe(Vec::new());
        let other = value.clone();
        thread::spawn(move || other.lock().push(7)).join().unwrap();
        assert_eq!(*value.lock(), vec![7]);
    }
}
