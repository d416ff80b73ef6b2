use std::sync::{Mutex, MutexGuard};

/// Lock `mutex`, taking the guard back even if another thread panicked while
/// holding it. Render threads and timer tasks share state this way and a
/// single panic must not wedge teardown.
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
