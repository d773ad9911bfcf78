use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

use tracing::warn;

fn record_recovery(kind: &'static str) {
    warn!(lock = kind, "Recovering from poisoned lock");
}

pub fn rwlock_read_or_recover<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        record_recovery("rwlock_read");
        poisoned.into_inner()
    })
}

pub fn rwlock_write_or_recover<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        record_recovery("rwlock_write");
        poisoned.into_inner()
    })
}

pub fn mutex_lock_or_recover<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        record_recovery("mutex");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_mutex_recovers_after_panic() {
        let lock = Arc::new(Mutex::new(vec![1]));
        let poisoner = Arc::clone(&lock);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(lock.is_poisoned());
        let mut guard = mutex_lock_or_recover(&lock);
        guard.push(2);
        assert_eq!(*guard, vec![1, 2]);
    }

    #[test]
    fn test_rwlock_helpers_on_healthy_lock() {
        let lock = RwLock::new(5);
        {
            let mut w = rwlock_write_or_recover(&lock);
            *w += 1;
        }
        assert_eq!(*rwlock_read_or_recover(&lock), 6);
    }
}
