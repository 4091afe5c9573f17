use std::sync::{LockResult, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    component: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), component, op, "rwlock.read")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    component: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), component, op, "rwlock.write")
}

// Every guarded mutation is a single map operation, so a poisoned guard never
// exposes a half-written entry.
fn recover<G>(
    result: LockResult<G>,
    component: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            component,
            lock_kind,
            result = "poisoned_recovered",
            "Recovered from poisoned render cache lock"
        );
        poisoned.into_inner()
    })
}
