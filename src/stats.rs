//! Engine-wide counters for monitoring

use std::sync::atomic::{AtomicUsize, Ordering};

static CALLS_MADE: AtomicUsize = AtomicUsize::new(0);
static MARSHALING_ERRORS: AtomicUsize = AtomicUsize::new(0);
static CACHES_BUILT: AtomicUsize = AtomicUsize::new(0);
static CLOSURES_CREATED: AtomicUsize = AtomicUsize::new(0);
static CLOSURES_DISPOSED: AtomicUsize = AtomicUsize::new(0);

/// Snapshot of the marshaling counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarshalStats {
    pub calls_made: usize,
    pub marshaling_errors: usize,
    pub caches_built: usize,
    pub closures_created: usize,
    pub closures_disposed: usize,
}

impl MarshalStats {
    /// Closures created but not yet disposed
    pub fn closures_live(&self) -> usize {
        self.closures_created.saturating_sub(self.closures_disposed)
    }
}

/// Get marshaling statistics
pub fn stats() -> MarshalStats {
    MarshalStats {
        calls_made: CALLS_MADE.load(Ordering::Relaxed),
        marshaling_errors: MARSHALING_ERRORS.load(Ordering::Relaxed),
        caches_built: CACHES_BUILT.load(Ordering::Relaxed),
        closures_created: CLOSURES_CREATED.load(Ordering::Relaxed),
        closures_disposed: CLOSURES_DISPOSED.load(Ordering::Relaxed),
    }
}

/// Zero every counter
pub fn reset() {
    for counter in [
        &CALLS_MADE,
        &MARSHALING_ERRORS,
        &CACHES_BUILT,
        &CLOSURES_CREATED,
        &CLOSURES_DISPOSED,
    ] {
        counter.store(0, Ordering::Relaxed);
    }
}

#[inline]
pub(crate) fn record_call() {
    CALLS_MADE.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_error() {
    MARSHALING_ERRORS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_cache_built() {
    CACHES_BUILT.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_closure_created() {
    CLOSURES_CREATED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_closure_disposed() {
    CLOSURES_DISPOSED.fetch_add(1, Ordering::Relaxed);
}
