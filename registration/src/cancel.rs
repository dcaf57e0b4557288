use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A cooperative cancellation flag shared between the caller and a running
/// registration.
///
/// The registration polls it between ICP iterations, pyramid levels and
/// seeds, never inside a linear solve.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
