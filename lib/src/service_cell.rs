//! Storage cell backing the `define_service!` registry pattern.
//!
//! Each generated service holds a `ServiceCell<Services>` populated once at
//! boot by the crate that owns the real implementation (e.g. `core` for
//! `driver_runtime`, `drivers` for `tty`). Crates on the other side of the
//! dependency graph call the generated accessor and never see the concrete
//! type doing the work.

use crate::once_lock::OnceLock;

pub struct ServiceCell<T: 'static> {
    inner: OnceLock<&'static T>,
}

impl<T: 'static> ServiceCell<T> {
    pub const fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    /// Registers the implementation. Only the first call takes effect.
    pub fn set(&self, services: &'static T) {
        self.inner.call_once(|| services);
    }

    /// Returns the registered implementation.
    ///
    /// # Panics
    ///
    /// Panics if called before the owning crate has registered its
    /// implementation. Service registration happens during early boot,
    /// well before any code that could observe this path runs.
    pub fn get(&self) -> &'static T {
        self.inner
            .get()
            .copied()
            .expect("service accessed before registration")
    }

    pub fn is_registered(&self) -> bool {
        self.inner.is_completed()
    }
}
