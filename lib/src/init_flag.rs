//! One-shot and re-entrant-guard atomic flags used to sequence driver init.
//!
//! [`InitFlag`] answers "has this already happened, and if not, am I the one
//! who gets to do it": [`init_once()`] races callers and reports `true` to
//! exactly one of them, [`is_set()`] checks without racing, and [`reset()`]
//! lets a device be reclaimed after hot-unplug. [`StateFlag`] is the
//! complementary non-reentrant section guard used by interrupt handlers that
//! must not recurse into their own initialization.
//!
//! [`init_once()`]: InitFlag::init_once
//! [`is_set()`]: InitFlag::is_set
//! [`reset()`]: InitFlag::reset

use core::sync::atomic::{AtomicBool, Ordering};

/// A flag that can be set exactly once (until [`reset()`](InitFlag::reset)).
pub struct InitFlag {
    set: AtomicBool,
}

impl InitFlag {
    #[inline]
    pub const fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
        }
    }

    /// Attempts to transition false -> true. Returns `true` for the caller
    /// that won the race; all others get `false`.
    #[inline]
    pub fn init_once(&self) -> bool {
        self.set
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Alias for [`init_once()`](Self::init_once) read at call sites that are
    /// claiming a device rather than guarding one-time initialization.
    #[inline]
    pub fn claim(&self) -> bool {
        self.init_once()
    }

    /// Unconditionally marks the flag set, with no race reporting.
    #[inline]
    pub fn mark_set(&self) {
        self.set.store(true, Ordering::Release);
    }

    /// Clears the flag so it can be claimed again.
    #[inline]
    pub fn reset(&self) {
        self.set.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// Relaxed-ordering read for hot paths that only care about eventual
    /// consistency (e.g. feature-probe caches read every interrupt).
    #[inline]
    pub fn is_set_relaxed(&self) -> bool {
        self.set.load(Ordering::Relaxed)
    }
}

impl Default for InitFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// A non-reentrant section guard: [`enter()`](Self::enter) returns `true` to
/// the first caller and `false` to anyone already inside, until
/// [`leave()`](Self::leave) is called.
pub struct StateFlag {
    inside: AtomicBool,
}

impl StateFlag {
    #[inline]
    pub const fn new() -> Self {
        Self {
            inside: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn enter(&self) -> bool {
        self.inside
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn leave(&self) {
        self.inside.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_inside(&self) -> bool {
        self.inside.load(Ordering::Acquire)
    }
}

impl Default for StateFlag {
    fn default() -> Self {
        Self::new()
    }
}
