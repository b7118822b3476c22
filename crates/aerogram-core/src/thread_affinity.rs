//! Thread ownership verification utilities for Aerogram.
//!
//! This module provides debug assertions to help verify that state owned by a
//! single thread stays on that thread. Aerogram's socket handles are
//! thread-safe, but the driver task owns its operation queues exclusively;
//! when the driver runs on a single-threaded runtime it records its affinity
//! and re-checks it in debug builds.
//!
//! # Usage
//!
//! ```
//! use aerogram_core::thread_affinity::ThreadAffinity;
//!
//! struct ReceiveLedger {
//!     affinity: ThreadAffinity,
//!     count: std::cell::Cell<u32>,
//! }
//!
//! impl ReceiveLedger {
//!     fn new() -> Self {
//!         Self {
//!             affinity: ThreadAffinity::current(),
//!             count: std::cell::Cell::new(0),
//!         }
//!     }
//!
//!     fn record(&self) {
//!         // In debug builds, panic if called from the wrong thread
//!         self.affinity.debug_assert_same_thread();
//!         self.count.set(self.count.get() + 1);
//!     }
//! }
//! ```

use std::thread::ThreadId;

/// Thread affinity tracker for objects.
///
/// This struct records the thread on which an object was created and provides
/// methods to verify that subsequent operations occur on the same thread.
#[derive(Debug, Clone, Copy)]
pub struct ThreadAffinity {
    thread_id: ThreadId,
}

impl Default for ThreadAffinity {
    fn default() -> Self {
        Self::current()
    }
}

impl ThreadAffinity {
    /// Create a new thread affinity tracker for the current thread.
    #[inline]
    pub fn current() -> Self {
        Self {
            thread_id: std::thread::current().id(),
        }
    }

    /// Get the thread ID this affinity is bound to.
    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Check if the current thread matches this affinity.
    #[inline]
    pub fn is_same_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Assert that we are on the same thread as the affinity.
    ///
    /// This always runs (debug and release builds).
    ///
    /// # Panics
    ///
    /// Panics with a descriptive message if called from a different thread.
    #[inline]
    pub fn assert_same_thread(&self) {
        self.assert_same_thread_with_msg("object accessed from wrong thread")
    }

    /// Assert that we are on the same thread, with a custom message.
    ///
    /// # Panics
    ///
    /// Panics if called from a different thread.
    pub fn assert_same_thread_with_msg(&self, msg: &str) {
        if !self.is_same_thread() {
            self.panic_wrong_thread(msg);
        }
    }

    /// Debug-only assertion that we are on the same thread.
    ///
    /// This is a no-op in release builds.
    #[inline]
    pub fn debug_assert_same_thread(&self) {
        #[cfg(debug_assertions)]
        self.assert_same_thread();
    }

    /// Debug-only assertion with a custom message.
    #[inline]
    pub fn debug_assert_same_thread_with_msg(&self, msg: &str) {
        #[cfg(debug_assertions)]
        self.assert_same_thread_with_msg(msg);
    }

    #[cold]
    #[inline(never)]
    fn panic_wrong_thread(&self, msg: &str) -> ! {
        let current = std::thread::current();
        let current_name = current.name().unwrap_or("<unnamed>");
        let current_id = current.id();

        panic!(
            "\n\
            ══════════════════════════════════════════════════════════════════════\n\
            THREAD AFFINITY VIOLATION\n\
            ══════════════════════════════════════════════════════════════════════\n\
            \n\
            {msg}\n\
            \n\
            Object was created on thread: {:?}\n\
            Current thread: \"{current_name}\" (ID: {current_id:?})\n\
            \n\
            This object must only be accessed from the thread on which it was\n\
            created. Socket handles are thread-safe and may be used from any\n\
            thread; direct access to driver-owned state is not.\n\
            \n\
            ══════════════════════════════════════════════════════════════════════",
            self.thread_id
        )
    }
}
