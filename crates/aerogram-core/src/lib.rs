//! Core primitives for Aerogram.
//!
//! This crate provides the foundational pieces shared by the Aerogram socket
//! engine:
//!
//! - **Signal/Slot System**: Type-safe notification of socket events
//! - **Thread Affinity**: Debug checks for single-thread ownership
//!
//! # Signal/Slot Example
//!
//! ```
//! use aerogram_core::Signal;
//!
//! // Create a signal that notifies when a value changes
//! let value_changed = Signal::<i32>::new();
//!
//! // Connect a slot to handle the signal
//! let conn_id = value_changed.connect(|value| {
//!     println!("Value changed to: {}", value);
//! });
//!
//! // Emit the signal
//! value_changed.emit(42);
//!
//! // Disconnect when done
//! value_changed.disconnect(conn_id);
//! ```

pub mod signal;
pub mod thread_affinity;

pub use signal::{ConnectionGuard, ConnectionId, Signal};
pub use thread_affinity::ThreadAffinity;
