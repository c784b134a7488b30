#![forbid(unsafe_code)]

//! Reactive primitives backing the overlay store.
//!
//! - [`Observable`]: versioned shared value with change notification.
//! - [`BatchScope`]: defers notifications until a multi-write action ends.
//! - [`Computed`]: cached derived value over other sources.

pub mod batch;
pub mod computed;
pub mod observable;

pub use batch::BatchScope;
pub use computed::{Computed, Source, dep};
pub use observable::{Observable, Subscription};
