// src/retry/mod.rs

//! Delayed re-attempts and external triggers.
//!
//! - `timers`: execution and submission retry timers.
//! - `xtrigger`: wall-clock and function xtriggers with a shared result cache.

pub mod timers;
pub mod xtrigger;

pub use timers::{RetryTimers, retry_delay};
pub use xtrigger::{
    XtriggerCall, XtriggerDef, XtriggerFunction, XtriggerManager, XtriggerOutcome, XtriggerRegistry,
};
