// src/exec/mod.rs

//! Job execution layer.
//!
//! This module runs job scripts and reports back to the scheduler via
//! `RuntimeEvent::Job`.
//!
//! - [`backend`] provides the `JobSubmitter` trait and the
//!   `LocalJobSubmitter` the runtime uses in production, which tests can
//!   replace with a fake.
//! - [`executor_loop`] owns the loop that tracks running jobs and answers
//!   poll and kill requests.
//! - [`task_runner`] runs a single job process.

pub mod backend;
pub mod executor_loop;
pub mod task_runner;

pub use backend::{JobSubmitter, LocalJobSubmitter, SubmitFuture};
pub use executor_loop::spawn_executor;
