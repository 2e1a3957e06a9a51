// src/watch/mod.rs

//! Workflow file watching.
//!
//! Turns edits of the workflow file into `RuntimeEvent::ReloadRequested`.
//! Events that leave the file's blake3 fingerprint unchanged (touches,
//! editor swap files, saves without edits) are dropped here, so the
//! runtime only reloads when the content really changed.

pub mod watcher;

pub use watcher::{FingerprintGate, WatcherHandle, spawn_config_watcher};
