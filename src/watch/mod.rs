// src/watch/mod.rs

//! Trigger detection for the worker.
//!
//! Turns filesystem notifications on the trigger directory (plus a periodic
//! fallback scan) into [`WorkerEvent::TriggerDetected`] events. It knows
//! nothing about locks or runs.
//!
//! [`WorkerEvent::TriggerDetected`]: crate::engine::WorkerEvent::TriggerDetected

pub mod watcher;

pub use watcher::{WatchSettings, WatcherHandle, is_trigger_event, spawn_watcher};
