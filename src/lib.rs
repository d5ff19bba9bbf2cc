//! Tracepads - automatic experiment tracking for arbitrary callables
//!
//! This library intercepts named functions, dispatches each call to the
//! loggers subscribed to the call's anchors, and keeps transient tracking
//! state in mergeable caches scoped to the process and to each tracked run.
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use tracepads::function::{CallArgs, Function, Namespace};
//! use tracepads::lifecycle::RunOptions;
//! use tracepads::tracker::{TrackOptions, Tracker};
//!
//! # fn main() -> anyhow::Result<()> {
//! let tracker = Tracker::in_memory()?;
//! let model = Namespace::new("sklearn.tree.DecisionTreeClassifier");
//! model.define(Function::new("sklearn.tree", "fit", |_| Ok(json!("fitted"))));
//!
//! let fit = model.get("fit").ok_or_else(|| anyhow::anyhow!("fit missing"))?;
//! tracker.track(&fit, Some(&model), TrackOptions::new())?;
//!
//! tracker.start_run(RunOptions::new())?;
//! assert_eq!(model.call("fit", &CallArgs::new())?, json!("fitted"));
//! tracker.end_run()?;
//! # Ok(())
//! # }
//! ```

pub mod anchor;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod function;
pub mod lifecycle;
pub mod logger;
pub mod mapping;
pub mod tracker;
pub mod wrap;

mod sync;

pub use error::{Result, TrackError};
