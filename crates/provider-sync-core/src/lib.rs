//! Provider data synchronisation.
//!
//! Keeps the local firm/office/user-association store in line with an
//! external provider registry:
//!
//! - [`snapshot`] fetches the registry view and cleans it up
//! - [`reconcile`] diffs it against local state into an ordered [`command::Command`] list
//! - [`command`] applies each mutation with per-item fault isolation
//! - [`lock`] makes sure only one instance runs a cycle at a time
//! - [`scheduler`] and [`worker`] drive cycles on a timer or on demand
//!
//! # Error Handling
//!
//! Fallible operations return [`Result<T>`]. Inside a run, per-item failures
//! are collected in [`SyncResult`] rather than aborting the run.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod command;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod hierarchy;
pub mod lock;
pub mod reconcile;
pub mod repository;
pub mod result;
pub mod scheduler;
pub mod shutdown;
pub mod snapshot;
pub mod watermark;
pub mod worker;

pub use error::{Error, Result};
pub use result::SyncResult;
