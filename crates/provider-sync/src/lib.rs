//! `provider-sync` command line: one-shot sync, the long-running scheduler,
//! dry-run preview and lock/watermark inspection.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod app;
pub mod cli;
