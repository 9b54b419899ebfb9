//! Keeps venue display pages current.
//!
//! A [`watcher::Watcher`] polls one signal (a pending-order count, a wait
//! time) from the page or from an HTTP endpoint and reloads the page when it
//! changes, preserving the scroll position across the reload.

pub mod bridge;
pub mod config;
pub mod errors;
pub mod host;
pub mod logging;
pub mod native_messaging;
pub mod signal;
pub mod storage;
pub mod watcher;
