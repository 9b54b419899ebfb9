pub mod watcher;

pub use watcher::{PollOutcome, ReloadReason, WatchExit, Watcher};
