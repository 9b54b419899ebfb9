pub mod host;

pub use host::{ElementSelector, PageEvent, PageHost};
