pub mod storage;

pub use storage::{
    FileStore, MemoryStore, SessionStore, StoredObservation, load_last_value, save_last_value,
    save_scroll_offset, take_scroll_offset,
};
