pub mod config;
pub mod loading;

pub use config::{MissingSignalPolicy, WatchConfig};
pub use loading::{from_toml_str, load_config_file};
