pub mod native_host;
pub mod session;

pub use native_host::{
    BridgeEvent, NativeHost, create_bridge_channel, create_command_channel, spawn_reader,
    spawn_writer,
};
pub use session::{build_source, serve};
