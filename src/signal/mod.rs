pub mod remote;
pub mod source;
pub mod value;

pub use remote::{RemoteSource, ResponseFormat};
pub use source::{ConfiguredSource, PageSource, SignalSource};
pub use value::{CompareMode, ParserKind, SignalParser, SignalValue};
