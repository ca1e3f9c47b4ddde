pub mod artnet_sink;
pub mod memory_sink;
pub mod output_sink;

pub use artnet_sink::ArtNetSink;
pub use memory_sink::{MemorySink, RecordedFrame};
pub use output_sink::OutputSink;
