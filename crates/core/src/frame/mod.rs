pub mod brightness;
pub mod compositor;
pub mod frame_buffer;
pub mod overlay;
pub mod processor;

pub use brightness::BrightnessTable;
pub use compositor::FrameCompositor;
pub use frame_buffer::FrameBuffer;
pub use overlay::{OverlayChange, OverlaySet, PixelOverlay};
pub use processor::{FrameConsumer, MatrixSnapshot, OutputProcessor, ProcessorConfig};
