use super::brightness::BrightnessTable;
use super::frame_buffer::FrameBuffer;
use super::overlay::OverlaySet;
use super::processor::{FrameConsumer, OutputProcessor};

/// Layers applied after the playlists have rendered into the buffer.
///
/// Order for an active frame: overlays, output processors, frame consumers, brightness.
/// Idle frames skip overlays and consumers.
#[derive(Default)]
pub struct FrameCompositor {
    buffer: FrameBuffer,
    overlays: OverlaySet,
    processors: Vec<Box<dyn OutputProcessor>>,
    consumers: Vec<Box<dyn FrameConsumer>>,
    brightness: BrightnessTable,
}

impl FrameCompositor {
    pub fn new(channels: usize) -> Self {
        Self {
            buffer: FrameBuffer::new(channels),
            ..Self::default()
        }
    }

    /// Zero the buffer, resizing it first if the channel count changed.
    pub fn begin(&mut self, channels: usize) {
        self.buffer.resize(channels);
        self.buffer.clear();
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn overlays(&self) -> &OverlaySet {
        &self.overlays
    }

    pub fn overlays_mut(&mut self) -> &mut OverlaySet {
        &mut self.overlays
    }

    pub fn add_processor(&mut self, processor: Box<dyn OutputProcessor>) {
        log::info!("Added output processor: {}", processor.name());
        self.processors.push(processor);
    }

    pub fn clear_processors(&mut self) {
        self.processors.clear();
    }

    pub fn processor_names(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    pub fn add_consumer(&mut self, consumer: Box<dyn FrameConsumer>) {
        log::info!("Added frame consumer: {}", consumer.name());
        self.consumers.push(consumer);
    }

    pub fn finish(&mut self, brightness: u8) {
        self.overlays.apply(&mut self.buffer);
        for processor in &mut self.processors {
            processor.frame(&mut self.buffer);
        }
        for consumer in &mut self.consumers {
            consumer.consume(&self.buffer);
        }
        self.brightness.apply(&mut self.buffer, brightness);
    }

    pub fn finish_idle(&mut self, brightness: u8) {
        for processor in &mut self.processors {
            processor.frame(&mut self.buffer);
        }
        self.brightness.apply(&mut self.buffer, brightness);
    }
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use marquee_show::BlendMode;

    use super::*;
    use crate::frame::processor::{MatrixSnapshot, ProcessorConfig};

    #[test]
    fn test_layers_apply_in_order() {
        let mut compositor = FrameCompositor::new(4);
        compositor
            .overlays_mut()
            .set(1, &STANDARD.encode([200u8]), BlendMode::Overwrite)
            .unwrap();
        compositor.add_processor(
            ProcessorConfig::Remap {
                from: 1,
                to: 2,
                channels: 1,
            }
            .build(),
        );
        let matrix = MatrixSnapshot::new("m", 1, 1, 1);
        compositor.add_consumer(Box::new(matrix.clone()));

        compositor.begin(4);
        compositor.finish(50);

        // The consumer sees the frame before brightness scaling.
        assert_eq!(matrix.latest(), vec![200, 200, 0]);
        assert_eq!(compositor.buffer(), &[100, 100, 0, 0]);
    }

    #[test]
    fn test_begin_clears_and_resizes() {
        let mut compositor = FrameCompositor::new(2);
        compositor.buffer_mut()[0] = 5;
        compositor.begin(3);
        assert_eq!(compositor.buffer(), &[0, 0, 0]);
    }
}
