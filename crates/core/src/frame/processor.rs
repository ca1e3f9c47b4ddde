use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A transform run over the composited buffer before brightness is applied.
pub trait OutputProcessor: Send {
    fn name(&self) -> &str;

    fn frame(&mut self, buffer: &mut [u8]);
}

/// Reads the finished buffer without changing it, e.g. to drive a preview.
pub trait FrameConsumer: Send {
    fn name(&self) -> &str;

    fn consume(&mut self, buffer: &[u8]);
}

/// Persisted description of an output processor. Channels are 1-based.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorConfig {
    /// Copy `channels` values from `from` to `to`.
    Remap {
        from: usize,
        to: usize,
        channels: usize,
    },
    /// Scale a range to `percent`.
    Dim {
        start: usize,
        channels: usize,
        percent: u8,
    },
    /// Force a range to a fixed value.
    Set {
        start: usize,
        channels: usize,
        value: u8,
    },
    /// Reverse the order of pixels in a range.
    Reverse {
        start: usize,
        pixels: usize,
        channels_per_pixel: usize,
    },
}

impl ProcessorConfig {
    pub fn build(&self) -> Box<dyn OutputProcessor> {
        Box::new(ConfiguredProcessor {
            name: self.describe(),
            config: self.clone(),
            scratch: Vec::new(),
        })
    }

    pub fn describe(&self) -> String {
        match self {
            ProcessorConfig::Remap { from, to, channels } => {
                format!("Remap {} channels {} -> {}", channels, from, to)
            }
            ProcessorConfig::Dim {
                start,
                channels,
                percent,
            } => format!("Dim {} channels from {} to {}%", channels, start, percent),
            ProcessorConfig::Set {
                start,
                channels,
                value,
            } => format!("Set {} channels from {} to {}", channels, start, value),
            ProcessorConfig::Reverse { start, pixels, .. } => {
                format!("Reverse {} pixels from {}", pixels, start)
            }
        }
    }
}

struct ConfiguredProcessor {
    name: String,
    config: ProcessorConfig,
    scratch: Vec<u8>,
}

/// Clamp a 1-based range to the buffer, returning a 0-based slice range.
fn range(buffer_len: usize, start: usize, channels: usize) -> std::ops::Range<usize> {
    let begin = start.saturating_sub(1).min(buffer_len);
    let end = begin.saturating_add(channels).min(buffer_len);
    begin..end
}

impl OutputProcessor for ConfiguredProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn frame(&mut self, buffer: &mut [u8]) {
        match &self.config {
            ProcessorConfig::Remap { from, to, channels } => {
                let src = range(buffer.len(), *from, *channels);
                let dst = range(buffer.len(), *to, src.len());
                let len = src.len().min(dst.len());
                self.scratch.clear();
                self.scratch.extend_from_slice(&buffer[src.start..src.start + len]);
                buffer[dst.start..dst.start + len].copy_from_slice(&self.scratch);
            }
            ProcessorConfig::Dim {
                start,
                channels,
                percent,
            } => {
                let percent = (*percent).min(100) as u16;
                let r = range(buffer.len(), *start, *channels);
                for v in &mut buffer[r] {
                    *v = (*v as u16 * percent / 100) as u8;
                }
            }
            ProcessorConfig::Set {
                start,
                channels,
                value,
            } => {
                let r = range(buffer.len(), *start, *channels);
                buffer[r].fill(*value);
            }
            ProcessorConfig::Reverse {
                start,
                pixels,
                channels_per_pixel,
            } => {
                let cpp = (*channels_per_pixel).max(1);
                let r = range(buffer.len(), *start, pixels.saturating_mul(cpp));
                let slice = &mut buffer[r];
                let whole = slice.len() / cpp * cpp;
                let slice = &mut slice[..whole];
                let count = whole / cpp;
                for i in 0..count / 2 {
                    let j = count - 1 - i;
                    for c in 0..cpp {
                        slice.swap(i * cpp + c, j * cpp + c);
                    }
                }
            }
        }
    }
}

/// Captures a window of the finished frame, standing in for a virtual matrix display.
#[derive(Clone)]
pub struct MatrixSnapshot {
    name: String,
    start_channel: usize,
    channels: usize,
    latest: Arc<Mutex<Vec<u8>>>,
}

impl MatrixSnapshot {
    pub fn new(name: impl Into<String>, start_channel: usize, width: usize, height: usize) -> Self {
        let channels = width * height * 3;
        Self {
            name: name.into(),
            start_channel,
            channels,
            latest: Arc::new(Mutex::new(vec![0; channels])),
        }
    }

    pub fn latest(&self) -> Vec<u8> {
        self.latest.lock().clone()
    }
}

impl FrameConsumer for MatrixSnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn consume(&mut self, buffer: &[u8]) {
        let r = range(buffer.len(), self.start_channel, self.channels);
        let mut latest = self.latest.lock();
        latest.fill(0);
        let len = r.len();
        latest[..len].copy_from_slice(&buffer[r]);
    }
}
