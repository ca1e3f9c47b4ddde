use std::ops::{Deref, DerefMut};

/// The full channel space for one tick. Allocated once and reused.
#[derive(Clone, Debug, Default)]
pub struct FrameBuffer {
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(channels: usize) -> Self {
        Self {
            data: vec![0; channels],
        }
    }

    /// Match the sink's channel count. Only reallocates when it actually changes.
    pub fn resize(&mut self, channels: usize) {
        if self.data.len() != channels {
            self.data.resize(channels, 0);
        }
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Deref for FrameBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for FrameBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_and_clear() {
        let mut buffer = FrameBuffer::new(4);
        buffer[3] = 9;
        buffer.resize(6);
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer[3], 9);
        buffer.clear();
        assert!(buffer.iter().all(|v| *v == 0));
    }
}
