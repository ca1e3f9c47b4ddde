use std::sync::Arc;

use parking_lot::Mutex;

use super::output_sink::OutputSink;

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedFrame {
    pub timestamp_ms: u32,
    pub data: Vec<u8>,
    /// The frame was an explicit all-off.
    pub all_off: bool,
}

#[derive(Debug, Default)]
struct MemorySinkState {
    outputting: bool,
    current: Vec<u8>,
    timestamp_ms: u32,
    all_off: bool,
    in_frame: bool,
    frames: Vec<RecordedFrame>,
}

/// Keeps every frame in memory. Clones share the same recording, so a test can keep one
/// handle while the scheduler owns another.
#[derive(Clone, Debug)]
pub struct MemorySink {
    channels: usize,
    state: Arc<Mutex<MemorySinkState>>,
    max_frames: usize,
}

impl MemorySink {
    pub fn new(channels: usize) -> Self {
        let state = MemorySinkState {
            outputting: true,
            current: vec![0; channels],
            ..MemorySinkState::default()
        };
        Self {
            channels,
            state: Arc::new(Mutex::new(state)),
            max_frames: usize::MAX,
        }
    }

    /// Only keep the most recent `max_frames` frames.
    pub fn with_limit(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames.max(1);
        self
    }

    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.state.lock().frames.clone()
    }

    pub fn last_frame(&self) -> Option<RecordedFrame> {
        self.state.lock().frames.last().cloned()
    }

    pub fn frame_count(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn all_off_count(&self) -> usize {
        self.state.lock().frames.iter().filter(|f| f.all_off).count()
    }

    pub fn clear(&self) {
        self.state.lock().frames.clear();
    }
}

impl OutputSink for MemorySink {
    fn total_channels(&self) -> usize {
        self.channels
    }

    fn start_frame(&mut self, timestamp_ms: u32) {
        let mut state = self.state.lock();
        state.timestamp_ms = timestamp_ms;
        state.all_off = false;
        state.in_frame = true;
    }

    fn set_channels(&mut self, offset: usize, data: &[u8]) {
        let mut state = self.state.lock();
        if offset >= state.current.len() {
            return;
        }
        let end = (offset + data.len()).min(state.current.len());
        let len = end - offset;
        state.current[offset..end].copy_from_slice(&data[..len]);
    }

    fn end_frame(&mut self) {
        let mut state = self.state.lock();
        if !state.in_frame || !state.outputting {
            return;
        }
        state.in_frame = false;

        let frame = RecordedFrame {
            timestamp_ms: state.timestamp_ms,
            data: state.current.clone(),
            all_off: state.all_off,
        };
        state.frames.push(frame);
        if state.frames.len() > self.max_frames {
            let excess = state.frames.len() - self.max_frames;
            state.frames.drain(..excess);
        }
    }

    fn is_outputting(&self) -> bool {
        self.state.lock().outputting
    }

    fn all_off(&mut self) {
        let mut state = self.state.lock();
        state.current.fill(0);
        state.all_off = true;
    }

    fn start_output(&mut self) -> bool {
        self.state.lock().outputting = true;
        true
    }

    fn stop_output(&mut self) {
        self.state.lock().outputting = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_frames_through_clones() {
        let sink = MemorySink::new(4);
        let mut owned: Box<dyn OutputSink> = Box::new(sink.clone());

        owned.start_frame(10);
        owned.set_channels(2, &[7, 8, 9]);
        owned.end_frame();

        let frame = sink.last_frame().unwrap();
        assert_eq!(frame.timestamp_ms, 10);
        assert_eq!(frame.data, vec![0, 0, 7, 8]);
        assert!(!frame.all_off);
    }

    #[test]
    fn test_all_off_and_stopped_output() {
        let sink = MemorySink::new(2);
        let mut owned = sink.clone();

        owned.start_frame(0);
        owned.set_channels(0, &[5, 5]);
        owned.all_off();
        owned.end_frame();
        assert_eq!(sink.last_frame().unwrap().data, vec![0, 0]);
        assert_eq!(sink.all_off_count(), 1);

        owned.stop_output();
        owned.start_frame(50);
        owned.end_frame();
        assert_eq!(sink.frame_count(), 1);
    }

    #[test]
    fn test_limit_keeps_latest() {
        let sink = MemorySink::new(1).with_limit(2);
        let mut owned = sink.clone();
        for ts in 0..5 {
            owned.start_frame(ts);
            owned.end_frame();
        }
        let stamps: Vec<u32> = sink.frames().iter().map(|f| f.timestamp_ms).collect();
        assert_eq!(stamps, vec![3, 4]);
    }
}
