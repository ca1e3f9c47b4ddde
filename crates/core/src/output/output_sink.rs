/// Where composited frames go. Implementations own all protocol-specific encoding.
///
/// The scheduler calls `start_frame`, then `set_channels` one or more times, then `end_frame`
/// once per output tick.
pub trait OutputSink: Send {
    /// Size of the addressable channel space. The frame buffer is always this long.
    fn total_channels(&self) -> usize;

    fn start_frame(&mut self, timestamp_ms: u32);

    fn set_channels(&mut self, offset: usize, data: &[u8]);

    fn end_frame(&mut self);

    /// Whether output to lights is enabled.
    fn is_outputting(&self) -> bool;

    /// Zero every channel for the current frame.
    fn all_off(&mut self);

    /// Open the underlying outputs. Returns false if they could not be opened.
    fn start_output(&mut self) -> bool;

    fn stop_output(&mut self);
}
