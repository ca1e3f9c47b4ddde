use super::output_sink::OutputSink;
use crate::artnet::artnet::ArtNet;
use crate::artnet::network_config::NetworkConfig;

const UNIVERSE_SIZE: usize = 512;

/// Sends the channel buffer as one ArtDmx packet per 512 channel universe.
pub struct ArtNetSink {
    network_config: NetworkConfig,
    artnet: Option<ArtNet>,
    buffer: Vec<u8>,
    frames_sent: u64,
    send_errors: u64,
}

impl ArtNetSink {
    pub fn new(network_config: NetworkConfig) -> Self {
        let buffer = vec![0; network_config.total_channels()];
        Self {
            network_config,
            artnet: None,
            buffer,
            frames_sent: 0,
            send_errors: 0,
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }
}

impl OutputSink for ArtNetSink {
    fn total_channels(&self) -> usize {
        self.buffer.len()
    }

    fn start_frame(&mut self, _timestamp_ms: u32) {}

    fn set_channels(&mut self, offset: usize, data: &[u8]) {
        if offset >= self.buffer.len() {
            return;
        }
        let end = (offset + data.len()).min(self.buffer.len());
        self.buffer[offset..end].copy_from_slice(&data[..end - offset]);
    }

    fn end_frame(&mut self) {
        let Some(artnet) = &self.artnet else {
            return;
        };

        for (universe, dmx) in self.buffer.chunks(UNIVERSE_SIZE).enumerate() {
            if let Err(e) = artnet.send_data(universe as u8, dmx) {
                // Log the first failure and then every thousandth so a dead link doesn't flood.
                if self.send_errors % 1000 == 0 {
                    log::error!("Art-Net send to universe {} failed: {}", universe, e);
                }
                self.send_errors += 1;
            }
        }
        self.frames_sent += 1;
    }

    fn is_outputting(&self) -> bool {
        self.artnet.is_some()
    }

    fn all_off(&mut self) {
        self.buffer.fill(0);
    }

    fn start_output(&mut self) -> bool {
        if self.artnet.is_some() {
            return true;
        }

        match ArtNet::new(self.network_config.mode.clone(), self.network_config.port) {
            Ok(artnet) => {
                log::info!(
                    "Art-Net output started ({}): {}",
                    self.network_config.get_mode_string(),
                    self.network_config.get_destination()
                );
                self.artnet = Some(artnet);
                true
            }
            Err(e) => {
                log::error!("Unable to open Art-Net output: {}", e);
                false
            }
        }
    }

    fn stop_output(&mut self) {
        if self.artnet.take().is_some() {
            log::info!("Art-Net output stopped after {} frames", self.frames_sent);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::*;

    #[test]
    fn test_buffer_sized_from_universes() {
        let mut config = NetworkConfig::new(IpAddr::from([0, 0, 0, 0]), None, 6454, true);
        config.universes = 2;
        let mut sink = ArtNetSink::new(config);
        assert_eq!(sink.total_channels(), 1024);
        assert!(!sink.is_outputting());

        sink.set_channels(1020, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(&sink.buffer[1020..], &[1, 2, 3, 4]);

        // Not started, so nothing is sent.
        sink.end_frame();
        assert_eq!(sink.frames_sent(), 0);
    }
}
