use std::net::{IpAddr, SocketAddr};

use super::artnet::ArtNetMode;
use crate::Settings;

#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub mode: ArtNetMode,
    pub port: u16,
    pub universes: u16,
}

impl NetworkConfig {
    pub fn new(source_ip: IpAddr, dest_ip: Option<IpAddr>, artnet_port: u16, broadcast: bool) -> Self {
        let mode = if broadcast {
            ArtNetMode::Broadcast
        } else {
            match dest_ip {
                Some(ip) => ArtNetMode::Unicast(
                    SocketAddr::new(source_ip, artnet_port),
                    SocketAddr::new(ip, artnet_port),
                ),
                None => ArtNetMode::Broadcast,
            }
        };

        NetworkConfig {
            mode,
            port: artnet_port,
            universes: 1,
        }
    }

    /// Build from settings. Unparseable addresses fall back to broadcast.
    pub fn from_settings(settings: &Settings) -> Self {
        let source_ip = settings
            .artnet_source_ip
            .parse()
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let dest_ip = settings.artnet_dest_ip.parse().ok();
        if dest_ip.is_none() && !settings.artnet_broadcast {
            log::warn!(
                "Art-Net destination '{}' is not an address, falling back to broadcast",
                settings.artnet_dest_ip
            );
        }

        let mut config = Self::new(
            source_ip,
            dest_ip,
            settings.artnet_port,
            settings.artnet_broadcast,
        );
        config.universes = settings.artnet_universes.max(1);
        config
    }

    pub fn total_channels(&self) -> usize {
        self.universes as usize * 512
    }

    pub fn get_mode_string(&self) -> &str {
        match &self.mode {
            ArtNetMode::Unicast(_, _) => "unicast",
            ArtNetMode::Broadcast => "broadcast",
        }
    }

    pub fn get_destination(&self) -> String {
        match &self.mode {
            ArtNetMode::Unicast(src, destination) => {
                format!("{}:{} -> {}:{}", src.ip(), self.port, destination.ip(), self.port)
            }
            ArtNetMode::Broadcast => format!("255.255.255.255:{}", self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unicast_needs_destination() {
        let src = IpAddr::from([10, 0, 0, 1]);
        let config = NetworkConfig::new(src, None, 6454, false);
        assert_eq!(config.mode, ArtNetMode::Broadcast);

        let config = NetworkConfig::new(src, Some(IpAddr::from([10, 0, 0, 2])), 6454, false);
        assert_eq!(config.get_mode_string(), "unicast");
        assert_eq!(config.get_destination(), "10.0.0.1:6454 -> 10.0.0.2:6454");
    }

    #[test]
    fn test_from_settings_sizes_universes() {
        let settings = Settings {
            artnet_universes: 3,
            ..Settings::default()
        };
        let config = NetworkConfig::from_settings(&settings);
        assert_eq!(config.total_channels(), 1536);
        assert_eq!(config.get_destination(), "255.255.255.255:6454");
    }
}
