use std::net::{SocketAddr, UdpSocket};

use anyhow::{anyhow, Result};
use artnet_protocol::{ArtCommand, Output};

#[derive(Clone, Debug, PartialEq)]
pub enum ArtNetMode {
    Broadcast,
    /// Source address to bind, destination to send to.
    Unicast(SocketAddr, SocketAddr),
}

#[derive(Debug)]
pub struct ArtNet {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl ArtNet {
    pub fn new(mode: ArtNetMode, port: u16) -> Result<Self> {
        let (socket, destination) = match mode {
            ArtNetMode::Broadcast => {
                let socket = UdpSocket::bind(("0.0.0.0", 0))?;
                socket.set_broadcast(true)?;
                (socket, SocketAddr::from(([255, 255, 255, 255], port)))
            }
            ArtNetMode::Unicast(source, destination) => {
                let socket = UdpSocket::bind(SocketAddr::new(source.ip(), 0))?;
                (socket, destination)
            }
        };
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            destination,
        })
    }

    /// Send one universe of channel data as an ArtDmx packet.
    pub fn send_data(&self, universe: u8, dmx: &[u8]) -> Result<()> {
        let command = ArtCommand::Output(Output {
            port_address: universe.into(),
            data: dmx.to_vec().into(),
            ..Output::default()
        });

        let bytes = command
            .write_to_buffer()
            .map_err(|e| anyhow!("failed to encode ArtDmx packet: {:?}", e))?;
        self.socket.send_to(&bytes, self.destination)?;
        Ok(())
    }
}
