use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage};
use crate::sync::SyncPacket;

const MAX_DATAGRAM: usize = 2048;

/// Listens for FPP sync packets from a master when running as a slave.
///
/// Every datagram waiting on the socket is drained on each wakeup. Packets that do not decode
/// are dropped.
pub struct SyncListenerModule {
    local_ip: IpAddr,
    port: u16,
    socket: Option<UdpSocket>,
    packets_received: u64,
    packets_dropped: u64,
    status: HashMap<String, String>,
}

impl SyncListenerModule {
    pub fn new(local_ip: IpAddr, port: u16) -> Self {
        Self {
            local_ip,
            port,
            socket: None,
            packets_received: 0,
            packets_dropped: 0,
            status: HashMap::new(),
        }
    }

    /// Address actually bound, once initialized.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Read every datagram currently queued. Returns false if the forwarding channel closed.
    async fn drain(
        &mut self,
        socket: &UdpSocket,
        buf: &mut [u8],
        tx: &mpsc::Sender<ModuleMessage>,
    ) -> bool {
        loop {
            match socket.try_recv_from(buf) {
                Ok((len, from)) => match SyncPacket::decode(&buf[..len]) {
                    Ok(packet) => {
                        self.packets_received += 1;
                        log::trace!("Sync packet from {}: {:?}", from, packet);
                        if tx
                            .send(ModuleMessage::Event(ModuleEvent::SyncPacket(packet)))
                            .await
                            .is_err()
                        {
                            return false;
                        }
                    }
                    Err(e) => {
                        self.packets_dropped += 1;
                        log::debug!("Dropping packet from {}: {}", from, e);
                    }
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(e) => {
                    log::warn!("Sync socket receive failed: {}", e);
                    return true;
                }
            }
        }
    }
}

#[async_trait]
impl AsyncModule for SyncListenerModule {
    fn id(&self) -> ModuleId {
        ModuleId::SyncListener
    }

    async fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let socket = UdpSocket::bind((self.local_ip, self.port)).await?;
        let addr = socket.local_addr()?;
        log::info!("Listening for FPP sync on {}", addr);

        self.status.insert("address".to_string(), addr.to_string());
        self.status
            .insert("status".to_string(), "initialized".to_string());
        self.socket = Some(socket);
        Ok(())
    }

    async fn run(
        &mut self,
        mut rx: mpsc::Receiver<ModuleEvent>,
        tx: mpsc::Sender<ModuleMessage>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let socket = self
            .socket
            .take()
            .ok_or("Sync listener not initialized")?;
        let mut buf = vec![0u8; MAX_DATAGRAM];

        let _ = tx
            .send(ModuleMessage::Status(format!(
                "Sync listener running on port {}",
                self.port
            )))
            .await;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(ModuleEvent::Shutdown) | None => {
                            log::info!("Sync listener received shutdown signal");
                            break;
                        }
                        Some(_) => {}
                    }
                }
                ready = socket.readable() => {
                    ready?;
                    if !self.drain(&socket, &mut buf, &tx).await {
                        break;
                    }
                }
            }
        }

        log::info!(
            "Sync listener stopping after {} packets ({} dropped)",
            self.packets_received,
            self.packets_dropped
        );
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.socket = None;
        self.status
            .insert("status".to_string(), "shutdown".to_string());
        Ok(())
    }

    fn status(&self) -> HashMap<String, String> {
        let mut status = self.status.clone();
        status.insert(
            "packets_received".to_string(),
            self.packets_received.to_string(),
        );
        status.insert(
            "packets_dropped".to_string(),
            self.packets_dropped.to_string(),
        );
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{SyncAction, SyncFileType};
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_forwards_valid_packets_and_drops_garbage() {
        let mut module = SyncListenerModule::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        module.initialize().await.unwrap();
        let addr = module.local_addr().unwrap();

        let (event_tx, event_rx) = mpsc::channel(8);
        let (message_tx, mut message_rx) = mpsc::channel(8);
        let task = tokio::spawn(async move { module.run(event_rx, message_tx).await });

        assert!(matches!(message_rx.recv().await, Some(ModuleMessage::Status(_))));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = SyncPacket {
            action: SyncAction::Sync,
            file_type: SyncFileType::Sequence,
            frame: 12,
            seconds: 0.6,
            filename: "song.fseq".to_string(),
        };
        sender.send_to(b"not a sync packet", addr).await.unwrap();
        sender.send_to(&packet.encode(), addr).await.unwrap();

        match message_rx.recv().await {
            Some(ModuleMessage::Event(ModuleEvent::SyncPacket(received))) => {
                assert_eq!(received, packet)
            }
            other => panic!("unexpected message {:?}", other),
        }

        event_tx.send(ModuleEvent::Shutdown).await.unwrap();
        task.await.unwrap().unwrap();
    }
}
