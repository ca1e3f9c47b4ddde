use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::command::{ActionResponse, QueryResponse};
use crate::messages::{EngineRequest, Settings, SyncMode};
use crate::modules::{ModuleEvent, ModuleManager, ModuleMessage, SyncListenerModule};
use crate::schedule::Scheduler;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("show engine is not running")]
    Stopped,
}

fn ticker(ms: u32) -> Interval {
    let mut ticker = interval(Duration::from_millis(ms.max(1) as u64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Cloneable front door to a running `ShowEngine`. Every call is answered on the engine's
/// own task, between frames.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineRequest>,
}

impl EngineHandle {
    pub async fn action(
        &self,
        command: &str,
        parameters: &str,
        data: &str,
    ) -> Result<ActionResponse, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Action {
            command: command.to_string(),
            parameters: parameters.to_string(),
            data: data.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    pub async fn query(
        &self,
        query: &str,
        parameters: &str,
        ip: &str,
        reference: &str,
    ) -> Result<QueryResponse, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Query {
            query: query.to_string(),
            parameters: parameters.to_string(),
            ip: ip.to_string(),
            reference: reference.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    pub async fn status(&self) -> Result<String, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Status { reply })?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.send(EngineRequest::Shutdown)
    }

    fn send(&self, request: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(request).map_err(|_| EngineError::Stopped)
    }
}

/// Drives a `Scheduler` in real time: frames on the playing step's cadence, schedule checks
/// on their own interval, and requests and sync packets in between.
pub struct ShowEngine {
    scheduler: Scheduler,
    settings: Settings,
    modules: ModuleManager,
    request_rx: mpsc::UnboundedReceiver<EngineRequest>,
    request_tx: mpsc::UnboundedSender<EngineRequest>,
    frame_ms: u32,
}

impl ShowEngine {
    pub fn new(scheduler: Scheduler, settings: Settings) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let frame_ms = settings.default_frame_ms.max(1);
        Self {
            scheduler,
            settings,
            modules: ModuleManager::new(),
            request_rx,
            request_tx,
            frame_ms,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.request_tx.clone(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Start background modules the configured sync mode needs. A slave whose socket cannot
    /// be opened keeps running unsynced.
    pub async fn start_modules(&mut self) -> Result<(), anyhow::Error> {
        if self.settings.sync_mode == SyncMode::FppSlave {
            let ip: IpAddr = self
                .settings
                .sync_local_ip
                .parse()
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
            self.modules.register_module(Box::new(SyncListenerModule::new(
                ip,
                self.settings.sync_port,
            )));
        }

        for (id, e) in self.modules.initialize().await {
            log::error!("Module {:?} unavailable, continuing without it: {}", id, e);
        }
        if self.modules.has_modules() {
            self.modules
                .start()
                .map_err(|e| anyhow::anyhow!("failed to start modules: {}", e))?;
        }
        Ok(())
    }

    /// Frame period the engine should tick at right now.
    fn desired_frame_ms(&self) -> u32 {
        self.scheduler
            .running_playlist()
            .map(|p| p.frame_ms())
            .unwrap_or(self.settings.default_frame_ms)
            .max(1)
    }

    fn retime(&mut self, frame_ms: u32, frames: &mut Interval) {
        let frame_ms = frame_ms.max(1);
        if frame_ms != self.frame_ms {
            log::debug!("Frame interval {}ms -> {}ms", self.frame_ms, frame_ms);
            self.frame_ms = frame_ms;
            *frames = ticker(frame_ms);
        }
    }

    /// Run until `shutdown` resolves or a shutdown request arrives. Hands the scheduler back
    /// so the caller can save or inspect it.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<Scheduler, anyhow::Error> {
        let mut message_rx = self.modules.take_message_receiver();
        tokio::pin!(shutdown);

        let initial = self.scheduler.check_schedule();
        self.frame_ms = initial.max(1);
        let mut frames = ticker(self.frame_ms);
        let mut checks = ticker(self.settings.schedule_check_ms);

        log::info!(
            "Show engine running, frames every {}ms, schedule checked every {}ms",
            self.frame_ms,
            self.settings.schedule_check_ms
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Shutdown signal received");
                    break;
                }

                _ = frames.tick() => {
                    self.scheduler.frame(true);
                    let frame_ms = self.desired_frame_ms();
                    self.retime(frame_ms, &mut frames);
                }

                _ = checks.tick() => {
                    self.scheduler.check_schedule();
                    let frame_ms = self.desired_frame_ms();
                    self.retime(frame_ms, &mut frames);
                }

                Some(request) = self.request_rx.recv() => {
                    if !self.handle_request(request, &mut frames) {
                        break;
                    }
                }

                Some(message) = async {
                    match message_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.handle_module_message(message, &mut frames);
                }
            }
        }

        self.scheduler.stop_all();
        if self.scheduler.is_dirty() {
            log::warn!("Shutting down with unsaved schedule changes");
        }
        self.modules.shutdown().await;

        log::info!("Show engine stopped");
        Ok(self.scheduler)
    }

    /// Returns false when the engine should stop.
    fn handle_request(&mut self, request: EngineRequest, frames: &mut Interval) -> bool {
        match request {
            EngineRequest::Action {
                command,
                parameters,
                data,
                reply,
            } => {
                let response = self.scheduler.action(&command, &parameters, &data);
                let frame_ms = response.frame_ms.unwrap_or_else(|| self.desired_frame_ms());
                self.retime(frame_ms, frames);
                let _ = reply.send(response);
            }
            EngineRequest::Query {
                query,
                parameters,
                ip,
                reference,
                reply,
            } => {
                let _ = reply.send(self.scheduler.query(&query, &parameters, &ip, &reference));
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.scheduler.status());
            }
            EngineRequest::Shutdown => {
                log::info!("Received shutdown request");
                return false;
            }
        }
        true
    }

    fn handle_module_message(&mut self, message: ModuleMessage, frames: &mut Interval) {
        match message {
            ModuleMessage::Event(ModuleEvent::SyncPacket(packet)) => {
                if self.scheduler.sync_mode() != SyncMode::FppSlave {
                    return;
                }
                if let Some(frame_ms) = self.scheduler.handle_sync_packet(&packet) {
                    self.retime(frame_ms, frames);
                }
            }
            ModuleMessage::Event(ModuleEvent::Shutdown) => {}
            ModuleMessage::Status(status) => {
                log::info!("Module status: {}", status);
            }
            ModuleMessage::Error(error) => {
                log::error!("Module error: {}", error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemorySink;
    use marquee_show::{Playlist, PlaylistItem, PlaylistStep};

    fn engine() -> (ShowEngine, MemorySink) {
        let sink = MemorySink::new(3);
        let mut scheduler = Scheduler::new(Box::new(sink.clone()));
        scheduler.add_playlist(Playlist::new("Carols").with_step(
            PlaylistStep::new("Song").with_item(PlaylistItem::sequence(
                "song.fseq",
                20,
                vec![vec![7, 7, 7]; 500],
            )),
        ));
        let settings = Settings {
            schedule_check_ms: 50,
            ..Settings::default()
        };
        (ShowEngine::new(scheduler, settings), sink)
    }

    #[tokio::test]
    async fn test_requests_are_answered_between_frames() {
        let (engine, sink) = engine();
        let handle = engine.handle();
        let task = tokio::spawn(engine.run(std::future::pending()));

        let response = handle
            .action("Play specified playlist", "Carols", "")
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.frame_ms, Some(crate::schedule::START_FRAME_MS));

        let status = handle
            .query("GetPlayingStatus", "", "127.0.0.1", "1")
            .await
            .unwrap();
        assert_eq!(status.data["status"], "playing");
        assert_eq!(status.data["playlist"], "Carols");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.status().await.unwrap().starts_with("Playing Song"));
        assert!(sink.frames().iter().any(|f| f.data == vec![7, 7, 7]));

        handle.shutdown().unwrap();
        let scheduler = task.await.unwrap().unwrap();
        assert!(scheduler.running_playlist().is_none());
        assert_eq!(handle.status().await, Err(EngineError::Stopped));
    }

    #[tokio::test]
    async fn test_shutdown_future_stops_engine() {
        let (engine, _sink) = engine();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(engine.run(async {
            let _ = stop_rx.await;
        }));

        stop_tx.send(()).unwrap();
        assert!(task.await.unwrap().is_ok());
    }
}
