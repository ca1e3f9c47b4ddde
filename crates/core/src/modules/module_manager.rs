use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage};

const CHANNEL_CAPACITY: usize = 1000;

/// Hosts the engine's background modules, each on its own tokio task.
///
/// Modules never touch the scheduler. Anything they produce comes back as a `ModuleMessage`
/// on the shared channel and is applied by the engine between frames.
pub struct ModuleManager {
    modules: HashMap<ModuleId, Box<dyn AsyncModule>>,
    module_handles: HashMap<ModuleId, JoinHandle<()>>,
    module_senders: HashMap<ModuleId, mpsc::Sender<ModuleEvent>>,
    message_receiver: Option<mpsc::Receiver<ModuleMessage>>,
    message_sender: mpsc::Sender<ModuleMessage>,
    running: bool,
}

impl Default for ModuleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleManager {
    pub fn new() -> Self {
        let (message_sender, message_receiver) = mpsc::channel(CHANNEL_CAPACITY);

        Self {
            modules: HashMap::new(),
            module_handles: HashMap::new(),
            module_senders: HashMap::new(),
            message_receiver: Some(message_receiver),
            message_sender,
            running: false,
        }
    }

    /// Register a new module with the manager
    pub fn register_module(&mut self, module: Box<dyn AsyncModule>) {
        let id = module.id();
        log::debug!("Registering module {:?}", id);
        self.modules.insert(id, module);
    }

    pub fn has_modules(&self) -> bool {
        !self.modules.is_empty() || !self.module_senders.is_empty()
    }

    /// Initialize all registered modules. A module that fails is dropped and reported;
    /// the others carry on.
    pub async fn initialize(&mut self) -> Vec<(ModuleId, String)> {
        let mut failed = Vec::new();
        for (id, module) in &mut self.modules {
            match module.initialize().await {
                Ok(()) => log::info!("Module {:?} initialized successfully", id),
                Err(e) => {
                    log::error!("Failed to initialize module {:?}: {}", id, e);
                    failed.push((id.clone(), e.to_string()));
                }
            }
        }
        for (id, _) in &failed {
            self.modules.remove(id);
        }
        failed
    }

    /// Start all modules
    pub fn start(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.running {
            return Err("Module manager is already running".into());
        }

        for (id, mut module) in std::mem::take(&mut self.modules) {
            let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
            let message_tx = self.message_sender.clone();
            let module_id = id.clone();

            let handle = tokio::spawn(async move {
                if let Err(e) = module.run(event_rx, message_tx.clone()).await {
                    let _ = message_tx
                        .send(ModuleMessage::Error(format!(
                            "Module {:?} error: {}",
                            module_id, e
                        )))
                        .await;
                }
                if let Err(e) = module.shutdown().await {
                    log::warn!("Module {:?} did not shut down cleanly: {}", module_id, e);
                }
            });

            self.module_handles.insert(id.clone(), handle);
            self.module_senders.insert(id, event_tx);
        }

        self.running = true;
        Ok(())
    }

    /// Broadcast an event to all modules
    pub async fn broadcast_event(&self, event: ModuleEvent) {
        for (id, sender) in &self.module_senders {
            if let Err(e) = sender.send(event.clone()).await {
                log::warn!("Failed to broadcast event to module {:?}: {}", id, e);
            }
        }
    }

    /// Get the message receiver (should only be called once)
    pub fn take_message_receiver(&mut self) -> Option<mpsc::Receiver<ModuleMessage>> {
        self.message_receiver.take()
    }

    /// Shutdown all modules gracefully
    pub async fn shutdown(&mut self) {
        if !self.running {
            return;
        }

        log::info!("Shutting down module manager...");
        self.broadcast_event(ModuleEvent::Shutdown).await;

        for (id, handle) in std::mem::take(&mut self.module_handles) {
            log::info!("Waiting for module {:?} to shutdown...", id);
            if let Err(e) = handle.await {
                log::error!("Module {:?} shutdown error: {}", id, e);
            }
        }
        self.module_senders.clear();

        self.running = false;
        log::info!("Module manager shutdown complete");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Status of modules that have not been started yet
    pub fn get_status(&self) -> HashMap<ModuleId, HashMap<String, String>> {
        self.modules
            .iter()
            .map(|(id, module)| (id.clone(), module.status()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoModule {
        fail_init: bool,
    }

    #[async_trait]
    impl AsyncModule for EchoModule {
        fn id(&self) -> ModuleId {
            ModuleId::SyncListener
        }

        async fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            if self.fail_init {
                return Err("no socket".into());
            }
            Ok(())
        }

        async fn run(
            &mut self,
            mut rx: mpsc::Receiver<ModuleEvent>,
            tx: mpsc::Sender<ModuleMessage>,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            while let Some(event) = rx.recv().await {
                if matches!(event, ModuleEvent::Shutdown) {
                    break;
                }
                tx.send(ModuleMessage::Event(event)).await?;
            }
            Ok(())
        }

        async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }

        fn status(&self) -> HashMap<String, String> {
            HashMap::from([("status".to_string(), "ready".to_string())])
        }
    }

    #[tokio::test]
    async fn test_events_round_trip_through_module() {
        use crate::sync::{SyncAction, SyncFileType, SyncPacket};

        let mut manager = ModuleManager::new();
        manager.register_module(Box::new(EchoModule { fail_init: false }));
        assert_eq!(manager.get_status()[&ModuleId::SyncListener]["status"], "ready");
        assert!(manager.initialize().await.is_empty());
        let mut messages = manager.take_message_receiver().unwrap();
        manager.start().unwrap();
        assert!(manager.start().is_err());

        let packet = SyncPacket {
            action: SyncAction::Start,
            file_type: SyncFileType::Sequence,
            frame: 0,
            seconds: 0.0,
            filename: "song.fseq".to_string(),
        };
        manager
            .broadcast_event(ModuleEvent::SyncPacket(packet.clone()))
            .await;

        match messages.recv().await {
            Some(ModuleMessage::Event(ModuleEvent::SyncPacket(received))) => {
                assert_eq!(received, packet)
            }
            other => panic!("unexpected message {:?}", other),
        }

        manager.shutdown().await;
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_failed_module_is_dropped() {
        let mut manager = ModuleManager::new();
        manager.register_module(Box::new(EchoModule { fail_init: true }));

        let failed = manager.initialize().await;
        assert_eq!(failed, vec![(ModuleId::SyncListener, "no socket".to_string())]);
        assert!(!manager.has_modules());
    }
}
