//! Marquee show scheduler
//!
//! Decides which playlist plays at any moment, renders it frame by frame into an output sink
//! and keeps other controllers in step over FPP sync.

pub use artnet::network_config::NetworkConfig;
pub use command::{
    ActionOutcome, ActionResponse, Command, CommandDefinition, CommandError, CommandRegistry,
    Query, QueryResponse, StopWhen,
};
pub use config::{ConfigError, ConfigManager, ConfigSchema};
pub use engine::{EngineError, EngineHandle, ShowEngine};
pub use frame::{
    BrightnessTable, FrameCompositor, FrameConsumer, MatrixSnapshot, OutputProcessor,
    OverlaySet, ProcessorConfig,
};
pub use messages::{EngineRequest, Settings, SyncMode};
// Async module system exports
pub use modules::{
    AsyncModule, ModuleEvent, ModuleId, ModuleManager, ModuleMessage, SyncListenerModule,
};
pub use output::{ArtNetSink, MemorySink, OutputSink, RecordedFrame};
pub use schedule::{
    IntegrityReport, PlayOptions, RunningSchedule, ScheduleOptions, Scheduler, Tier, UserButton,
    START_FRAME_MS,
};
pub use show::{JsonScheduleStore, ScheduleDocument, ScheduleStore, StoreError};
pub use sync::{SyncAction, SyncFileType, SyncPacket, SyncSession, SyncTransport};

mod artnet;
pub mod command;
mod config;
mod engine;
pub mod frame;
pub mod messages;
mod modules;
pub mod output;
pub mod schedule;
mod show;
pub mod sync;
