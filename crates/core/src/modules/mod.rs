pub mod module_manager;
pub mod sync_listener_module;
pub mod traits;

// Re-export for convenience
pub use module_manager::ModuleManager;
pub use sync_listener_module::SyncListenerModule;
pub use traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage};
