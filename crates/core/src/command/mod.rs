#[allow(clippy::module_inception)]
pub mod command;
pub mod query;
pub mod registry;

pub use command::{ActionOutcome, ActionResponse, Command, CommandError, StopWhen};
pub use query::{Query, QueryResponse};
pub use registry::{CommandDefinition, CommandRegistry, Params};
