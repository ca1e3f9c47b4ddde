mod actions;
mod integrity;
mod options;
mod queries;
mod running_schedule;
mod scheduler;

pub use integrity::IntegrityReport;
pub use options::{ScheduleOptions, UserButton};
pub use running_schedule::RunningSchedule;
pub use scheduler::{PlayOptions, Scheduler, Tier, START_FRAME_MS};
