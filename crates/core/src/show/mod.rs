pub mod show_store;

pub use show_store::{JsonScheduleStore, ScheduleDocument, ScheduleStore, StoreError};
