mod models;
mod schema;
mod store;
mod trait_def;

pub use models::*;
pub use schema::SCHEDULER_VERSIONED_SCHEMAS;
pub use store::SqliteSchedulerStore;
pub use trait_def::SchedulerStore;
