pub mod database;
pub mod queue;
