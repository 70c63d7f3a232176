pub mod domains;
pub mod targets;
