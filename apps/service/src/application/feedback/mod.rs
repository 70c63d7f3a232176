pub mod backoff;
pub mod service;
