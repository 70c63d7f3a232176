pub mod frequency;
pub mod service;
