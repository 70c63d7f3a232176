pub mod dispatch;
pub mod feedback;
pub mod rate_profile;
pub mod scheduler;
