pub mod redis_queue;

pub use redis_queue::{CommandPublisher, Delivery, RedisQueue, ResultSource};
