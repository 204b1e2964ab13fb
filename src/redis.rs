//! Redis模組
//!
//! 提供連接池、訂閱連接，以及以 Redis 發布/訂閱實現的消息傳輸層。

pub mod client;
pub mod pool;
pub mod pubsub;

#[cfg(test)]
pub mod test_config;

pub use client::{Client, RedisClientError};
pub use pool::{ConnectionPool, RedisPoolError};
pub use pubsub::RedisTransport;
