// 模組定義
pub mod cache;
pub mod cloud;
pub mod config;
pub mod event;
pub mod handler;
pub mod messaging;
pub mod player;
pub mod redis;
pub mod scheduler;
pub mod server;
pub mod utils;

pub use cloud::{Cloud, CloudError, CloudResult};
