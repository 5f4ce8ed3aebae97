//! 一个异步的 Redis 客户端。
//!
//! - `Client`：一个连接上的会话，提供各类数据结构的类型化方法；
//! - `Batch`：流水线和事务，把多条命令放在一次写入中发送；
//! - `Subscriber`：发布/订阅模式下的连接。

pub mod client;
pub use client::{Client, Message, Received, Subscriber};

pub mod batch;
pub use batch::{Batch, BatchMode, BatchState, Outcome, Reply};

pub mod config;
pub use config::{ConnectionConfig, Credentials};

mod connection;
pub use connection::Connection;

pub mod frame;
pub use frame::Frame;

pub mod cmd;
pub use cmd::Command;

pub mod error;
pub use error::{CommandError, ConnectionError, Error, Result};

mod parse;

/// 默认端口。
pub const DEFAULT_PORT: u16 = 6379;
