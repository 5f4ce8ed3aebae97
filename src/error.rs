//! 客户端的错误类型。
//!
//! 连接层面的错误与单条命令的错误分开表示，调用方可以据此决定是否重连。
//! 事务因`WATCH`冲突被放弃不属于错误，见`batch::Outcome::Aborted`。

use std::io;

/// 连接层面的错误。出现这类错误后，连接通常已经不可用了。
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// 无法连接到服务端。
    #[error("连接被拒绝：{0}")]
    Refused(#[source] io::Error),

    /// 在`connect_timeout`内没有建立连接。
    #[error("连接超时")]
    Timeout,

    /// 服务端拒绝了提供的凭证。
    #[error("认证失败：{0}")]
    Auth(String),

    /// 连接已经关闭，可能是本地调用了`close()`，也可能是对方关闭了 socket。
    #[error("连接已关闭")]
    Closed,

    /// 之前的命令超时了，数据流中可能还残留着未读取的响应，
    /// 继续使用会导致请求和响应错位。应该关闭后重新建立连接。
    #[error("连接中可能残留未读取的响应，请重新建立连接")]
    Poisoned,

    /// 读写 socket 时出错。
    #[error("I/O 错误：{0}")]
    Io(#[from] io::Error),
}

/// 单条命令的错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// 在期限内没有读取到完整的响应。
    #[error("命令超时")]
    Timeout,

    /// 响应的格式或类型与命令不匹配。
    #[error("协议错误：{0}")]
    Protocol(String),

    /// 服务端返回的错误，原样保留服务端的错误信息。
    #[error("{0}")]
    Remote(String),
}

/// 本 crate 所有公开接口使用的错误类型。
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Command(#[from] CommandError),

    /// 批处理已经提交过了，不能再加入命令或再次提交。
    #[error("批处理已提交，不能再修改")]
    SealedBatch,

    /// 在发出请求之前就能判断出不合法的参数。
    #[error("不合法的参数：{0}")]
    InvalidArgument(String),

    /// 当前状态不允许这个操作，例如在流水线批处理中使用`WATCH`。
    #[error("不允许的操作：{0}")]
    InvalidState(&'static str),
}

impl Error {
    /// 如果是服务端返回的错误，返回服务端的错误信息。
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Error::Command(CommandError::Remote(msg)) => Some(msg),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Connection(ConnectionError::Io(value))
    }
}

/// 自定义的 Result。
pub type Result<T> = std::result::Result<T, Error>;
