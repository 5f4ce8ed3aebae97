//! 连接配置。

use std::time::Duration;

use crate::DEFAULT_PORT;

/// 建立连接所需的全部配置。
///
/// 所有字段都是公开的，通常从`ConnectionConfig::default()`开始修改需要的字段。
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// 服务端主机名或 IP。
    pub host: String,
    /// 服务端端口。
    pub port: u16,
    /// 逻辑数据库编号，不为 0 时连接建立后会发送`SELECT`。
    pub database: u32,
    /// 建立 TCP 连接的最长等待时间。
    pub connect_timeout: Duration,
    /// 每次请求-响应的最长等待时间，`None`表示一直等待。
    pub command_timeout: Option<Duration>,
    /// 认证信息，`None`表示不需要认证。
    pub credentials: Option<Credentials>,
}

/// `AUTH`使用的凭证。
#[derive(Clone)]
pub struct Credentials {
    /// ACL 用户名（Redis 6.0+），`None`时只发送密码。
    pub username: Option<String>,
    pub password: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            database: 0,
            connect_timeout: Duration::from_secs(5),
            command_timeout: Some(Duration::from_secs(5)),
            credentials: None,
        }
    }
}

impl ConnectionConfig {
    /// 使用默认配置，只修改地址。
    pub fn new(host: impl ToString, port: u16) -> ConnectionConfig {
        ConnectionConfig {
            host: host.to_string(),
            port,
            ..Default::default()
        }
    }

    /// `host:port`形式的地址。
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 检查配置是否合法。
    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(crate::Error::InvalidArgument(
                "connect_timeout 不能为 0".to_string(),
            ));
        }
        if matches!(self.command_timeout, Some(t) if t.is_zero()) {
            return Err(crate::Error::InvalidArgument(
                "command_timeout 不能为 0".to_string(),
            ));
        }
        Ok(())
    }
}

// 不打印密码。
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}
