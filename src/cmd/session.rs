use bytes::Bytes;

use crate::{client::Client, Command, Frame};

impl Command {
    /// 测试连接。
    ///
    /// 格式：PING [message]
    pub fn ping(msg: Option<Bytes>) -> Command {
        let cmd = Command::new("PING");
        match msg {
            Some(msg) => cmd.arg(msg),
            None => cmd,
        }
    }

    /// 认证。
    ///
    /// 格式：AUTH [username] password
    pub(crate) fn auth(username: Option<&str>, password: &str) -> Command {
        let cmd = Command::new("AUTH");
        match username {
            Some(username) => cmd.arg(username).arg(password),
            None => cmd.arg(password),
        }
    }

    /// 切换逻辑数据库。
    ///
    /// 格式：SELECT index
    pub(crate) fn select(index: u32) -> Command {
        Command::new("SELECT").arg(index.to_string())
    }
}

impl Client {
    /// 测试连接。对应`Ping`命令。
    ///
    /// # Output
    /// 没有消息时服务端返回`PONG`，否则原样返回消息。
    pub async fn ping(&mut self, msg: Option<Bytes>) -> crate::Result<Bytes> {
        match self.send_and_receive(Command::ping(msg)).await? {
            Frame::Simple(value) => Ok(value.into()),
            Frame::Bulk(value) => Ok(value),
            frame => Err(frame.to_error().into()),
        }
    }
}
