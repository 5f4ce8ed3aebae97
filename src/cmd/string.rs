use std::time::Duration;

use bytes::Bytes;

use crate::{
    client::Client,
    cmd::{collect_non_empty, expect_count, expect_ok, expect_optional_bytes},
    Command, Error,
};

impl Command {
    /// 根据 key 获取 value。
    ///
    /// 格式：GET key
    pub fn get(key: impl AsRef<[u8]>) -> Command {
        Command::new("GET").with_key(key)
    }

    /// 设置 key-value，不设置过期时间。
    ///
    /// 格式：SET key value
    pub fn set(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Command {
        Command::new("SET").with_key(key).arg(value)
    }

    /// 设置 key-value，`ttl`之后过期。
    ///
    /// 格式：SET key value PX milliseconds
    ///
    /// # Errors
    /// `ttl`不足 1 毫秒时返回`Error::InvalidArgument`。
    pub fn set_ex(
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        ttl: Duration,
    ) -> crate::Result<Command> {
        if ttl.as_millis() == 0 {
            return Err(Error::InvalidArgument(format!(
                "过期时间必须至少为 1 毫秒：{:?}",
                ttl
            )));
        }
        Ok(Command::set(key, value).expire_after(ttl))
    }

    /// 删除一个或多个 key。
    ///
    /// 格式：DEL key [key ...]
    pub fn del<I>(keys: I) -> crate::Result<Command>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let keys = collect_non_empty(keys, "key")?;
        Ok(Command::new("DEL").args(keys))
    }
}

impl Client {
    /// 获取 key 对应的 value。对应`Get`命令。
    ///
    /// # Output
    /// 如果 key 不存在或已经过期，返回`Ok(None)`。
    pub async fn get(&mut self, key: impl AsRef<[u8]>) -> crate::Result<Option<Bytes>> {
        let frame = self.send_and_receive(Command::get(key)).await?;
        expect_optional_bytes(frame)
    }

    /// 设置 key-value，未设置过期时间。对应`Set`命令。
    pub async fn set(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> crate::Result<()> {
        let frame = self.send_and_receive(Command::set(key, value)).await?;
        expect_ok(frame)
    }

    /// 设置 key-value，`ttl`之后过期。对应`Set`命令。
    pub async fn set_ex(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        ttl: Duration,
    ) -> crate::Result<()> {
        let cmd = Command::set_ex(key, value, ttl)?;
        let frame = self.send_and_receive(cmd).await?;
        expect_ok(frame)
    }

    /// 删除 key，返回实际删除的个数。对应`Del`命令。
    pub async fn del<I>(&mut self, keys: I) -> crate::Result<u64>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let frame = self.send_and_receive(Command::del(keys)?).await?;
        expect_count(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_ex_requires_positive_ttl() {
        assert!(matches!(
            Command::set_ex("k", "v", Duration::ZERO),
            Err(Error::InvalidArgument(_))
        ));
        assert!(Command::set_ex("k", "v", Duration::from_micros(500)).is_err());

        let cmd = Command::set_ex("k", "v", Duration::from_secs(3)).unwrap();
        assert_eq!(cmd.expire(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn del_requires_keys() {
        let none: Vec<String> = vec![];
        assert!(Command::del(none).is_err());
        assert_eq!(Command::del(["a", "b"]).unwrap().get_args().len(), 2);
    }
}
