use bytes::Bytes;

use crate::{
    client::Client,
    cmd::{collect_non_empty, expect_count, expect_optional_bytes},
    Command,
};

impl Command {
    /// 从左侧（头部）依次插入。
    ///
    /// 格式：LPUSH key value [value ...]
    ///
    /// 每个值都插入到头部，所以越靠后的参数越靠近头部：
    /// `LPUSH k a b c`之后列表为`[c, b, a, ...]`。
    pub fn lpush<I>(key: impl AsRef<[u8]>, values: I) -> crate::Result<Command>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let values = collect_non_empty(values, "value")?;
        Ok(Command::new("LPUSH").with_key(key).args(values))
    }

    /// 从右侧（尾部）依次追加。
    ///
    /// 格式：RPUSH key value [value ...]
    pub fn rpush<I>(key: impl AsRef<[u8]>, values: I) -> crate::Result<Command>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let values = collect_non_empty(values, "value")?;
        Ok(Command::new("RPUSH").with_key(key).args(values))
    }

    /// 格式：LPOP key
    pub fn lpop(key: impl AsRef<[u8]>) -> Command {
        Command::new("LPOP").with_key(key)
    }

    /// 格式：RPOP key
    pub fn rpop(key: impl AsRef<[u8]>) -> Command {
        Command::new("RPOP").with_key(key)
    }
}

impl Client {
    /// 从左侧插入，返回插入后列表的长度。
    pub async fn lpush<I>(&mut self, key: impl AsRef<[u8]>, values: I) -> crate::Result<u64>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let frame = self.send_and_receive(Command::lpush(key, values)?).await?;
        expect_count(frame)
    }

    /// 从右侧插入，返回插入后列表的长度。
    pub async fn rpush<I>(&mut self, key: impl AsRef<[u8]>, values: I) -> crate::Result<u64>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let frame = self.send_and_receive(Command::rpush(key, values)?).await?;
        expect_count(frame)
    }

    /// 从左侧弹出一个元素。列表为空或 key 不存在时返回`Ok(None)`。
    pub async fn lpop(&mut self, key: impl AsRef<[u8]>) -> crate::Result<Option<Bytes>> {
        let frame = self.send_and_receive(Command::lpop(key)).await?;
        expect_optional_bytes(frame)
    }

    /// 从右侧弹出一个元素。列表为空或 key 不存在时返回`Ok(None)`。
    pub async fn rpop(&mut self, key: impl AsRef<[u8]>) -> crate::Result<Option<Bytes>> {
        let frame = self.send_and_receive(Command::rpop(key)).await?;
        expect_optional_bytes(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_keeps_argument_order() {
        let cmd = Command::rpush("name", ["jalaluddin", "muh", "akbar"]).unwrap();
        assert_eq!(cmd.key(), Some(&Bytes::from("name")));
        assert_eq!(
            cmd.get_args(),
            &[
                Bytes::from("jalaluddin"),
                Bytes::from("muh"),
                Bytes::from("akbar")
            ]
        );
    }

    #[test]
    fn push_without_values_is_rejected() {
        let empty: [&[u8]; 0] = [];
        assert!(Command::lpush("name", empty).is_err());
        assert!(Command::rpush("name", Vec::<String>::new()).is_err());
    }
}
