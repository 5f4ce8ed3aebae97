use bytes::Bytes;

use crate::{
    client::Client,
    cmd::{collect_non_empty, expect_bytes_array, expect_count},
    Command,
};

impl Command {
    /// 向集合中加入成员，已经存在的成员会被忽略。
    ///
    /// 格式：SADD key member [member ...]
    pub fn sadd<I>(key: impl AsRef<[u8]>, members: I) -> crate::Result<Command>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let members = collect_non_empty(members, "member")?;
        Ok(Command::new("SADD").with_key(key).args(members))
    }

    /// 格式：SCARD key
    pub fn scard(key: impl AsRef<[u8]>) -> Command {
        Command::new("SCARD").with_key(key)
    }

    /// 格式：SMEMBERS key
    pub fn smembers(key: impl AsRef<[u8]>) -> Command {
        Command::new("SMEMBERS").with_key(key)
    }
}

impl Client {
    /// 向集合中加入成员，返回新加入的成员个数。
    pub async fn sadd<I>(&mut self, key: impl AsRef<[u8]>, members: I) -> crate::Result<u64>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let frame = self.send_and_receive(Command::sadd(key, members)?).await?;
        expect_count(frame)
    }

    /// 集合的成员个数，key 不存在时为 0。
    pub async fn scard(&mut self, key: impl AsRef<[u8]>) -> crate::Result<u64> {
        let frame = self.send_and_receive(Command::scard(key)).await?;
        expect_count(frame)
    }

    /// 集合的所有成员。
    ///
    /// 返回的顺序由服务端的内部实现决定，不应该依赖它。
    pub async fn smembers(&mut self, key: impl AsRef<[u8]>) -> crate::Result<Vec<Bytes>> {
        let frame = self.send_and_receive(Command::smembers(key)).await?;
        expect_bytes_array(frame)
    }
}
