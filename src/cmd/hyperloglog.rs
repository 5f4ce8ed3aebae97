use crate::{
    client::Client,
    cmd::{expect_count, expect_int},
    Command,
};

impl Command {
    /// 向基数估计结构中加入元素。可以不提供元素，此时只会创建空的结构。
    ///
    /// 格式：PFADD key [element ...]
    pub fn pfadd<I>(key: impl AsRef<[u8]>, elements: I) -> Command
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        Command::new("PFADD").with_key(key).args(elements)
    }

    /// 格式：PFCOUNT key
    pub fn pfcount(key: impl AsRef<[u8]>) -> Command {
        Command::new("PFCOUNT").with_key(key)
    }
}

impl Client {
    /// 加入元素。重复加入同一个元素不会改变估计值。
    ///
    /// # Output
    /// 如果内部的寄存器发生了变化，返回`true`。
    pub async fn pfadd<I>(&mut self, key: impl AsRef<[u8]>, elements: I) -> crate::Result<bool>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let frame = self.send_and_receive(Command::pfadd(key, elements)).await?;
        Ok(expect_int(frame)? == 1)
    }

    /// 不同元素个数的估计值，标准误差约为 0.81%。
    pub async fn pfcount(&mut self, key: impl AsRef<[u8]>) -> crate::Result<u64> {
        let frame = self.send_and_receive(Command::pfcount(key)).await?;
        expect_count(frame)
    }
}
