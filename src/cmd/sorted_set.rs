use bytes::Bytes;

use crate::{
    client::Client,
    cmd::{expect_bytes_array, expect_count},
    parse::Parse,
    Command, Error, Frame,
};

/// 有序集合中的一个成员及其分数。
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: Bytes,
    pub score: f64,
}

impl Command {
    /// 向有序集合中加入成员，成员已存在时更新分数。
    ///
    /// 格式：ZADD key score member
    ///
    /// # Errors
    /// 分数为`NaN`时返回`Error::InvalidArgument`。
    pub fn zadd(
        key: impl AsRef<[u8]>,
        score: f64,
        member: impl AsRef<[u8]>,
    ) -> crate::Result<Command> {
        if score.is_nan() {
            return Err(Error::InvalidArgument("分数不能为 NaN".to_string()));
        }
        Ok(Command::new("ZADD")
            .with_key(key)
            .arg(score.to_string())
            .arg(member))
    }

    /// 按分数从小到大返回下标在`[start, stop]`内的成员，负数下标从末尾开始计算。
    ///
    /// 格式：ZRANGE key start stop
    pub fn zrange(key: impl AsRef<[u8]>, start: i64, stop: i64) -> Command {
        Command::new("ZRANGE")
            .with_key(key)
            .arg(start.to_string())
            .arg(stop.to_string())
    }

    /// 弹出分数最高的成员。
    ///
    /// 格式：ZPOPMAX key
    pub fn zpopmax(key: impl AsRef<[u8]>) -> Command {
        Command::new("ZPOPMAX").with_key(key)
    }
}

impl Client {
    /// 加入成员，返回新加入的成员个数（更新分数不计入）。
    pub async fn zadd(
        &mut self,
        key: impl AsRef<[u8]>,
        score: f64,
        member: impl AsRef<[u8]>,
    ) -> crate::Result<u64> {
        let frame = self.send_and_receive(Command::zadd(key, score, member)?).await?;
        expect_count(frame)
    }

    /// 按分数升序返回成员，分数相同时的顺序由服务端决定。
    pub async fn zrange(
        &mut self,
        key: impl AsRef<[u8]>,
        start: i64,
        stop: i64,
    ) -> crate::Result<Vec<Bytes>> {
        let frame = self.send_and_receive(Command::zrange(key, start, stop)).await?;
        expect_bytes_array(frame)
    }

    /// 弹出分数最高的成员。集合为空时返回`Ok(None)`。
    pub async fn zpopmax(&mut self, key: impl AsRef<[u8]>) -> crate::Result<Option<ScoredMember>> {
        let frame = self.send_and_receive(Command::zpopmax(key)).await?;
        decode_zpop(frame)
    }
}

/// 解析`ZPOPMAX`的响应：`[member, score]`，集合为空时是空数组。
pub fn decode_zpop(frame: Frame) -> crate::Result<Option<ScoredMember>> {
    if frame == Frame::Null {
        return Ok(None);
    }
    let mut parse = Parse::new(frame)?;
    if parse.remaining() == 0 {
        return Ok(None);
    }
    let member = parse.next_bytes()?;
    let score = parse.next_float()?;
    parse.finish()?;
    Ok(Some(ScoredMember { member, score }))
}
