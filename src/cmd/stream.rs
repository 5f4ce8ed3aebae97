use std::{fmt, str::FromStr, time::Duration};

use bytes::Bytes;

use crate::{
    client::Client,
    cmd::{collect_non_empty, expect_count, expect_int, expect_ok},
    parse::Parse,
    Command, CommandError, Error, Frame,
};

/// 流中条目的 ID，格式为`<毫秒时间戳>-<序号>`。
///
/// 同一个流中的 ID 单调递增，按`(ms, seq)`比较大小。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

/// 流中的一个条目。
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(Bytes, Bytes)>,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidArgument(format!("不合法的条目 ID：{}", s));
        let (ms, seq) = s.split_once('-').ok_or_else(invalid)?;
        Ok(StreamId {
            ms: ms.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

impl Command {
    /// 向流中追加一个条目，ID 由服务端生成。
    ///
    /// 格式：XADD key * field value [field value ...]
    pub fn xadd<I, F, V>(key: impl AsRef<[u8]>, fields: I) -> crate::Result<Command>
    where
        I: IntoIterator<Item = (F, V)>,
        F: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut cmd = Command::new("XADD").with_key(key).arg("*");
        let mut empty = true;
        for (field, value) in fields {
            cmd = cmd.arg(field).arg(value);
            empty = false;
        }
        if empty {
            return Err(Error::InvalidArgument("条目至少需要一个字段".to_string()));
        }
        Ok(cmd)
    }

    /// 创建消费者组，`start_id`为`"0"`时从头开始消费，为`"$"`时只消费之后的新条目。
    /// 流不存在时会被创建。
    ///
    /// 格式：XGROUP CREATE key group start_id MKSTREAM
    pub fn xgroup_create(key: impl AsRef<[u8]>, group: &str, start_id: &str) -> Command {
        Command::new("XGROUP")
            .arg("CREATE")
            .arg(key)
            .arg(group)
            .arg(start_id)
            .arg("MKSTREAM")
    }

    /// 格式：XGROUP CREATECONSUMER key group consumer
    pub fn xgroup_create_consumer(key: impl AsRef<[u8]>, group: &str, consumer: &str) -> Command {
        Command::new("XGROUP")
            .arg("CREATECONSUMER")
            .arg(key)
            .arg(group)
            .arg(consumer)
    }

    /// 以消费者的身份读取还没有投递给组内任何消费者的条目。
    ///
    /// 格式：XREADGROUP GROUP group consumer COUNT count [BLOCK ms] STREAMS key >
    ///
    /// # Errors
    /// `count`为 0，或`block`不足 1 毫秒时返回`Error::InvalidArgument`。
    /// 不需要阻塞时`block`应该为`None`。
    pub fn xreadgroup(
        key: impl AsRef<[u8]>,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> crate::Result<Command> {
        if count == 0 {
            return Err(Error::InvalidArgument("count 必须大于 0".to_string()));
        }
        let mut cmd = Command::new("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count.to_string());
        if let Some(block) = block {
            // 服务端把 BLOCK 0 当作永久阻塞。
            if block.as_millis() == 0 {
                return Err(Error::InvalidArgument(
                    "阻塞时间必须至少为 1 毫秒".to_string(),
                ));
            }
            cmd = cmd
                .arg("BLOCK")
                .arg(block.as_millis().to_string())
                .blocking_for(block);
        }
        Ok(cmd.arg("STREAMS").arg(key).arg(">"))
    }

    /// 确认条目已经处理完成。
    ///
    /// 格式：XACK key group id [id ...]
    pub fn xack<I>(key: impl AsRef<[u8]>, group: &str, ids: I) -> crate::Result<Command>
    where
        I: IntoIterator<Item = StreamId>,
    {
        let ids = collect_non_empty(ids.into_iter().map(|id| id.to_string()), "ID")?;
        Ok(Command::new("XACK").with_key(key).arg(group).args(ids))
    }
}

impl Client {
    /// 追加一个条目，返回服务端生成的 ID。
    pub async fn xadd<I, F, V>(&mut self, key: impl AsRef<[u8]>, fields: I) -> crate::Result<StreamId>
    where
        I: IntoIterator<Item = (F, V)>,
        F: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let frame = self.send_and_receive(Command::xadd(key, fields)?).await?;
        decode_stream_id(frame)
    }

    /// 创建消费者组。组已经存在时返回服务端的`BUSYGROUP`错误。
    pub async fn xgroup_create(
        &mut self,
        key: impl AsRef<[u8]>,
        group: &str,
        start_id: &str,
    ) -> crate::Result<()> {
        let frame = self
            .send_and_receive(Command::xgroup_create(key, group, start_id))
            .await?;
        expect_ok(frame)
    }

    /// 在组内创建消费者。消费者已经存在时返回`false`。
    pub async fn xgroup_create_consumer(
        &mut self,
        key: impl AsRef<[u8]>,
        group: &str,
        consumer: &str,
    ) -> crate::Result<bool> {
        let frame = self
            .send_and_receive(Command::xgroup_create_consumer(key, group, consumer))
            .await?;
        Ok(expect_int(frame)? == 1)
    }

    /// 读取最多`count`个未投递的条目。每个条目只会投递给组内的一个消费者。
    ///
    /// 没有可读的条目时最多阻塞`block`，超时后返回空的列表。
    /// 这次请求的截止时间会在`command_timeout`的基础上加上`block`。
    pub async fn xreadgroup(
        &mut self,
        key: impl AsRef<[u8]>,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> crate::Result<Vec<StreamEntry>> {
        let cmd = Command::xreadgroup(key, group, consumer, count, block)?;
        let deadline = self.deadline(cmd.block().unwrap_or_default());
        let frame = self.send_until(cmd, deadline).await?;
        decode_read_group(frame)
    }

    /// 确认条目，返回确认成功的个数。
    pub async fn xack<I>(&mut self, key: impl AsRef<[u8]>, group: &str, ids: I) -> crate::Result<u64>
    where
        I: IntoIterator<Item = StreamId>,
    {
        let frame = self.send_and_receive(Command::xack(key, group, ids)?).await?;
        expect_count(frame)
    }
}

/// 解析`XADD`的响应。
pub fn decode_stream_id(frame: Frame) -> crate::Result<StreamId> {
    match frame {
        Frame::Bulk(ref data) => std::str::from_utf8(data)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| frame.to_error().into()),
        frame => Err(frame.to_error().into()),
    }
}

/// 解析`XREADGROUP`的响应。
///
/// 格式：`[[key, [[id, [field, value, ...]], ...]]]`，超时时为空值。
/// 只读取了一个流，所以只取第一个流的条目。
pub fn decode_read_group(frame: Frame) -> crate::Result<Vec<StreamEntry>> {
    if frame == Frame::Null {
        return Ok(vec![]);
    }
    let mut streams = Parse::new(frame)?;
    if streams.remaining() == 0 {
        return Ok(vec![]);
    }

    let mut stream = streams.next_array()?;
    // 流的名称。
    let _ = stream.next_bytes()?;
    let mut entries = stream.next_array()?;

    let mut result = Vec::with_capacity(entries.remaining());
    while entries.remaining() > 0 {
        let mut entry = entries.next_array()?;
        let id = entry
            .next_string()?
            .parse::<StreamId>()
            .map_err(|e| CommandError::Protocol(e.to_string()))?;

        // 已经被删除的条目，字段为空值。
        let fields = match entry.next()? {
            Frame::Null => vec![],
            frame => decode_fields(frame)?,
        };
        result.push(StreamEntry { id, fields });
    }
    Ok(result)
}

fn decode_fields(frame: Frame) -> crate::Result<Vec<(Bytes, Bytes)>> {
    let mut parse = Parse::new(frame)?;
    let mut fields = Vec::with_capacity(parse.remaining() / 2);
    while parse.remaining() > 0 {
        let field = parse.next_bytes()?;
        let value = parse.next_bytes()?;
        fields.push((field, value));
    }
    Ok(fields)
}
