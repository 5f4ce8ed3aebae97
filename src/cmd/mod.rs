//! 命令的表示，以及各类命令的构造、参数检查和响应解析。
//!
//! 每个子模块对应一类数据结构，包含三部分：
//! - `Command`的构造函数，在发出请求之前检查参数；
//! - `Client`上的类型化方法，发送命令并将响应转换为具体的类型；
//! - 响应的解析函数，流水线和事务的调用方也可以拿来解析`Frame`。

mod session;

mod string;

mod list;

mod set;

mod sorted_set;
pub use sorted_set::{decode_zpop, ScoredMember};

mod hash;
pub use hash::decode_hash;

mod geo;
pub use geo::{decode_distance, GeoPoint, GeoUnit};

mod hyperloglog;

mod stream;
pub use stream::{decode_read_group, decode_stream_id, StreamEntry, StreamId};

mod pubsub;

mod transaction;

pub use self::decode::*;

use std::time::Duration;

use bytes::Bytes;

use crate::Frame;

/// 一条发往服务端的请求。
///
/// 由命令名、可选的 key、有序的参数列表和可选的过期时间组成。
/// `Command`创建之后不可修改，它本身没有标识，在批处理中只由位置区分。
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    name: &'static str,
    key: Option<Bytes>,
    args: Vec<Bytes>,
    expire: Option<Duration>,
    // 阻塞型命令在服务端最多等待的时间。
    block: Option<Duration>,
}

/// 会让连接进入推送模式的命令。此后服务端的响应不再与请求一一对应，
/// 只能通过`Client::subscribe()`进入。
const PUSH_MODE_COMMANDS: &[&str] = &[
    "SUBSCRIBE",
    "PSUBSCRIBE",
    "SSUBSCRIBE",
    "UNSUBSCRIBE",
    "PUNSUBSCRIBE",
    "SUNSUBSCRIBE",
    "MONITOR",
];

impl Command {
    /// 创建一个没有 key 和参数的命令，可以继续用`with_key()`和`arg()`补充。
    ///
    /// 用于发送本 crate 没有提供类型化方法的命令：
    ///
    /// ```
    /// use my_redis_client::Command;
    ///
    /// let cmd = Command::new("INCRBY").with_key("counter").arg("5");
    /// assert_eq!(cmd.name(), "INCRBY");
    /// ```
    pub fn new(name: &'static str) -> Command {
        Command {
            name,
            key: None,
            args: vec![],
            expire: None,
            block: None,
        }
    }

    /// 设置 key。
    pub fn with_key(mut self, key: impl AsRef<[u8]>) -> Command {
        self.key = Some(Bytes::copy_from_slice(key.as_ref()));
        self
    }

    /// 在参数列表末尾追加一个参数。
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Command {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    /// 追加多个参数。
    pub fn args<I>(mut self, args: I) -> Command
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        self.args
            .extend(args.into_iter().map(|a| Bytes::copy_from_slice(a.as_ref())));
        self
    }

    /// 设置过期时间，编码时会追加`PX <milliseconds>`。
    pub(crate) fn expire_after(mut self, ttl: Duration) -> Command {
        self.expire = Some(ttl);
        self
    }

    /// 标记为阻塞型命令，请求的截止时间会相应地延长。
    pub(crate) fn blocking_for(mut self, block: Duration) -> Command {
        self.block = Some(block);
        self
    }

    /// 阻塞型命令在服务端最多等待的时间。
    pub(crate) fn block(&self) -> Option<Duration> {
        self.block
    }

    /// 只能在订阅模式下发送的命令，不能经由普通的请求发送。
    pub(crate) fn enters_push_mode(&self) -> bool {
        PUSH_MODE_COMMANDS
            .iter()
            .any(|name| self.name.eq_ignore_ascii_case(name))
    }

    /// 命令名。
    pub fn name(&self) -> &str {
        self.name
    }

    /// key，部分命令（如`PING`、`MULTI`）没有 key。
    pub fn key(&self) -> Option<&Bytes> {
        self.key.as_ref()
    }

    /// 参数列表，不包含 key 和过期时间。
    pub fn get_args(&self) -> &[Bytes] {
        &self.args
    }

    /// 过期时间。
    pub fn expire(&self) -> Option<Duration> {
        self.expire
    }

    /// 将命令转换为等价的`Frame`。
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from_static(self.name.as_bytes()));
        if let Some(key) = self.key {
            frame.push_bulk(key);
        }
        for arg in self.args {
            frame.push_bulk(arg);
        }
        if let Some(ttl) = self.expire {
            frame.push_bulk(Bytes::from_static(b"PX"));
            frame.push_bulk(Bytes::from(ttl.as_millis().to_string()));
        }
        frame
    }
}

/// 将参数收集起来，要求至少有一个。
pub(crate) fn collect_non_empty<I>(values: I, what: &str) -> crate::Result<Vec<Bytes>>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    let values: Vec<Bytes> = values
        .into_iter()
        .map(|v| Bytes::copy_from_slice(v.as_ref()))
        .collect();
    if values.is_empty() {
        return Err(crate::Error::InvalidArgument(format!("{}至少需要一个", what)));
    }
    Ok(values)
}

/// 通用的响应解析函数。
///
/// 传入的`Frame`不应该是`Frame::Error`，服务端的错误在这之前就已经转换为
/// `CommandError::Remote`了。
mod decode {
    use bytes::Bytes;

    use crate::{parse::Parse, CommandError, Frame};

    /// 要求响应为`OK`。
    pub fn expect_ok(frame: Frame) -> crate::Result<()> {
        match frame {
            Frame::Simple(ref response) if response == "OK" => Ok(()),
            frame => Err(frame.to_error().into()),
        }
    }

    /// 要求响应为整数。
    pub fn expect_int(frame: Frame) -> crate::Result<i64> {
        match frame {
            Frame::Integer(value) => Ok(value),
            frame => Err(frame.to_error().into()),
        }
    }

    /// 要求响应为非负整数，通常表示个数。
    pub fn expect_count(frame: Frame) -> crate::Result<u64> {
        let value = expect_int(frame)?;
        u64::try_from(value)
            .map_err(|_| CommandError::Protocol(format!("个数不应该为负数：{}", value)).into())
    }

    /// 要求响应为字符串或空值，空值表示不存在。
    pub fn expect_optional_bytes(frame: Frame) -> crate::Result<Option<Bytes>> {
        match frame {
            Frame::Simple(value) => Ok(Some(value.into())),
            Frame::Bulk(value) => Ok(Some(value)),
            Frame::Null => Ok(None),
            frame => Err(frame.to_error().into()),
        }
    }

    /// 要求响应为字符串数组，空值视为空数组。
    pub fn expect_bytes_array(frame: Frame) -> crate::Result<Vec<Bytes>> {
        if frame == Frame::Null {
            return Ok(vec![]);
        }
        let mut parse = Parse::new(frame)?;
        let mut result = Vec::with_capacity(parse.remaining());
        while parse.remaining() > 0 {
            result.push(parse.next_bytes()?);
        }
        Ok(result)
    }
}
