use std::collections::HashMap;

use bytes::Bytes;

use crate::{client::Client, cmd::expect_count, parse::Parse, Command, CommandError, Frame};

impl Command {
    /// 格式：HSET key field value
    pub fn hset(
        key: impl AsRef<[u8]>,
        field: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Command {
        Command::new("HSET").with_key(key).arg(field).arg(value)
    }

    /// 格式：HGETALL key
    pub fn hgetall(key: impl AsRef<[u8]>) -> Command {
        Command::new("HGETALL").with_key(key)
    }
}

impl Client {
    /// 设置哈希表的一个字段，返回新建的字段个数（覆盖已有字段时为 0）。
    pub async fn hset(
        &mut self,
        key: impl AsRef<[u8]>,
        field: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> crate::Result<u64> {
        let frame = self.send_and_receive(Command::hset(key, field, value)).await?;
        expect_count(frame)
    }

    /// 获取哈希表的所有字段。key 不存在时返回空表。
    pub async fn hgetall(&mut self, key: impl AsRef<[u8]>) -> crate::Result<HashMap<Bytes, Bytes>> {
        let frame = self.send_and_receive(Command::hgetall(key)).await?;
        decode_hash(frame)
    }
}

/// 解析`HGETALL`的响应：字段和值交替排列的数组。
pub fn decode_hash(frame: Frame) -> crate::Result<HashMap<Bytes, Bytes>> {
    if frame == Frame::Null {
        return Ok(HashMap::new());
    }
    let mut parse = Parse::new(frame)?;
    if parse.remaining() % 2 != 0 {
        return Err(CommandError::Protocol("字段和值的个数不匹配".to_string()).into());
    }
    let mut result = HashMap::with_capacity(parse.remaining() / 2);
    while parse.remaining() > 0 {
        let field = parse.next_bytes()?;
        let value = parse.next_bytes()?;
        result.insert(field, value);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_and_values() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("id")),
            Frame::Bulk(Bytes::from("1")),
            Frame::Bulk(Bytes::from("email")),
            Frame::Bulk(Bytes::from("jalal@gmail.com")),
        ]);
        let user = decode_hash(frame).unwrap();
        assert_eq!(user.len(), 2);
        assert_eq!(user[&b"id"[..]], Bytes::from("1"));
        assert_eq!(user[&b"email"[..]], Bytes::from("jalal@gmail.com"));
    }

    #[test]
    fn missing_key_is_empty() {
        assert!(decode_hash(Frame::Array(vec![])).unwrap().is_empty());
    }

    #[test]
    fn odd_length_is_a_protocol_error() {
        let frame = Frame::Array(vec![Frame::Bulk(Bytes::from("id"))]);
        assert!(decode_hash(frame).is_err());
    }
}
