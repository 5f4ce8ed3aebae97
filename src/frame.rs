//! 提供表示 Redis 协议帧的类型，以及从字节数组中解析帧、将帧编码为字节的工具。

use std::{fmt, io::Cursor};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::CommandError;

/// Redis 协议帧，也就是服务端的一条响应。
/// 官方文档：https://redis.io/docs/reference/protocol-spec/
///
/// 所有响应在`Connection`处被解码为`Frame`，上层代码只和这一种类型打交道。
/// 空的`Bulk`和`Null`是不同的：前者是长度为 0 的字符串，后者表示值不存在。
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    // 简单字符串，通常用于表示状态，比如返回“OK”表示成功。
    // 例子：+OK\r\n
    Simple(String),

    // 错误，内容是服务端给出的错误信息。
    // 格式：-<message>\r\n
    Error(String),

    // 有符号整数，比如`TTL`会返回 -1 或 -2。
    // 格式：:<value>\r\n
    Integer(i64),

    // 大型字符串，长度任意，可以包含任意字节。
    // 格式：$<length>\r\n<data>\r\n
    Bulk(Bytes),

    // 数组，可以嵌套。客户端发送的命令都是由`Bulk`组成的`Array`。
    // 格式：*<number-of-elements>\r\n<element-1>...<element-n>
    Array(Vec<Frame>),

    // 空值。RESP2 的`$-1\r\n`、`*-1\r\n`和 RESP3 的`_\r\n`都解析为它。
    // 编码时统一使用`$-1\r\n`。
    Null,
}

/// 解码帧时可能出现的错误。
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // 没有足够的数据来解析，需要继续从 socket 读取。
    #[error("数据流过早关闭")]
    Incomplete,

    // 数据不符合协议格式。
    #[error("不合法的帧格式：{0}")]
    Invalid(String),
}

impl Frame {
    /// 返回一个空的帧数组。
    pub fn array() -> Frame {
        Frame::Array(vec![])
    }

    /// 往帧数组中加入`Bulk`帧。
    ///
    /// # Panics
    ///
    /// 如果`self`不是一个数组，程序崩溃。
    pub fn push_bulk(&mut self, bytes: Bytes) {
        match self {
            Frame::Array(vec) => {
                vec.push(Frame::Bulk(bytes));
            }
            _ => panic!("这不是一个帧数组"),
        }
    }

    /// 检查是否可以从`src`中解码完整的帧。
    /// 此函数会移动`src`至帧的末尾，即最后一个`\r\n`后。
    ///
    /// # Errors
    /// 如果`src`中数据不完整，返回`Error::Incomplete`；
    /// 如果数据不符合协议，返回`Error::Invalid`。
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), Error> {
        match get_u8(src)? {
            b'+' | b'-' | b'_' => {
                get_line(src)?;
                Ok(())
            }
            b':' => {
                let _ = get_decimal(src)?;
                Ok(())
            }
            b'$' => match get_decimal(src)? {
                // RESP2 的空值。
                -1 => Ok(()),
                // +2 表示略过`\r\n`。
                len => skip(src, to_len(len)? + 2),
            },
            b'*' => match get_decimal(src)? {
                -1 => Ok(()),
                len => {
                    // 每个元素都必须是一个完整的`Frame`。
                    for _ in 0..to_len(len)? {
                        Frame::check(src)?;
                    }
                    Ok(())
                }
            },
            invalid => Err(Error::Invalid(format!("不合法的帧类型符：{}", invalid))),
        }
    }

    /// 解析数据为`Frame`，需要保证数据已经通过了`check()`。
    ///
    /// # Errors
    /// 如果数据无法解析为`Frame`，返回`Err`。
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame, Error> {
        match get_u8(src)? {
            b'+' => {
                let line = get_line(src)?.to_vec();
                let string = String::from_utf8(line)
                    .map_err(|_| Error::Invalid("非UTF-8编码的字符串".into()))?;
                Ok(Frame::Simple(string))
            }
            b'-' => {
                // 错误信息原样保留，遇到非 UTF-8 的字节就替换掉。
                let line = get_line(src)?;
                Ok(Frame::Error(String::from_utf8_lossy(line).into_owned()))
            }
            b':' => Ok(Frame::Integer(get_decimal(src)?)),
            b'$' => {
                let len = get_decimal(src)?;
                if len == -1 {
                    return Ok(Frame::Null);
                }
                let len = to_len(len)?;
                if src.remaining() < len + 2 {
                    return Err(Error::Incomplete);
                }
                let data = Bytes::copy_from_slice(&src.chunk()[..len]);
                skip(src, len + 2)?;
                Ok(Frame::Bulk(data))
            }
            b'*' => {
                let len = get_decimal(src)?;
                if len == -1 {
                    return Ok(Frame::Null);
                }
                let len = to_len(len)?;
                let mut result = Vec::with_capacity(len);
                for _ in 0..len {
                    result.push(Frame::parse(src)?);
                }
                Ok(Frame::Array(result))
            }
            b'_' => {
                let line = get_line(src)?;
                if line.is_empty() {
                    return Ok(Frame::Null);
                }
                Err(Error::Invalid("空值后面不应该有数据".into()))
            }
            invalid => Err(Error::Invalid(format!("不合法的帧类型符：{}", invalid))),
        }
    }

    /// 将`Frame`编码后追加到`dst`末尾。
    ///
    /// 编码是同步的，所以嵌套的`Array`可以递归处理。
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(val) => {
                dst.put_u8(b'+');
                dst.put_slice(val.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Error(val) => {
                dst.put_u8(b'-');
                dst.put_slice(val.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Integer(val) => {
                dst.put_u8(b':');
                put_decimal(dst, *val);
            }
            Frame::Bulk(val) => {
                dst.put_u8(b'$');
                put_decimal(dst, val.len() as i64);
                dst.put_slice(val);
                dst.put_slice(b"\r\n");
            }
            Frame::Array(val) => {
                dst.put_u8(b'*');
                put_decimal(dst, val.len() as i64);
                for entry in val {
                    entry.encode(dst);
                }
            }
            Frame::Null => dst.put_slice(b"$-1\r\n"),
        }
    }

    /// 将预料之外的`Frame`转换为协议错误。
    pub(crate) fn to_error(&self) -> CommandError {
        CommandError::Protocol(format!("预料之外的Frame：{}", self))
    }
}

/// 获取`src`的第一个字节，这会移动光标。
///
/// # Errors
/// 如果`src`中剩余的字节数为 0，返回`Error::Incomplete`。
fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

/// 将`src`往后移动 n 个字节。
///
/// # Errors
/// 如果`src`中剩余字节数小于 n，返回`Error::Incomplete`。
fn skip(src: &mut Cursor<&[u8]>, n: usize) -> Result<(), Error> {
    if src.remaining() < n {
        return Err(Error::Incomplete);
    }
    src.advance(n);
    Ok(())
}

/// 获取一行，返回的内容不包含行尾的`\r\n`，光标移动到`\r\n`之后。
///
/// 如果找不到`\r\n`，返回`Error::Incomplete`。
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let end = src.get_ref().len().saturating_sub(1);

    for i in start..end {
        if src.get_ref()[i] == b'\r' && src.get_ref()[i + 1] == b'\n' {
            src.set_position((i + 2) as u64);
            return Ok(&src.get_ref()[start..i]);
        }
    }

    Err(Error::Incomplete)
}

/// 获取一行，然后解析为有符号十进制数。
///
/// 整数响应、`Bulk`的长度和`Array`的元素个数都用它来解析，
/// 后两者的 -1 表示空值。
fn get_decimal(src: &mut Cursor<&[u8]>) -> Result<i64, Error> {
    let line = get_line(src)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::Invalid(format!("不合法的数字：{:?}", line)))
}

/// 将长度转换为`usize`，负数是不合法的。
fn to_len(len: i64) -> Result<usize, Error> {
    usize::try_from(len).map_err(|_| Error::Invalid(format!("不合法的长度：{}", len)))
}

/// 写入十进制数以及`\r\n`。
fn put_decimal(dst: &mut BytesMut, val: i64) {
    dst.put_slice(val.to_string().as_bytes());
    dst.put_slice(b"\r\n");
}

// 方便进行比较。
impl PartialEq<&str> for Frame {
    fn eq(&self, other: &&str) -> bool {
        match self {
            Frame::Simple(s) => s.eq(other),
            Frame::Bulk(s) => s.eq(other.as_bytes()),
            _ => false,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use std::str;

        match self {
            Frame::Simple(response) => response.fmt(fmt),
            Frame::Error(msg) => write!(fmt, "(error) {}", msg),
            Frame::Integer(num) => write!(fmt, "(integer) {}", num),
            Frame::Bulk(msg) => match str::from_utf8(msg) {
                Ok(string) => write!(fmt, "\"{}\"", string),
                Err(_) => write!(fmt, "{:?}", msg),
            },
            Frame::Null => "(nil)".fmt(fmt),
            Frame::Array(parts) => {
                if parts.is_empty() {
                    return "(empty array)".fmt(fmt);
                }
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        writeln!(fmt)?;
                    }
                    write!(fmt, "{}) {}", i + 1, part)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(src: &[u8]) -> Result<Frame, Error> {
        let mut cursor = Cursor::new(src);
        Frame::check(&mut cursor)?;
        cursor.set_position(0);
        Frame::parse(&mut cursor)
    }

    #[test]
    fn empty_bulk_is_not_null() {
        assert_eq!(decode(b"$0\r\n\r\n").unwrap(), Frame::Bulk(Bytes::new()));
        assert_eq!(decode(b"$-1\r\n").unwrap(), Frame::Null);
        assert_eq!(decode(b"*-1\r\n").unwrap(), Frame::Null);
        assert_eq!(decode(b"_\r\n").unwrap(), Frame::Null);
    }

    #[test]
    fn negative_integer() {
        assert_eq!(decode(b":-2\r\n").unwrap(), Frame::Integer(-2));
    }

    #[test]
    fn nested_array() {
        let frame = decode(b"*2\r\n*2\r\n$1\r\na\r\n:1\r\n$-1\r\n").unwrap();
        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::Array(vec![Frame::Bulk(Bytes::from("a")), Frame::Integer(1)]),
                Frame::Null,
            ])
        );
    }

    #[test]
    fn incomplete_input() {
        assert!(matches!(decode(b"$5\r\nhel"), Err(Error::Incomplete)));
        assert!(matches!(decode(b"*2\r\n:1\r\n"), Err(Error::Incomplete)));
        assert!(matches!(decode(b"+OK"), Err(Error::Incomplete)));
    }

    #[test]
    fn invalid_input() {
        assert!(matches!(decode(b"!oops\r\n"), Err(Error::Invalid(_))));
        assert!(matches!(decode(b"$-5\r\n"), Err(Error::Invalid(_))));
        assert!(matches!(decode(b":abc\r\n"), Err(Error::Invalid(_))));
    }

    #[test]
    fn encode_then_decode_keeps_tags() {
        let frame = Frame::Array(vec![
            Frame::Simple("OK".into()),
            Frame::Error("ERR boom".into()),
            Frame::Integer(-7),
            Frame::Bulk(Bytes::new()),
            Frame::Null,
            Frame::Array(vec![]),
        ]);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        assert_eq!(decode(&buf).unwrap(), frame);
    }

    #[test]
    fn command_encoding() {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("GET"));
        frame.push_bulk(Bytes::from("name"));
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
    }
}
