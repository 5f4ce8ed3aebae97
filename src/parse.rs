use crate::{CommandError, Frame};
use bytes::Bytes;
use std::{str, vec};

/// 用于解析数组响应的工具类。
///
/// 很多命令的响应是`Array`，例如`ZPOPMAX`返回`[member, score]`，
/// `XREADGROUP`返回多层嵌套的数组。`Parse`使用一个`Array`生成，
/// 并且提供类似迭代器的 API，逐个取出元素并转换为需要的类型。
#[derive(Debug)]
pub(crate) struct Parse {
    // Array Frame 的迭代器。
    parts: vec::IntoIter<Frame>,
}

/// 解析响应时可能出现的错误。
///
/// `EndOfStream`通常用于判断数组是否已经取完，其他错误都说明响应的格式不对。
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// 数组已被消耗完，无法再获取值。
    #[error("数据流过早结束")]
    EndOfStream,
    /// 其他错误。
    #[error("{0}")]
    Other(String),
}

impl Parse {
    /// 创建一个`Parse`来解析`Frame`的内容。
    ///
    /// # Errors
    /// 如果`Frame`不是一个`Array`，返回错误。
    pub(crate) fn new(frame: Frame) -> Result<Parse, ParseError> {
        let array = match frame {
            Frame::Array(array) => array,
            frame => return Err(format!("期望是帧数组，但实际上为：{}", frame).into()),
        };
        Ok(Parse {
            parts: array.into_iter(),
        })
    }

    /// 还剩多少个元素没有取出。
    pub(crate) fn remaining(&self) -> usize {
        self.parts.len()
    }

    /// 获取数组里的下一个`Frame`。
    ///
    /// # Errors
    /// 如果没有`Frame`了，返回`ParseError::EndOfStream`。
    pub(crate) fn next(&mut self) -> Result<Frame, ParseError> {
        self.parts.next().ok_or(ParseError::EndOfStream)
    }

    /// 获取下一个元素并解析为`String`。
    pub(crate) fn next_string(&mut self) -> Result<String, ParseError> {
        match self.next()? {
            Frame::Simple(s) => Ok(s),
            Frame::Bulk(data) => str::from_utf8(&data[..])
                .map(|s| s.to_string())
                .map_err(|_| "非UTF-8编码的字符串".into()),
            frame => Err(format!("预期是Simple或Bulk类型，实际为：{}", frame).into()),
        }
    }

    /// 获取下一个元素并解析为`Bytes`。
    pub(crate) fn next_bytes(&mut self) -> Result<Bytes, ParseError> {
        match self.next()? {
            Frame::Simple(s) => Ok(Bytes::from(s)),
            Frame::Bulk(data) => Ok(data),
            frame => Err(format!("预期是Simple或Bulk类型，实际为：{}", frame).into()),
        }
    }

    /// 获取下一个元素并解析为`f64`。分数、距离等浮点数都以字符串的形式返回。
    pub(crate) fn next_float(&mut self) -> Result<f64, ParseError> {
        let frame = self.next()?;
        to_float(&frame).ok_or_else(|| format!("不合法的浮点数：{}", frame).into())
    }

    /// 获取下一个元素，它本身也是一个数组，返回用于解析它的`Parse`。
    pub(crate) fn next_array(&mut self) -> Result<Parse, ParseError> {
        Parse::new(self.next()?)
    }

    /// 确保数组中已经没有更多元素了。
    pub(crate) fn finish(&mut self) -> Result<(), ParseError> {
        if self.parts.next().is_none() {
            Ok(())
        } else {
            Err("预期Array已经没有更多元素了，但实际相反".into())
        }
    }
}

/// 将`Simple`、`Bulk`或`Integer`转换为`f64`。
pub(crate) fn to_float(frame: &Frame) -> Option<f64> {
    match frame {
        Frame::Integer(v) => Some(*v as f64),
        Frame::Simple(s) => s.parse::<f64>().ok(),
        Frame::Bulk(data) => str::from_utf8(data).ok()?.parse::<f64>().ok(),
        _ => None,
    }
}

impl From<String> for ParseError {
    fn from(value: String) -> ParseError {
        ParseError::Other(value)
    }
}

impl From<&str> for ParseError {
    fn from(value: &str) -> ParseError {
        value.to_string().into()
    }
}

// 响应的格式不对，属于协议错误。
impl From<ParseError> for crate::Error {
    fn from(value: ParseError) -> crate::Error {
        CommandError::Protocol(value.to_string()).into()
    }
}
