use std::io::Cursor;

use bytes::{Buf, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufWriter},
    net::TcpStream,
};

use crate::{CommandError, ConnectionError, Frame};

/// 发送和接收`Frame`值。
///
/// `Connection`只负责在`TcpStream`之上读写完整的帧，不关心帧的含义。
/// 请求和响应如何对应由`Client`负责。
#[derive(Debug)]
pub struct Connection {
    // `TcpStream`用`BufWriter`封装，提供缓存写。
    stream: BufWriter<TcpStream>,

    // 读取帧时用到的缓存，会在需要的时候隐式地扩大空间。
    buffer: BytesMut,

    // 编码帧时用到的缓存。所有要发送的帧先编码到这里，再一次性写入 socket。
    out: BytesMut,
}

impl Connection {
    /// 创建一个`Connection`，同时初始化缓存。
    pub fn new(socket: TcpStream) -> Connection {
        Connection {
            stream: BufWriter::new(socket),
            // 使用4KB的读缓存即可，反正它会按照需要自动增长。
            buffer: BytesMut::with_capacity(4 * 1024),
            out: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// 从连接中读取一个完整的`Frame`。
    ///
    /// 此函数会一直工作直到能读取到完整的`Frame`。假如读取到的数据不足以
    /// 解析为`Frame`，这些数据会被存储在缓存中，等待下一次的循环。
    /// 由于未完成的数据都留在缓存中，在`.await`处取消这个函数不会丢失数据。
    ///
    /// # Output
    /// 如果成功解析出`Frame`，返回`Ok(Some(frame))`；
    /// 如果 socket 正常关闭，没有数据了，返回`Ok(None)`；
    /// 如果 socket 意外关闭，数据不完整，返回`ConnectionError::Closed`；
    /// 如果数据不符合协议，返回`CommandError::Protocol`。
    pub async fn read_frame(&mut self) -> crate::Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            // 返回`0`表示对方关闭了 socket。
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                // 缓存中没有数据说明对方是正常关闭的，
                // 否则说明有数据帧是不完整的。
                if self.buffer.is_empty() {
                    return Ok(None);
                } else {
                    return Err(ConnectionError::Closed.into());
                }
            }
        }
    }

    /// 尝试从缓存中解析`Frame`。
    ///
    /// # Output
    /// 如果缓存中数据不完整，返回`Ok(None)`；如果解析成功，返回`Ok(Some(frame))`。
    fn parse_frame(&mut self) -> crate::Result<Option<Frame>> {
        use crate::frame::Error::{Incomplete, Invalid};

        let mut buf = Cursor::new(&self.buffer[..]);

        // 先检查是否有一个完整的帧，这比真正的解析快很多。
        match Frame::check(&mut buf) {
            Ok(_) => {
                // `check()`会将光标移动到帧的末尾。
                let len = buf.position() as usize;
                buf.set_position(0);

                let frame = Frame::parse(&mut buf)
                    .map_err(|e| CommandError::Protocol(e.to_string()))?;

                // 将已经处理过的数据从读缓存中移除。
                self.buffer.advance(len);

                Ok(Some(frame))
            }
            // 读缓存中没有足够的数据，这是预期之中的运行状态。
            Err(Incomplete) => Ok(None),
            Err(Invalid(msg)) => Err(CommandError::Protocol(msg).into()),
        }
    }

    /// 向 socket 中写入一个`Frame`。
    pub async fn write_frame(&mut self, frame: &Frame) -> crate::Result<()> {
        self.write_frames(std::slice::from_ref(frame)).await
    }

    /// 将多个`Frame`编码后作为一次连续的写入发送出去。
    ///
    /// 流水线和事务都依赖它：中间不会穿插其他请求，
    /// 服务端按顺序处理，响应也按顺序返回。
    pub async fn write_frames(&mut self, frames: &[Frame]) -> crate::Result<()> {
        self.out.clear();
        for frame in frames {
            frame.encode(&mut self.out);
        }
        self.stream.write_all(&self.out).await?;
        // 上面的调用可能只是写入到了缓存中，这里确保数据都写入了 socket。
        self.stream.flush().await?;
        Ok(())
    }

    /// 关闭写端，通知对方不会再发送数据了。
    pub async fn shutdown(&mut self) -> crate::Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
