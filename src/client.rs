//! 与服务端之间的一个逻辑会话。
//!
//! `Client`独占一个`Connection`，每次请求都是一次完整的“写入-读取”往返。
//! 所有操作都需要`&mut self`，因此同一时刻只能有一个调用方使用它；
//! 需要并发时应该为每个调用方各自建立连接。

use std::{collections::VecDeque, time::Duration};

use bytes::Bytes;
use tokio::{
    net::{TcpStream, ToSocketAddrs},
    time::{self, Instant},
};
use tokio_stream::Stream;
use tracing::{debug, warn};

use crate::{
    parse::Parse, Command, CommandError, Connection, ConnectionConfig, ConnectionError, Error,
    Frame,
};

/// 负责与服务端建立连接并收发命令。
#[derive(Debug)]
pub struct Client {
    connection: Connection,
    // 每次往返的最长等待时间。
    command_timeout: Option<Duration>,
    state: State,
    // 连接上是否还有没被`EXEC`或`UNWATCH`清除的`WATCH`。
    pub(crate) watching: bool,
}

/// 连接的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    // 出现过超时或协议错误，数据流中可能残留着未读取的响应。
    Poisoned,
    Closed,
}

/// 一个进入了发布/订阅模式的客户端。
///
/// 进入订阅模式的连接只能处理订阅相关的命令，所以`Client::subscribe()`
/// 会消耗掉`Client`，普通命令在类型层面就无法再发送了。
#[derive(Debug)]
pub struct Subscriber {
    client: Client,
    subscribed_channels: Vec<String>,
    // 等待订阅确认时先到达的信息。
    pending: VecDeque<Message>,
    closed: bool,
}

/// 从订阅信道中获取到的信息。
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub channel: String,
    pub content: Bytes,
}

/// `Subscriber::receive()`的结果。
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// 收到了一条信息。
    Message(Message),
    /// 订阅已经关闭，之后的调用也都会返回它。
    Closed,
    /// 在给定的时间内没有收到信息，订阅仍然可以继续使用。
    TimedOut,
}

impl Client {
    /// 按照配置建立连接。
    ///
    /// 连接建立后，如果配置了凭证就发送`AUTH`，如果数据库编号不为 0 就发送`SELECT`。
    ///
    /// # Errors
    /// 无法连接时返回`ConnectionError::Refused`，超时返回`ConnectionError::Timeout`，
    /// 凭证被拒绝时返回`ConnectionError::Auth`。
    pub async fn open(config: ConnectionConfig) -> crate::Result<Client> {
        config.validate()?;
        let addr = config.addr();

        let socket = match time::timeout(config.connect_timeout, TcpStream::connect(&addr)).await
        {
            Ok(Ok(socket)) => socket,
            Ok(Err(err)) => return Err(ConnectionError::Refused(err).into()),
            Err(_) => return Err(ConnectionError::Timeout.into()),
        };
        debug!(%addr, "已建立连接");

        let mut client = Client::new(socket, config.command_timeout);

        if let Some(credentials) = &config.credentials {
            let cmd = Command::auth(credentials.username.as_deref(), &credentials.password);
            match client.send_and_receive(cmd).await {
                Ok(frame) => crate::cmd::expect_ok(frame)?,
                Err(Error::Command(CommandError::Remote(msg))) => {
                    return Err(ConnectionError::Auth(msg).into())
                }
                Err(err) => return Err(err),
            }
        }

        if config.database != 0 {
            let frame = client.send_and_receive(Command::select(config.database)).await?;
            crate::cmd::expect_ok(frame)?;
        }

        Ok(client)
    }

    /// 使用默认的超时时间连接到指定地址，不认证，使用 0 号数据库。
    pub async fn connect<T: ToSocketAddrs>(addr: T) -> crate::Result<Client> {
        let socket = TcpStream::connect(addr)
            .await
            .map_err(ConnectionError::Refused)?;
        Ok(Client::new(
            socket,
            ConnectionConfig::default().command_timeout,
        ))
    }

    fn new(socket: TcpStream, command_timeout: Option<Duration>) -> Client {
        Client {
            connection: Connection::new(socket),
            command_timeout,
            state: State::Ready,
            watching: false,
        }
    }

    /// 关闭连接。可以重复调用，之后的所有命令都会返回`ConnectionError::Closed`。
    pub async fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        self.state = State::Closed;
        // 对方可能已经关闭了 socket，这里的错误没有处理的必要。
        if let Err(err) = self.connection.shutdown().await {
            debug!(%err, "关闭连接时出错");
        }
    }

    /// 连接是否已经关闭。
    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// 连接是否因为超时等原因不能再使用了。
    pub fn is_poisoned(&self) -> bool {
        self.state == State::Poisoned
    }

    /// 修改每次往返的最长等待时间。
    pub fn set_command_timeout(&mut self, timeout: Option<Duration>) {
        self.command_timeout = timeout;
    }

    /// 发送一条命令并等待它的响应。
    ///
    /// # Errors
    /// 服务端返回错误时返回`CommandError::Remote`，其内容就是服务端的错误信息；
    /// 超过`command_timeout`时返回`CommandError::Timeout`，此后这个连接不能再使用。
    /// 订阅类的命令（`SUBSCRIBE`、`MONITOR`等）返回`Error::InvalidState`，
    /// 应该使用`Client::subscribe()`。
    pub async fn send_and_receive(&mut self, cmd: Command) -> crate::Result<Frame> {
        let deadline = self.deadline(Duration::ZERO);
        self.send_until(cmd, deadline).await
    }

    /// 与`send_and_receive()`相同，但是使用调用方给定的截止时间。
    pub async fn send_with_deadline(
        &mut self,
        cmd: Command,
        deadline: Instant,
    ) -> crate::Result<Frame> {
        self.send_until(cmd, Some(deadline)).await
    }

    pub(crate) async fn send_until(
        &mut self,
        cmd: Command,
        deadline: Option<Instant>,
    ) -> crate::Result<Frame> {
        if cmd.enters_push_mode() {
            return Err(Error::InvalidState("订阅类命令只能通过 Client::subscribe() 发送"));
        }
        let mut replies = self.exchange(vec![cmd.into_frame()], deadline).await?;
        match replies.pop() {
            Some(Frame::Error(msg)) => Err(CommandError::Remote(msg).into()),
            Some(frame) => Ok(frame),
            None => Err(CommandError::Protocol("没有读取到响应".to_string()).into()),
        }
    }

    /// 根据`command_timeout`计算截止时间，`extra`用于阻塞型命令额外等待的时间。
    pub(crate) fn deadline(&self, extra: Duration) -> Option<Instant> {
        self.command_timeout
            .map(|timeout| Instant::now() + timeout + extra)
    }

    /// 一次性写入所有帧，然后按顺序读取同样数量的响应帧。
    ///
    /// 返回的响应中可能包含`Frame::Error`，由调用方决定如何处理。
    /// 只要出现了错误，数据流就可能已经错位了，连接随即不能再使用。
    pub(crate) async fn exchange(
        &mut self,
        frames: Vec<Frame>,
        deadline: Option<Instant>,
    ) -> crate::Result<Vec<Frame>> {
        self.ensure_ready()?;

        let result = match deadline {
            Some(deadline) => {
                match time::timeout_at(deadline, transfer(&mut self.connection, &frames)).await {
                    Ok(result) => result,
                    Err(_) => Err(CommandError::Timeout.into()),
                }
            }
            None => transfer(&mut self.connection, &frames).await,
        };

        if let Err(err) = &result {
            self.state = match err {
                Error::Connection(ConnectionError::Closed) => State::Closed,
                _ => State::Poisoned,
            };
            warn!(%err, "请求失败，连接不能再使用");
        }
        result
    }

    fn ensure_ready(&self) -> crate::Result<()> {
        match self.state {
            State::Ready => Ok(()),
            State::Poisoned => Err(ConnectionError::Poisoned.into()),
            State::Closed => Err(ConnectionError::Closed.into()),
        }
    }

    /// 订阅指定信道，将`Client`封装为`Subscriber`。对应`Subscribe`命令。
    ///
    /// # Output
    /// 如果成功则返回`Subscriber`。如果发送请求或读取响应出错，返回`Err`。
    pub async fn subscribe(self, channels: Vec<String>) -> crate::Result<Subscriber> {
        if channels.is_empty() {
            return Err(Error::InvalidArgument("必须指定至少一个信道".to_string()));
        }
        self.ensure_ready()?;

        let mut subscriber = Subscriber {
            client: self,
            subscribed_channels: vec![],
            pending: VecDeque::new(),
            closed: false,
        };
        subscriber.subscribe(&channels).await?;
        Ok(subscriber)
    }
}

/// 写入请求并读取对应数量的响应。
async fn transfer(connection: &mut Connection, frames: &[Frame]) -> crate::Result<Vec<Frame>> {
    connection.write_frames(frames).await?;

    let mut replies = Vec::with_capacity(frames.len());
    for _ in 0..frames.len() {
        replies.push(read_response(connection).await?);
    }
    Ok(replies)
}

/// 从 socket 中读取一个响应帧。服务器关闭连接时返回`ConnectionError::Closed`。
async fn read_response(connection: &mut Connection) -> crate::Result<Frame> {
    match connection.read_frame().await? {
        Some(frame) => Ok(frame),
        None => Err(ConnectionError::Closed.into()),
    }
}

impl Subscriber {
    /// 已经订阅的信道。
    pub fn get_subscribed(&self) -> &[String] {
        &self.subscribed_channels
    }

    /// 订阅更多的信道。
    pub async fn subscribe(&mut self, channels: &[String]) -> crate::Result<()> {
        if channels.is_empty() {
            return Ok(());
        }
        self.ensure_open()?;
        let cmd = Command::subscribe(channels);
        self.client.connection.write_frame(&cmd.into_frame()).await?;

        // 对于每个信道的订阅请求，服务端都会发送一个确认信息：
        // [ "subscribe", channel, num-subscribed ]
        for channel in channels {
            let mut parse = self.read_confirmation("subscribe").await?;
            let confirmed = parse.next_string()?;
            if confirmed != *channel {
                return Err(
                    CommandError::Protocol(format!("订阅了预料之外的信道：{}", confirmed)).into(),
                );
            }
            self.subscribed_channels.push(confirmed);
        }
        Ok(())
    }

    /// 取消订阅。`channels`为空时取消所有订阅。
    pub async fn unsubscribe(&mut self, channels: &[String]) -> crate::Result<()> {
        self.ensure_open()?;
        let targets: Vec<String> = if channels.is_empty() {
            self.subscribed_channels.clone()
        } else {
            channels.to_vec()
        };
        if targets.is_empty() {
            return Ok(());
        }

        let cmd = Command::unsubscribe(channels);
        self.client.connection.write_frame(&cmd.into_frame()).await?;

        // [ "unsubscribe", channel, num-subscribed ]
        for _ in &targets {
            let mut parse = self.read_confirmation("unsubscribe").await?;
            let channel = parse.next_string()?;
            self.subscribed_channels.retain(|c| *c != channel);
        }
        Ok(())
    }

    /// 读取一个(取消)订阅确认，返回指向信道名的`Parse`。
    ///
    /// 在此之前到达的信息会被暂存起来，之后由`receive()`返回。
    async fn read_confirmation(&mut self, kind: &str) -> crate::Result<Parse> {
        let deadline = self.client.deadline(Duration::ZERO);
        loop {
            let read = self.client.connection.read_frame();
            let frame = match deadline {
                Some(deadline) => match time::timeout_at(deadline, read).await {
                    Ok(frame) => frame,
                    Err(_) => {
                        self.client.state = State::Poisoned;
                        return Err(CommandError::Timeout.into());
                    }
                },
                None => read.await,
            };
            let frame = match frame {
                Ok(Some(Frame::Error(msg))) => return Err(CommandError::Remote(msg).into()),
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.closed = true;
                    return Err(ConnectionError::Closed.into());
                }
                Err(err) => return Err(self.poison(err)),
            };

            let mut parse = Parse::new(frame)?;
            let head = parse.next_string()?;
            if head == kind {
                return Ok(parse);
            }
            if head == "message" {
                let message = parse_message(&mut parse)?;
                self.pending.push_back(message);
                continue;
            }
            return Err(CommandError::Protocol(format!("预料之外的响应：{}", head)).into());
        }
    }

    /// 获取已订阅的信道的信息，如果没有就等待。
    ///
    /// `timeout`为`None`时一直等待。超时不会影响之后的读取，
    /// 未读完的数据仍然留在缓存中。
    pub async fn receive(&mut self, timeout: Option<Duration>) -> crate::Result<Received> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Received::Message(message));
        }
        if self.closed {
            return Ok(Received::Closed);
        }
        self.client.ensure_ready()?;

        loop {
            let read = self.client.connection.read_frame();
            let frame = match timeout {
                Some(timeout) => match time::timeout(timeout, read).await {
                    Ok(frame) => frame,
                    Err(_) => return Ok(Received::TimedOut),
                },
                None => read.await,
            };

            let frame = match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.closed = true;
                    return Ok(Received::Closed);
                }
                Err(err) => return Err(self.poison(err)),
            };

            let mut parse = Parse::new(frame)?;
            match &parse.next_string()?[..] {
                "message" => return Ok(Received::Message(parse_message(&mut parse)?)),
                // 其他推送（比如迟到的订阅确认）与信息无关，跳过。
                other => debug!(kind = other, "跳过订阅模式下的非信息推送"),
            }
        }
    }

    /// 关闭订阅。之后`receive()`只会返回`Received::Closed`。
    pub async fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
        self.client.close().await;
    }

    /// 将`Subscriber`转换为信息流，订阅关闭后流结束。
    pub fn into_stream(mut self) -> impl Stream<Item = crate::Result<Message>> {
        async_stream::try_stream! {
            loop {
                match self.receive(None).await? {
                    Received::Message(message) => yield message,
                    Received::Closed => break,
                    Received::TimedOut => {}
                }
            }
        }
    }

    /// 读取出错后缓存中的数据已经无法对齐，订阅不能再使用。
    fn poison(&mut self, err: Error) -> Error {
        warn!(%err, "读取订阅信息失败，连接不能再使用");
        self.client.state = match &err {
            Error::Connection(ConnectionError::Closed) => State::Closed,
            _ => State::Poisoned,
        };
        err
    }

    fn ensure_open(&self) -> crate::Result<()> {
        if self.closed {
            return Err(ConnectionError::Closed.into());
        }
        self.client.ensure_ready()
    }
}

/// 解析信息推送：[ "message", channel, content ]，`message`已经被取出。
fn parse_message(parse: &mut Parse) -> crate::Result<Message> {
    let channel = parse.next_string()?;
    let content = parse.next_bytes()?;
    parse.finish()?;
    Ok(Message { channel, content })
}
