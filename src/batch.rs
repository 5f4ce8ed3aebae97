//! 批处理：把多条命令放在一次写入中发送。
//!
//! 有两种模式：
//! - 流水线（`BatchMode::Pipelined`）：不保证原子性，只节省往返次数。
//!   某条命令失败不会影响其他命令，每条命令都有各自的响应。
//! - 事务（`BatchMode::Transactional`）：用`MULTI`/`EXEC`包裹，所有写入要么
//!   一起可见，要么都不可见。可以先`watch()`一些 key，如果它们在提交前被其他
//!   连接修改了，整个事务被放弃，结果为`Outcome::Aborted`。
//!
//! 状态转换：`Open -> Sealed -> {Completed | Aborted}`。提交之后不能再加入命令。

use std::time::Duration;

use tracing::debug;

use crate::{
    client::Client,
    cmd::{collect_non_empty, expect_ok},
    Command, CommandError, Error, Frame,
};

/// 单条命令的响应。服务端返回的错误转换为`CommandError::Remote`。
pub type Reply = Result<Frame, CommandError>;

/// 批处理的模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Pipelined,
    Transactional,
}

/// 批处理的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// 可以继续加入命令。
    Open,
    /// 已经提交，正在等待响应，或者提交过程中出错了。
    Sealed,
    /// 所有响应都已读取。
    Completed,
    /// 事务被放弃，没有任何写入生效。
    Aborted,
}

/// 事务提交的结果。
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 事务已执行，按加入的顺序给出每条命令的响应。
    Completed(Vec<Reply>),
    /// 被`WATCH`的 key 在提交前被修改了，事务没有执行。
    Aborted,
}

/// 一组等待一起发送的命令。
///
/// `Batch`在整个生命周期内借用`Client`，所以在它被丢弃之前，
/// 这个连接上不会有其他请求穿插进来。
#[derive(Debug)]
pub struct Batch<'a> {
    client: &'a mut Client,
    mode: BatchMode,
    commands: Vec<Command>,
    // 是否发送过`WATCH`。
    watching: bool,
    state: BatchState,
}

impl Client {
    /// 创建一个流水线批处理。
    pub fn pipeline(&mut self) -> Batch<'_> {
        Batch::new(self, BatchMode::Pipelined)
    }

    /// 创建一个事务批处理。
    pub fn transaction(&mut self) -> Batch<'_> {
        Batch::new(self, BatchMode::Transactional)
    }
}

impl<'a> Batch<'a> {
    fn new(client: &'a mut Client, mode: BatchMode) -> Batch<'a> {
        Batch {
            client,
            mode,
            commands: vec![],
            watching: false,
            state: BatchState::Open,
        }
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// 已经加入的命令个数。
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// 加入一条命令。
    ///
    /// # Errors
    /// 批处理已经提交过时返回`Error::SealedBatch`；
    /// 订阅类的命令返回`Error::InvalidState`。
    pub fn enqueue(&mut self, cmd: Command) -> crate::Result<&mut Batch<'a>> {
        if self.state != BatchState::Open {
            return Err(Error::SealedBatch);
        }
        if cmd.enters_push_mode() {
            return Err(Error::InvalidState("订阅类命令不能放在批处理中"));
        }
        self.commands.push(cmd);
        Ok(self)
    }

    /// 监视一些 key。从现在到`commit()`之间，只要其中任何一个被其他连接修改，
    /// 事务就会被放弃。
    ///
    /// `WATCH`会立即发送给服务端。之前被丢弃的事务留下的监视会先被取消。
    pub async fn watch<I>(&mut self, keys: I) -> crate::Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        if self.mode != BatchMode::Transactional {
            return Err(Error::InvalidState("只有事务批处理可以 WATCH"));
        }
        if self.state != BatchState::Open {
            return Err(Error::SealedBatch);
        }
        let keys = collect_non_empty(keys, "key")?;

        let mut frames = Vec::with_capacity(2);
        if self.stale_watch() {
            frames.push(Command::unwatch().into_frame());
        }
        frames.push(Command::watch(keys).into_frame());

        let deadline = self.client.deadline(Duration::ZERO);
        let replies = self.client.exchange(frames, deadline).await?;
        // `UNWATCH`已经清除了之前的监视，只剩下这次`WATCH`的结果。
        self.client.watching = false;
        for frame in replies {
            expect_ok_reply(frame)?;
        }
        self.watching = true;
        self.client.watching = true;
        Ok(())
    }

    /// 以流水线的方式发送所有命令，按顺序返回每条命令的响应。
    ///
    /// 所有命令在一次写入中发送，然后读取同样数量的响应。
    /// 某条命令失败时，对应位置是`Err(CommandError::Remote)`，其他命令不受影响。
    ///
    /// # Errors
    /// 批处理已经提交过时返回`Error::SealedBatch`；连接出错或超时时返回对应的错误，
    /// 此时已经无法得知哪些命令生效了。
    pub async fn execute(&mut self) -> crate::Result<Vec<Reply>> {
        if self.mode != BatchMode::Pipelined {
            return Err(Error::InvalidState("事务批处理应该使用 commit()"));
        }
        let commands = self.seal()?;
        if commands.is_empty() {
            self.state = BatchState::Completed;
            return Ok(vec![]);
        }

        // 服务端按顺序执行，阻塞型命令的等待时间需要累加。
        let block: Duration = commands.iter().filter_map(Command::block).sum();
        debug!(count = commands.len(), ?block, "发送流水线");
        let frames = commands.into_iter().map(Command::into_frame).collect();
        let deadline = self.client.deadline(block);
        let replies = self.client.exchange(frames, deadline).await?;

        self.state = BatchState::Completed;
        Ok(replies.into_iter().map(into_reply).collect())
    }

    /// 以事务的方式提交所有命令。
    ///
    /// `MULTI`、所有命令和`EXEC`在一次写入中发送。
    ///
    /// # Output
    /// 事务执行后返回`Outcome::Completed`，其中每条命令都有各自的响应；
    /// 被`WATCH`的 key 被修改过时返回`Outcome::Aborted`。
    ///
    /// # Errors
    /// 某条命令在入队时就被服务端拒绝（比如参数个数不对）时，整个事务被放弃，
    /// 返回服务端的错误信息，状态变为`Aborted`。
    pub async fn commit(&mut self) -> crate::Result<Outcome> {
        if self.mode != BatchMode::Transactional {
            return Err(Error::InvalidState("流水线批处理应该使用 execute()"));
        }
        let commands = self.seal()?;
        let count = commands.len();
        // 这个事务没有`watch()`，但连接上还留着别的事务的监视。
        let unwatch = self.stale_watch();

        let mut frames = Vec::with_capacity(count + 3);
        if unwatch {
            frames.push(Command::unwatch().into_frame());
        }
        frames.push(Command::multi().into_frame());
        frames.extend(commands.into_iter().map(Command::into_frame));
        frames.push(Command::exec().into_frame());

        debug!(count, watching = self.watching, "提交事务");
        let deadline = self.client.deadline(Duration::ZERO);
        let replies = self.client.exchange(frames, deadline).await?;
        // 无论结果如何，`EXEC`都会取消所有的`WATCH`。
        self.watching = false;
        self.client.watching = false;

        let mut replies = replies.into_iter();

        if unwatch {
            expect_ok_reply(replies.next().ok_or_else(missing_reply)?)?;
        }

        match replies.next() {
            Some(Frame::Simple(ref s)) if s == "OK" => {}
            Some(Frame::Error(msg)) => return Err(CommandError::Remote(msg).into()),
            Some(frame) => return Err(frame.to_error().into()),
            None => return Err(missing_reply()),
        }

        // 每条命令入队时服务端都会回复`QUEUED`，或者一个错误。
        let mut queue_error = None;
        for _ in 0..count {
            match replies.next() {
                Some(Frame::Simple(ref s)) if s == "QUEUED" => {}
                Some(Frame::Error(msg)) => {
                    queue_error.get_or_insert(msg);
                }
                Some(frame) => return Err(frame.to_error().into()),
                None => return Err(missing_reply()),
            }
        }

        match replies.next() {
            Some(Frame::Null) => {
                debug!("被监视的 key 已被修改，事务被放弃");
                self.state = BatchState::Aborted;
                Ok(Outcome::Aborted)
            }
            Some(Frame::Array(results)) => {
                if results.len() != count {
                    return Err(CommandError::Protocol(format!(
                        "事务中有{}条命令，但是收到了{}个响应",
                        count,
                        results.len()
                    ))
                    .into());
                }
                self.state = BatchState::Completed;
                Ok(Outcome::Completed(
                    results.into_iter().map(into_reply).collect(),
                ))
            }
            Some(Frame::Error(msg)) => {
                self.state = BatchState::Aborted;
                Err(CommandError::Remote(queue_error.unwrap_or(msg)).into())
            }
            Some(frame) => Err(frame.to_error().into()),
            None => Err(missing_reply()),
        }
    }

    /// 放弃这个批处理，不发送任何命令。如果发送过`WATCH`，会取消监视。
    pub async fn discard(&mut self) -> crate::Result<()> {
        self.seal()?;
        self.state = BatchState::Aborted;
        if self.client.watching {
            self.watching = false;
            self.client.watching = false;
            let frame = self.client.send_and_receive(Command::unwatch()).await?;
            expect_ok(frame)?;
        }
        Ok(())
    }

    /// 连接上的监视是否来自另一个已经被丢弃的事务。
    fn stale_watch(&self) -> bool {
        self.client.watching && !self.watching
    }

    /// `Open -> Sealed`，取出所有命令。
    fn seal(&mut self) -> crate::Result<Vec<Command>> {
        if self.state != BatchState::Open {
            return Err(Error::SealedBatch);
        }
        self.state = BatchState::Sealed;
        Ok(std::mem::take(&mut self.commands))
    }
}

fn into_reply(frame: Frame) -> Reply {
    match frame {
        Frame::Error(msg) => Err(CommandError::Remote(msg)),
        frame => Ok(frame),
    }
}

fn expect_ok_reply(frame: Frame) -> crate::Result<()> {
    match into_reply(frame) {
        Ok(frame) => expect_ok(frame),
        Err(err) => Err(err.into()),
    }
}

fn missing_reply() -> Error {
    CommandError::Protocol("响应个数少于请求个数".to_string()).into()
}
