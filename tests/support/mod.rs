//! 集成测试用到的服务端。
//!
//! - `start_server()`：进程内的一个小型存储，支持字符串（含过期时间）、列表、集合、
//!   事务（`MULTI`/`EXEC`/`DISCARD`/`WATCH`）、发布/订阅、`AUTH`和`SELECT`；
//! - `scripted()`：按顺序为每个请求返回预先写好的原始响应，用来测试解码和超时。
#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    io::Cursor,
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::{Buf, Bytes, BytesMut};
use my_redis_client::{Connection, Frame};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    sync::broadcast,
    time::Instant,
};
use tokio_stream::{Stream, StreamExt, StreamMap};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// 启动一个不需要认证的服务端。
pub async fn start_server() -> SocketAddr {
    serve(None).await
}

/// 启动一个需要密码的服务端，默认用户名为`default`。
pub async fn start_server_with_password(password: &str) -> SocketAddr {
    serve(Some(password.to_string())).await
}

async fn serve(password: Option<String>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let db = Db::default();

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            let mut handler = Handler {
                db: db.clone(),
                connection: Connection::new(socket),
                authenticated: password.is_none(),
                password: password.clone(),
                index: 0,
                multi: None,
                multi_failed: false,
                watched: vec![],
            };
            tokio::spawn(async move {
                // 客户端断开或超时放弃后，连接上的错误不影响测试。
                let _ = handler.run().await;
            });
        }
    });

    addr
}

/// (数据库编号, key)
type Slot = (u32, Bytes);

type Messages = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

#[derive(Debug, Clone, Default)]
struct Db {
    shared: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<Slot, Entry>,
    // 每次写入都会更新 key 的版本号，`WATCH`据此判断 key 是否被修改过。
    versions: HashMap<Slot, u64>,
    clock: u64,
    pub_sub: HashMap<String, broadcast::Sender<Bytes>>,
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug)]
enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
}

impl Db {
    fn execute(&self, index: u32, args: &[Bytes]) -> Frame {
        let mut state = self.shared.lock().unwrap();
        state.execute(index, args)
    }

    fn version(&self, slot: &Slot) -> u64 {
        let state = self.shared.lock().unwrap();
        state.versions.get(slot).copied().unwrap_or(0)
    }

    /// 在同一把锁内执行所有命令，其他连接看不到中间状态。
    fn exec(&self, index: u32, watched: &[(Slot, u64)], queued: &[Vec<Bytes>]) -> Frame {
        let mut state = self.shared.lock().unwrap();
        let conflict = watched
            .iter()
            .any(|(slot, version)| state.versions.get(slot).copied().unwrap_or(0) != *version);
        if conflict {
            return Frame::Null;
        }
        Frame::Array(queued.iter().map(|args| state.execute(index, args)).collect())
    }

    fn subscribe(&self, channel: String) -> broadcast::Receiver<Bytes> {
        use std::collections::hash_map::Entry;

        let mut state = self.shared.lock().unwrap();
        match state.pub_sub.entry(channel) {
            Entry::Occupied(e) => e.get().subscribe(),
            Entry::Vacant(e) => {
                let (tx, rx) = broadcast::channel(1024);
                e.insert(tx);
                rx
            }
        }
    }

    fn publish(&self, channel: &str, value: Bytes) -> usize {
        let state = self.shared.lock().unwrap();
        state
            .pub_sub
            .get(channel)
            .map(|tx| tx.send(value).unwrap_or(0))
            .unwrap_or(0)
    }
}

impl State {
    /// 取出未过期的条目，已过期的条目在这里被删除。
    fn entry(&mut self, slot: &Slot) -> Option<&mut Entry> {
        let expired = matches!(
            self.entries.get(slot),
            Some(Entry { expires_at: Some(when), .. }) if *when <= Instant::now()
        );
        if expired {
            self.entries.remove(slot);
        }
        self.entries.get_mut(slot)
    }

    fn entry_or_insert(&mut self, slot: &Slot, value: fn() -> Value) -> &mut Entry {
        self.entry(slot);
        self.entries.entry(slot.clone()).or_insert_with(|| Entry {
            value: value(),
            expires_at: None,
        })
    }

    fn touch(&mut self, slot: &Slot) {
        self.clock += 1;
        self.versions.insert(slot.clone(), self.clock);
    }

    fn execute(&mut self, index: u32, args: &[Bytes]) -> Frame {
        let name = command_name(args);
        let slot = |i: usize| (index, args[i].clone());

        match name.as_str() {
            "PING" => match args.get(1) {
                Some(msg) => Frame::Bulk(msg.clone()),
                None => Frame::Simple("PONG".to_string()),
            },
            "GET" => match self.entry(&slot(1)) {
                None => Frame::Null,
                Some(Entry {
                    value: Value::String(data),
                    ..
                }) => Frame::Bulk(data.clone()),
                Some(_) => error(WRONGTYPE),
            },
            "SET" => {
                let expires_at = match &args[3..] {
                    [] => None,
                    [px, ms] if px.eq_ignore_ascii_case(b"PX") => {
                        match std::str::from_utf8(ms).ok().and_then(|s| s.parse().ok()) {
                            Some(ms) => Some(Instant::now() + Duration::from_millis(ms)),
                            None => return error("ERR value is not an integer or out of range"),
                        }
                    }
                    _ => return error("ERR syntax error"),
                };
                let key = slot(1);
                self.entries.insert(
                    key.clone(),
                    Entry {
                        value: Value::String(args[2].clone()),
                        expires_at,
                    },
                );
                self.touch(&key);
                ok()
            }
            "DEL" => {
                let mut removed = 0;
                for i in 1..args.len() {
                    let key = slot(i);
                    if self.entry(&key).is_some() {
                        self.entries.remove(&key);
                        self.touch(&key);
                        removed += 1;
                    }
                }
                Frame::Integer(removed)
            }
            "LPUSH" | "RPUSH" => {
                let key = slot(1);
                let entry = self.entry_or_insert(&key, || Value::List(VecDeque::new()));
                let Value::List(list) = &mut entry.value else {
                    return error(WRONGTYPE);
                };
                for value in &args[2..] {
                    if name == "LPUSH" {
                        list.push_front(value.clone());
                    } else {
                        list.push_back(value.clone());
                    }
                }
                let len = list.len() as i64;
                self.touch(&key);
                Frame::Integer(len)
            }
            "LPOP" | "RPOP" => {
                let key = slot(1);
                let (popped, now_empty) = match self.entry(&key) {
                    None => return Frame::Null,
                    Some(Entry {
                        value: Value::List(list),
                        ..
                    }) => {
                        let popped = if name == "LPOP" {
                            list.pop_front()
                        } else {
                            list.pop_back()
                        };
                        (popped, list.is_empty())
                    }
                    Some(_) => return error(WRONGTYPE),
                };
                if now_empty {
                    self.entries.remove(&key);
                }
                self.touch(&key);
                popped.map(Frame::Bulk).unwrap_or(Frame::Null)
            }
            "SADD" => {
                let key = slot(1);
                let entry = self.entry_or_insert(&key, || Value::Set(HashSet::new()));
                let Value::Set(set) = &mut entry.value else {
                    return error(WRONGTYPE);
                };
                let added = args[2..].iter().filter(|m| set.insert((*m).clone())).count();
                if added > 0 {
                    self.touch(&key);
                }
                Frame::Integer(added as i64)
            }
            "SCARD" => match self.entry(&slot(1)) {
                None => Frame::Integer(0),
                Some(Entry {
                    value: Value::Set(set),
                    ..
                }) => Frame::Integer(set.len() as i64),
                Some(_) => error(WRONGTYPE),
            },
            "SMEMBERS" => match self.entry(&slot(1)) {
                None => Frame::array(),
                Some(Entry {
                    value: Value::Set(set),
                    ..
                }) => Frame::Array(set.iter().cloned().map(Frame::Bulk).collect()),
                Some(_) => error(WRONGTYPE),
            },
            _ => error(&format!("ERR unknown command '{}'", name)),
        }
    }
}

/// 入队之前检查命令名和参数个数。
fn check_arity(args: &[Bytes]) -> Result<(), String> {
    let name = command_name(args);
    let (min, max) = match name.as_str() {
        "PING" => (1, 2),
        "GET" | "LPOP" | "RPOP" | "SCARD" | "SMEMBERS" => (2, 2),
        "SET" => (3, 5),
        "DEL" => (2, usize::MAX),
        "LPUSH" | "RPUSH" | "SADD" => (3, usize::MAX),
        _ => return Err(format!("ERR unknown command '{}'", name)),
    };
    if args.len() < min || args.len() > max {
        return Err(format!(
            "ERR wrong number of arguments for '{}' command",
            name.to_lowercase()
        ));
    }
    Ok(())
}

#[derive(Debug)]
struct Handler {
    db: Db,
    connection: Connection,
    password: Option<String>,
    authenticated: bool,
    index: u32,
    // `MULTI`之后排队的命令。
    multi: Option<Vec<Vec<Bytes>>>,
    // 有命令在入队时就出错了，`EXEC`时整个事务被放弃。
    multi_failed: bool,
    watched: Vec<(Slot, u64)>,
}

impl Handler {
    async fn run(&mut self) -> my_redis_client::Result<()> {
        while let Some(frame) = self.connection.read_frame().await? {
            let args = match request_args(frame) {
                Some(args) => args,
                None => {
                    self.reply(error("ERR Protocol error")).await?;
                    continue;
                }
            };
            let name = command_name(&args);

            if self.multi.is_some() && !matches!(name.as_str(), "EXEC" | "DISCARD" | "MULTI" | "WATCH")
            {
                let response = match check_arity(&args) {
                    Ok(()) => {
                        if let Some(queued) = &mut self.multi {
                            queued.push(args);
                        }
                        Frame::Simple("QUEUED".to_string())
                    }
                    Err(msg) => {
                        self.multi_failed = true;
                        error(&msg)
                    }
                };
                self.reply(response).await?;
                continue;
            }

            if name != "AUTH" && !self.authenticated {
                self.reply(error("NOAUTH Authentication required.")).await?;
                continue;
            }

            let response = match name.as_str() {
                "AUTH" => self.auth(&args),
                "SELECT" => match args
                    .get(1)
                    .and_then(|arg| std::str::from_utf8(arg).ok())
                    .and_then(|s| s.parse::<u32>().ok())
                {
                    Some(index) if index < 16 => {
                        self.index = index;
                        ok()
                    }
                    _ => error("ERR DB index is out of range"),
                },
                "MULTI" if self.multi.is_some() => error("ERR MULTI calls can not be nested"),
                "MULTI" => {
                    self.multi = Some(vec![]);
                    ok()
                }
                "EXEC" => match self.multi.take() {
                    None => error("ERR EXEC without MULTI"),
                    Some(queued) => {
                        let watched = std::mem::take(&mut self.watched);
                        if std::mem::take(&mut self.multi_failed) {
                            error("EXECABORT Transaction discarded because of previous errors.")
                        } else {
                            self.db.exec(self.index, &watched, &queued)
                        }
                    }
                },
                "DISCARD" => match self.multi.take() {
                    None => error("ERR DISCARD without MULTI"),
                    Some(_) => {
                        self.watched.clear();
                        self.multi_failed = false;
                        ok()
                    }
                },
                "WATCH" if self.multi.is_some() => error("ERR WATCH inside MULTI is not allowed"),
                "WATCH" => {
                    for key in &args[1..] {
                        let slot = (self.index, key.clone());
                        let version = self.db.version(&slot);
                        self.watched.push((slot, version));
                    }
                    ok()
                }
                "UNWATCH" => {
                    self.watched.clear();
                    ok()
                }
                "PUBLISH" if args.len() == 3 => {
                    let channel = String::from_utf8_lossy(&args[1]).to_string();
                    let receivers = self.db.publish(&channel, args[2].clone());
                    Frame::Integer(receivers as i64)
                }
                "SUBSCRIBE" => {
                    let channels = args[1..]
                        .iter()
                        .map(|c| String::from_utf8_lossy(c).to_string())
                        .collect();
                    self.subscribe(channels).await?;
                    continue;
                }
                _ => match check_arity(&args) {
                    Ok(()) => self.db.execute(self.index, &args),
                    Err(msg) => error(&msg),
                },
            };
            self.reply(response).await?;
        }
        Ok(())
    }

    fn auth(&mut self, args: &[Bytes]) -> Frame {
        let Some(password) = &self.password else {
            return error("ERR AUTH <password> called without any password configured for the default user.");
        };
        let accepted = match &args[1..] {
            [given] => given == password.as_bytes(),
            [user, given] => user == "default" && given == password.as_bytes(),
            _ => return error("ERR syntax error"),
        };
        if accepted {
            self.authenticated = true;
            ok()
        } else {
            error("WRONGPASS invalid username-password pair or user is disabled.")
        }
    }

    /// 订阅模式，直到所有信道都被取消订阅或者连接断开。
    async fn subscribe(&mut self, channels: Vec<String>) -> my_redis_client::Result<()> {
        let mut subscriptions: StreamMap<String, Messages> = StreamMap::new();
        for channel in channels {
            self.subscribe_to_channel(channel, &mut subscriptions).await?;
        }

        loop {
            tokio::select! {
                Some((channel, msg)) = subscriptions.next() => {
                    let mut frame = Frame::array();
                    frame.push_bulk(Bytes::from_static(b"message"));
                    frame.push_bulk(Bytes::from(channel));
                    frame.push_bulk(msg);
                    self.reply(frame).await?;
                }
                res = self.connection.read_frame() => {
                    let args = match res?.and_then(request_args) {
                        Some(args) => args,
                        None => return Ok(()),
                    };
                    let targets: Vec<String> = args[1..]
                        .iter()
                        .map(|c| String::from_utf8_lossy(c).to_string())
                        .collect();
                    match command_name(&args).as_str() {
                        "SUBSCRIBE" => {
                            for channel in targets {
                                self.subscribe_to_channel(channel, &mut subscriptions).await?;
                            }
                        }
                        "UNSUBSCRIBE" => {
                            let targets = if targets.is_empty() {
                                subscriptions.keys().cloned().collect()
                            } else {
                                targets
                            };
                            for channel in targets {
                                subscriptions.remove(&channel);
                                let frame = Frame::Array(vec![
                                    Frame::Bulk(Bytes::from_static(b"unsubscribe")),
                                    Frame::Bulk(Bytes::from(channel)),
                                    Frame::Integer(subscriptions.len() as i64),
                                ]);
                                self.reply(frame).await?;
                            }
                            if subscriptions.is_empty() {
                                return Ok(());
                            }
                        }
                        name => {
                            let msg = format!("ERR Can't execute '{}' in subscribe mode", name.to_lowercase());
                            self.reply(error(&msg)).await?;
                        }
                    }
                }
            }
        }
    }

    async fn subscribe_to_channel(
        &mut self,
        channel: String,
        subscriptions: &mut StreamMap<String, Messages>,
    ) -> my_redis_client::Result<()> {
        let mut rx = self.db.subscribe(channel.clone());
        let rx = Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(msg) => yield msg,
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(_) => break,
                }
            }
        });
        subscriptions.insert(channel.clone(), rx);

        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from_static(b"subscribe")),
            Frame::Bulk(Bytes::from(channel)),
            Frame::Integer(subscriptions.len() as i64),
        ]);
        self.reply(frame).await
    }

    async fn reply(&mut self, frame: Frame) -> my_redis_client::Result<()> {
        self.connection.write_frame(&frame).await
    }
}

fn ok() -> Frame {
    Frame::Simple("OK".to_string())
}

fn error(msg: &str) -> Frame {
    Frame::Error(msg.to_string())
}

fn command_name(args: &[Bytes]) -> String {
    String::from_utf8_lossy(&args[0]).to_uppercase()
}

/// 请求必须是非空的字符串数组。
fn request_args(frame: Frame) -> Option<Vec<Bytes>> {
    let Frame::Array(items) = frame else {
        return None;
    };
    let args: Vec<Bytes> = items
        .into_iter()
        .map(|item| match item {
            Frame::Bulk(data) => Some(data),
            _ => None,
        })
        .collect::<Option<_>>()?;
    if args.is_empty() {
        return None;
    }
    Some(args)
}

/// 脚本化服务端的一步：读取一个请求，然后做出反应。
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// 原样写出这些字节。
    Reply(&'static str),
    /// 等待一段时间后再写出。
    Delayed(Duration, &'static str),
    /// 不回复，但保持连接。
    Hang,
    /// 关闭连接。
    Close,
}

/// 脚本化的服务端，只接受一个连接。
#[derive(Debug)]
pub struct Script {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Vec<String>>>>,
}

impl Script {
    /// 到目前为止收到的请求。
    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().unwrap().clone()
    }
}

pub async fn scripted(steps: Vec<Step>) -> Script {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(vec![]));
    let log = requests.clone();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buffer = BytesMut::new();
        for step in steps {
            let request = loop {
                if let Some(frame) = try_parse(&mut buffer) {
                    break frame;
                }
                match socket.read_buf(&mut buffer).await {
                    Ok(n) if n > 0 => {}
                    _ => return,
                }
            };
            let request = request_args(request)
                .unwrap_or_default()
                .iter()
                .map(|arg| String::from_utf8_lossy(arg).to_string())
                .collect();
            log.lock().unwrap().push(request);

            match step {
                Step::Reply(raw) => {
                    if socket.write_all(raw.as_bytes()).await.is_err() {
                        return;
                    }
                }
                Step::Delayed(delay, raw) => {
                    tokio::time::sleep(delay).await;
                    if socket.write_all(raw.as_bytes()).await.is_err() {
                        return;
                    }
                }
                Step::Hang => std::future::pending::<()>().await,
                Step::Close => return,
            }
        }
        // 脚本执行完后保持连接，直到客户端关闭。
        let mut rest = [0u8; 64];
        while matches!(socket.read(&mut rest).await, Ok(n) if n > 0) {}
    });

    Script { addr, requests }
}

fn try_parse(buffer: &mut BytesMut) -> Option<Frame> {
    let mut cursor = Cursor::new(&buffer[..]);
    Frame::check(&mut cursor).ok()?;
    let len = cursor.position() as usize;
    cursor.set_position(0);
    let frame = Frame::parse(&mut cursor).ok()?;
    buffer.advance(len);
    Some(frame)
}
