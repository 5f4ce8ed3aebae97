use bytes::Bytes;
use clap::{Parser, Subcommand};
use my_redis_client::{
    cmd::{GeoPoint, GeoUnit, StreamId},
    Client, ConnectionConfig, Credentials, Received, DEFAULT_PORT,
};
use std::{convert::Infallible, num::ParseIntError, str, time::Duration};
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "my-redis-client",
    version,
    author,
    about = "一个自实现的Redis客户端"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
    #[arg(name = "hostname", long, default_value = "127.0.0.1")]
    // default_value 接受一个参数 default，类型为 &str
    host: String,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    // default_value_t 类似，参数类型为 &str，但是他会尝试转换为指定类型
    port: u16,
    /// 逻辑数据库编号。
    #[arg(long, default_value_t = 0)]
    db: u32,
    #[arg(long, requires = "password")]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
    /// 建立连接的超时时间，单位为毫秒。
    #[arg(long, value_parser = duration_from_ms_str, default_value = "5000")]
    connect_timeout: Duration,
    /// 每次请求的超时时间，单位为毫秒，0 表示不限制。
    #[arg(long, value_parser = duration_from_ms_str, default_value = "5000")]
    timeout: Duration,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping {
        #[arg(value_parser = bytes_from_str)]
        msg: Option<Bytes>,
    },
    Get {
        key: String,
    },
    Set {
        key: String,
        // clap 从命令行自动获取的`&str`无法自动转换为`Bytes`，
        // 所以我们要提供一个解析器。
        #[arg(value_parser = bytes_from_str)]
        value: Bytes,
        // 如果这个字段没有设置，就为`None`,
        // 否则就调用解析器。
        #[arg(value_parser = duration_from_ms_str)]
        expires: Option<Duration>,
    },
    Del {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    Lpush {
        key: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    Rpush {
        key: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    Lpop {
        key: String,
    },
    Rpop {
        key: String,
    },
    Sadd {
        key: String,
        #[arg(required = true)]
        members: Vec<String>,
    },
    Scard {
        key: String,
    },
    Smembers {
        key: String,
    },
    Zadd {
        key: String,
        score: f64,
        member: String,
    },
    Zrange {
        key: String,
        #[arg(allow_hyphen_values = true)]
        start: i64,
        #[arg(allow_hyphen_values = true)]
        stop: i64,
    },
    Zpopmax {
        key: String,
    },
    Hset {
        key: String,
        field: String,
        value: String,
    },
    Hgetall {
        key: String,
    },
    Geoadd {
        key: String,
        #[arg(allow_hyphen_values = true)]
        longitude: f64,
        #[arg(allow_hyphen_values = true)]
        latitude: f64,
        name: String,
    },
    Geodist {
        key: String,
        a: String,
        b: String,
        #[arg(default_value = "km")]
        unit: GeoUnit,
    },
    Geosearch {
        key: String,
        #[arg(allow_hyphen_values = true)]
        longitude: f64,
        #[arg(allow_hyphen_values = true)]
        latitude: f64,
        radius_km: f64,
    },
    Pfadd {
        key: String,
        elements: Vec<String>,
    },
    Pfcount {
        key: String,
    },
    Xadd {
        key: String,
        /// 字段和值交替排列：field value [field value ...]
        #[arg(required = true, num_args = 2..)]
        pairs: Vec<String>,
    },
    XgroupCreate {
        key: String,
        group: String,
        #[arg(default_value = "0")]
        start_id: String,
    },
    Xreadgroup {
        key: String,
        group: String,
        consumer: String,
        #[arg(long, default_value_t = 1)]
        count: usize,
        /// 没有条目时最多阻塞的时间，单位为毫秒。
        #[arg(long, value_parser = duration_from_ms_str)]
        block: Option<Duration>,
    },
    Xack {
        key: String,
        group: String,
        #[arg(required = true)]
        ids: Vec<StreamId>,
    },
    Publish {
        channel: String,
        #[arg(value_parser = bytes_from_str)]
        message: Bytes,
    },
    Subscribe {
        // clap 可以自动收集参数并构造成`Vec`。
        #[arg(required = true)]
        channels: Vec<String>,
    },
}

fn duration_from_ms_str(src: &str) -> Result<Duration, ParseIntError> {
    let ms = src.parse::<u64>()?;
    Ok(Duration::from_millis(ms))
}

// `Infallible`表示永远不会错误
fn bytes_from_str(src: &str) -> Result<Bytes, Infallible> {
    Ok(Bytes::from(src.to_string()))
}

impl Args {
    fn config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(&self.host, self.port);
        config.database = self.db;
        config.connect_timeout = self.connect_timeout;
        config.command_timeout = if self.timeout.is_zero() {
            None
        } else {
            Some(self.timeout)
        };
        config.credentials = self.password.clone().map(|password| Credentials {
            username: self.username.clone(),
            password,
        });
        config
    }
}

/// 按照 redis-cli 的习惯打印字符串。
fn print_bytes(value: &[u8]) {
    if let Ok(string) = str::from_utf8(value) {
        println!("\"{}\"", string);
    } else {
        println!("{:?}", value);
    }
}

fn print_optional(value: Option<Bytes>) {
    match value {
        Some(value) => print_bytes(&value),
        None => println!("(nil)"),
    }
}

fn print_list(values: &[Bytes]) {
    if values.is_empty() {
        println!("(empty array)");
    }
    for (i, value) in values.iter().enumerate() {
        print!("{}) ", i + 1);
        print_bytes(value);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> my_redis_client::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    // 获取命令行参数。
    let args = Args::parse();
    // 连接服务端。
    let mut client = Client::open(args.config()).await?;
    // 执行命令，解析响应。
    match args.command {
        Command::Ping { msg } => {
            let pong = client.ping(msg).await?;
            print_bytes(&pong);
        }
        Command::Get { key } => print_optional(client.get(&key).await?),
        Command::Set {
            key,
            value,
            expires: None,
        } => {
            client.set(&key, value).await?;
            println!("OK")
        }
        Command::Set {
            key,
            value,
            expires: Some(expires),
        } => {
            client.set_ex(&key, value, expires).await?;
            println!("OK");
        }
        Command::Del { keys } => println!("(integer) {}", client.del(&keys).await?),
        Command::Lpush { key, values } => {
            println!("(integer) {}", client.lpush(&key, &values).await?)
        }
        Command::Rpush { key, values } => {
            println!("(integer) {}", client.rpush(&key, &values).await?)
        }
        Command::Lpop { key } => print_optional(client.lpop(&key).await?),
        Command::Rpop { key } => print_optional(client.rpop(&key).await?),
        Command::Sadd { key, members } => {
            println!("(integer) {}", client.sadd(&key, &members).await?)
        }
        Command::Scard { key } => println!("(integer) {}", client.scard(&key).await?),
        Command::Smembers { key } => print_list(&client.smembers(&key).await?),
        Command::Zadd { key, score, member } => {
            println!("(integer) {}", client.zadd(&key, score, &member).await?)
        }
        Command::Zrange { key, start, stop } => {
            print_list(&client.zrange(&key, start, stop).await?)
        }
        Command::Zpopmax { key } => match client.zpopmax(&key).await? {
            Some(popped) => {
                print!("1) ");
                print_bytes(&popped.member);
                println!("2) \"{}\"", popped.score);
            }
            None => println!("(empty array)"),
        },
        Command::Hset { key, field, value } => {
            println!("(integer) {}", client.hset(&key, &field, &value).await?)
        }
        Command::Hgetall { key } => {
            let hash = client.hgetall(&key).await?;
            if hash.is_empty() {
                println!("(empty hash)");
            }
            for (field, value) in hash {
                print!("{} => ", String::from_utf8_lossy(&field));
                print_bytes(&value);
            }
        }
        Command::Geoadd {
            key,
            longitude,
            latitude,
            name,
        } => {
            let point = GeoPoint::new(longitude, latitude);
            println!("(integer) {}", client.geoadd(&key, &name, point).await?)
        }
        Command::Geodist { key, a, b, unit } => match client.geodist(&key, &a, &b, unit).await? {
            Some(distance) => println!("\"{:.4}\"", distance),
            None => println!("(nil)"),
        },
        Command::Geosearch {
            key,
            longitude,
            latitude,
            radius_km,
        } => {
            let center = GeoPoint::new(longitude, latitude);
            print_list(&client.geosearch(&key, center, radius_km).await?)
        }
        Command::Pfadd { key, elements } => {
            let changed = client.pfadd(&key, &elements).await?;
            println!("(integer) {}", changed as u8)
        }
        Command::Pfcount { key } => println!("(integer) {}", client.pfcount(&key).await?),
        Command::Xadd { key, pairs } => {
            if pairs.len() % 2 != 0 {
                return Err(my_redis_client::Error::InvalidArgument(
                    "字段和值必须成对出现".to_string(),
                ));
            }
            let fields = pairs.chunks(2).map(|pair| (&pair[0], &pair[1]));
            println!("\"{}\"", client.xadd(&key, fields).await?);
        }
        Command::XgroupCreate {
            key,
            group,
            start_id,
        } => {
            client.xgroup_create(&key, &group, &start_id).await?;
            println!("OK");
        }
        Command::Xreadgroup {
            key,
            group,
            consumer,
            count,
            block,
        } => {
            let entries = client
                .xreadgroup(&key, &group, &consumer, count, block)
                .await?;
            if entries.is_empty() {
                println!("(nil)");
            }
            for entry in entries {
                println!("{}", entry.id);
                for (field, value) in entry.fields {
                    print!("    {} => ", String::from_utf8_lossy(&field));
                    print_bytes(&value);
                }
            }
        }
        Command::Xack { key, group, ids } => {
            println!("(integer) {}", client.xack(&key, &group, ids).await?)
        }
        Command::Publish { channel, message } => {
            let receivers = client.publish(&channel, message).await?;
            println!("(integer) {}", receivers);
        }
        Command::Subscribe { channels } => {
            let mut subscriber = client.subscribe(channels).await?;
            // 一旦进入订阅模式，就一直循环等待信息，同时监听 Ctrl-C。
            // 收到关闭信号时先取消所有订阅，再关闭连接。
            loop {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        subscriber.unsubscribe(&[]).await?;
                        subscriber.close().await;
                        return Ok(())
                    }

                    res = subscriber.receive(None) => {
                        match res? {
                            Received::Message(msg) => {
                                println!("从信道“{}”中获取到信息：{:?}", msg.channel, msg.content);
                            },
                            // 服务端关闭了。
                            Received::Closed => {
                                println!("服务器已关闭");
                                return Ok(());
                            },
                            Received::TimedOut => {}
                        }
                    }
                }
            }
        }
    }

    client.close().await;
    Ok(())
}
