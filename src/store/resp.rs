//! RESP Store Client
//!
//! [`RespStore`] talks to a Redis-compatible server over one TCP connection.
//!
//! ## Request Lifecycle
//!
//! ```text
//!   call()
//!     │  lock connection slot
//!     ▼
//!   (re)connect if the slot is empty or a request was abandoned mid-flight
//!     │
//!     ▼
//!   write frame ──> read until a full reply frame is buffered
//!     │
//!     ▼
//!   error reply?  ──> StoreError::Server (connection stays usable)
//!   I/O / protocol failure ──> drop the connection, surface the error
//! ```
//!
//! If a caller drops the future between writing a request and reading its
//! reply, the connection is left with an unread reply. It is marked as
//! in-flight and replaced on the next call; the abandoned command is not
//! sent again.

use super::{EngineVersion, NodeInfo, Store, StoreError, StoreResult};
use crate::protocol::{RespParser, RespValue};
use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Maximum size for the reply buffer (64 MB)
const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Keys requested per SCAN round trip
const SCAN_BATCH: &str = "1000";

/// One open connection to the server.
struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
    parser: RespParser,
    /// Set while a request is waiting for its reply
    in_flight: bool,
}

impl Connection {
    async fn open(address: &str, password: Option<&str>, database: i64) -> StoreResult<Self> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;

        let mut conn = Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
            in_flight: false,
        };

        if let Some(password) = password {
            conn.request(RespValue::command(["AUTH", password])).await?;
        }
        if database != 0 {
            conn.select(database).await?;
        }

        debug!(address = %address, database = database, "Connected to store");
        Ok(conn)
    }

    async fn request(&mut self, frame: RespValue) -> StoreResult<RespValue> {
        self.in_flight = true;
        let bytes = frame.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        trace!(bytes = bytes.len(), "Sent request");

        let reply = self.read_reply().await?;
        self.in_flight = false;

        match reply {
            RespValue::Error(message) => Err(StoreError::Server(message)),
            reply => Ok(reply),
        }
    }

    async fn read_reply(&mut self) -> StoreResult<RespValue> {
        loop {
            if let Some((value, consumed)) = self.parser.parse(&self.buffer)? {
                let _ = self.buffer.split_to(consumed);
                trace!(consumed = consumed, remaining = self.buffer.len(), "Parsed reply");
                return Ok(value);
            }

            if self.buffer.len() >= MAX_BUFFER_SIZE {
                return Err(StoreError::Server(format!(
                    "reply exceeds {} bytes",
                    MAX_BUFFER_SIZE
                )));
            }
            if self.buffer.capacity() - self.buffer.len() < 1024 {
                self.buffer.reserve(INITIAL_BUFFER_SIZE);
            }

            let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(StoreError::ConnectionClosed);
            }
        }
    }

    async fn select(&mut self, database: i64) -> StoreResult<()> {
        let db = database.to_string();
        self.request(RespValue::command(["SELECT", db.as_str()]))
            .await
            .map(|_| ())
    }

    async fn scan(&mut self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor = "0".to_string();

        loop {
            let frame = RespValue::command([
                "SCAN",
                cursor.as_str(),
                "MATCH",
                pattern,
                "COUNT",
                SCAN_BATCH,
            ]);
            let reply = self.request(frame).await?;
            let mut parts = expect_array("SCAN", reply)?.into_iter();

            let (Some(next), Some(batch)) = (parts.next(), parts.next()) else {
                return Err(unexpected("SCAN", "reply with fewer than two elements"));
            };
            cursor = next
                .into_string()
                .ok_or_else(|| unexpected("SCAN", "non-string cursor"))?;
            keys.extend(strings("SCAN", batch)?);

            if cursor == "0" {
                return Ok(keys);
            }
        }
    }
}

/// A [`Store`] backed by a Redis-compatible server.
pub struct RespStore {
    address: String,
    password: Option<String>,
    database: i64,
    slot: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for RespStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RespStore")
            .field("address", &self.address)
            .field("database", &self.database)
            .field("authenticated", &self.password.is_some())
            .finish()
    }
}

impl RespStore {
    /// Connects to `address` (`host:port`), authenticating and selecting
    /// `database` up front so configuration mistakes surface immediately.
    pub async fn connect(
        address: impl Into<String>,
        password: Option<String>,
        database: i64,
    ) -> StoreResult<Self> {
        let address = address.into();
        let conn = Connection::open(&address, password.as_deref(), database).await?;
        Ok(Self {
            address,
            password,
            database,
            slot: Mutex::new(Some(conn)),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns a usable connection from `slot`, opening a new one if needed.
    async fn connection<'a>(&self, slot: &'a mut Option<Connection>) -> StoreResult<&'a mut Connection> {
        let reusable = matches!(slot.as_ref(), Some(conn) if !conn.in_flight);
        if !reusable {
            if slot.is_some() {
                debug!(address = %self.address, "Replacing connection with an abandoned request");
            }
            *slot = None;
            let conn = Connection::open(&self.address, self.password.as_deref(), self.database).await?;
            return Ok(slot.insert(conn));
        }
        match slot {
            Some(conn) => Ok(conn),
            None => Err(StoreError::ConnectionClosed),
        }
    }

    /// Sends one command and waits for its reply.
    async fn call(&self, command: &'static str, args: &[&str]) -> StoreResult<RespValue> {
        let frame = RespValue::command(std::iter::once(command).chain(args.iter().copied()));

        let mut slot = self.slot.lock().await;
        let conn = self.connection(&mut slot).await?;
        let result = conn.request(frame).await;

        if let Err(e) = &result {
            if !matches!(e, StoreError::Server(_)) {
                warn!(address = %self.address, command = command, error = %e, "Store connection failed");
                *slot = None;
            }
        }
        result
    }

    async fn scan_database(&self, database: i64, pattern: &str) -> StoreResult<Vec<String>> {
        let mut slot = self.slot.lock().await;
        let conn = self.connection(&mut slot).await?;

        let mut left_elsewhere = false;
        let result = if database == self.database {
            conn.scan(pattern).await
        } else {
            // Switch, scan, and switch back while holding the connection
            match conn.select(database).await {
                Ok(()) => {
                    let scanned = conn.scan(pattern).await;
                    let restored = conn.select(self.database).await;
                    left_elsewhere = restored.is_err();
                    restored.and(scanned)
                }
                Err(e) => Err(e),
            }
        };

        // A connection still pointing at `database` must not serve queue commands
        if let Err(e) = &result {
            if left_elsewhere || !matches!(e, StoreError::Server(_)) {
                warn!(address = %self.address, command = "SCAN", error = %e, "Store connection failed");
                *slot = None;
            }
        }
        result
    }
}

fn unexpected(command: &'static str, reply: impl Into<String>) -> StoreError {
    StoreError::UnexpectedReply {
        command,
        reply: reply.into(),
    }
}

fn expect_integer(command: &'static str, reply: RespValue) -> StoreResult<i64> {
    reply
        .as_integer()
        .ok_or_else(|| unexpected(command, reply.describe()))
}

fn expect_array(command: &'static str, reply: RespValue) -> StoreResult<Vec<RespValue>> {
    match reply {
        RespValue::Array(values) => Ok(values),
        RespValue::Null => Ok(Vec::new()),
        other => Err(unexpected(command, other.describe())),
    }
}

fn strings(command: &'static str, reply: RespValue) -> StoreResult<Vec<String>> {
    expect_array(command, reply)?
        .into_iter()
        .map(|v| v.into_string().ok_or_else(|| unexpected(command, "non-string element")))
        .collect()
}

fn score(command: &'static str, value: RespValue) -> StoreResult<f64> {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| unexpected(command, "non-numeric score"))
}

/// Accepts both the flat RESP2 `[m1, s1, m2, s2]` and the nested RESP3
/// `[[m1, s1], [m2, s2]]` shapes.
fn member_score_pairs(command: &'static str, reply: RespValue) -> StoreResult<Vec<(String, f64)>> {
    let values = expect_array(command, reply)?;
    if values.iter().all(|v| matches!(v, RespValue::Array(_))) {
        return values
            .into_iter()
            .map(|pair| member_score_pairs(command, pair)?.pop().ok_or_else(|| unexpected(command, "empty pair")))
            .collect();
    }
    if values.len() % 2 != 0 {
        return Err(unexpected(command, "odd number of elements"));
    }

    let mut pairs = Vec::with_capacity(values.len() / 2);
    let mut iter = values.into_iter();
    while let (Some(member), Some(value)) = (iter.next(), iter.next()) {
        let member = member
            .into_string()
            .ok_or_else(|| unexpected(command, "non-string member"))?;
        pairs.push((member, score(command, value)?));
    }
    Ok(pairs)
}

#[async_trait]
impl Store for RespStore {
    async fn nodes(&self) -> StoreResult<Vec<NodeInfo>> {
        let reply = self.call("INFO", &["server"]).await?;
        let info = reply
            .as_str()
            .ok_or_else(|| unexpected("INFO", reply.describe()))?;
        let version = EngineVersion::from_info(info)
            .ok_or_else(|| unexpected("INFO", "no redis_version field"))?;

        Ok(vec![NodeInfo {
            address: self.address.clone(),
            version,
        }])
    }

    async fn keys(&self, node: &NodeInfo, database: i64, pattern: &str) -> StoreResult<Vec<String>> {
        if node.address != self.address {
            return Err(StoreError::Server(format!(
                "node {} is not served by this connection",
                node.address
            )));
        }
        self.scan_database(database, pattern).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let reply = self.call("EXISTS", &[key]).await?;
        Ok(expect_integer("EXISTS", reply)? > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let millis = ttl.as_millis().to_string();
        let reply = self.call("PEXPIRE", &[key, millis.as_str()]).await?;
        Ok(expect_integer("PEXPIRE", reply)? == 1)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let reply = self.call("PTTL", &[key]).await?;
        let millis = expect_integer("PTTL", reply)?;
        // -2: no such key, -1: no expiry
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn lpush(&self, key: &str, value: &str) -> StoreResult<usize> {
        let reply = self.call("LPUSH", &[key, value]).await?;
        Ok(expect_integer("LPUSH", reply)?.max(0) as usize)
    }

    async fn rpop(&self, key: &str) -> StoreResult<Option<String>> {
        let reply = self.call("RPOP", &[key]).await?;
        match reply {
            RespValue::Null => Ok(None),
            other => other
                .into_string()
                .map(Some)
                .ok_or_else(|| unexpected("RPOP", "non-string element")),
        }
    }

    async fn llen(&self, key: &str) -> StoreResult<usize> {
        let reply = self.call("LLEN", &[key]).await?;
        Ok(expect_integer("LLEN", reply)?.max(0) as usize)
    }

    async fn zadd_nx(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        let score = score.to_string();
        let reply = self.call("ZADD", &[key, "NX", score.as_str(), member]).await?;
        Ok(expect_integer("ZADD", reply)? == 1)
    }

    async fn zcard(&self, key: &str) -> StoreResult<usize> {
        let reply = self.call("ZCARD", &[key]).await?;
        Ok(expect_integer("ZCARD", reply)?.max(0) as usize)
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let (start, stop) = (start.to_string(), stop.to_string());
        let reply = self.call("ZRANGE", &[key, start.as_str(), stop.as_str()]).await?;
        strings("ZRANGE", reply)
    }

    async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut args = Vec::with_capacity(members.len() + 1);
        args.push(key);
        args.extend(members.iter().map(String::as_str));

        let reply = self.call("ZREM", &args).await?;
        Ok(expect_integer("ZREM", reply)?.max(0) as usize)
    }

    async fn zpopmin(&self, key: &str, count: usize) -> StoreResult<Vec<(String, f64)>> {
        let count = count.to_string();
        let reply = self.call("ZPOPMIN", &[key, count.as_str()]).await?;
        member_score_pairs("ZPOPMIN", reply)
    }
}
