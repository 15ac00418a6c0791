//! In-memory NNTP server for testing purposes.
//!
//! [`MockServer`] implements [`Connector`]: every `connect` call hands out a
//! fresh [`AsyncStream`] backed by a small model of a news server (groups,
//! articles, optional credentials). Replies can be overridden per command
//! line, and the server records every command it receives so tests can assert
//! on protocol traffic.
//!
//! Reading from a mock stream with no reply pending returns EOF instead of
//! blocking, so a client waiting for data the server will never send fails
//! fast.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};

use crate::config::ServerTarget;
use crate::error::{Error, Result};
use crate::transport::{AsyncStream, Connector};

/// A scripted, in-memory NNTP server.
///
/// Cloning yields another handle to the same server.
///
/// # Example
///
/// ```
/// use nntp_pool::mock::MockServer;
///
/// let server = MockServer::new()
///     .with_article("alt.test", "a@example.com", "hello\r\n")
///     .with_reply("STAT <broken@example.com>", "420 invalid");
/// assert_eq!(server.connections(), 0);
/// ```
#[derive(Clone, Default)]
pub struct MockServer {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    config: Mutex<Config>,
    log: Mutex<Vec<String>>,
    connections: AtomicUsize,
    overlaps: AtomicUsize,
}

struct Config {
    greeting: String,
    refuse: bool,
    credentials: Option<(String, String)>,
    groups: HashMap<String, HashMap<String, String>>,
    replies: HashMap<String, String>,
    hang_up: HashSet<String>,
    latency: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            greeting: "200 mock server ready".to_string(),
            refuse: false,
            credentials: None,
            groups: HashMap::new(),
            replies: HashMap::new(),
            hang_up: HashSet::new(),
            latency: None,
        }
    }
}

impl MockServer {
    /// Create a server with no groups that greets with 200.
    pub fn new() -> Self {
        Self::default()
    }

    fn config(&self) -> MutexGuard<'_, Config> {
        self.inner.config.lock().expect("mock config lock")
    }

    /// Replace the greeting line (without CRLF).
    pub fn with_greeting(self, greeting: impl Into<String>) -> Self {
        self.config().greeting = greeting.into();
        self
    }

    /// Fail every connection attempt.
    pub fn refuse_connections(self) -> Self {
        self.config().refuse = true;
        self
    }

    /// Require AUTHINFO USER/PASS with these credentials.
    ///
    /// Without credentials configured, AUTHINFO USER is accepted with 281.
    pub fn with_credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config().credentials = Some((username.into(), password.into()));
        self
    }

    /// Add an empty group.
    pub fn with_group(self, group: impl Into<String>) -> Self {
        self.config().groups.entry(group.into()).or_default();
        self
    }

    /// Add an article to `group`. `id` is given without angle brackets and
    /// `body` in wire form with CRLF line endings, before dot-stuffing.
    pub fn with_article(
        self,
        group: impl Into<String>,
        id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        self.config()
            .groups
            .entry(group.into())
            .or_default()
            .insert(id.into(), body.into());
        self
    }

    /// Answer the exact command line `command` with `reply` (without the
    /// final CRLF). Overrides take precedence over the server model.
    pub fn with_reply(self, command: impl Into<String>, reply: impl Into<String>) -> Self {
        self.config().replies.insert(command.into(), reply.into());
        self
    }

    /// Close the stream instead of answering `command`.
    pub fn hang_up_on(self, command: impl Into<String>) -> Self {
        self.config().hang_up.insert(command.into());
        self
    }

    /// Delay every read that returns data.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.config().latency = Some(latency);
        self
    }

    /// Every command line received so far, across all connections.
    pub fn commands(&self) -> Vec<String> {
        self.inner.log.lock().expect("mock log lock").clone()
    }

    /// Number of commands received that start with `prefix`.
    pub fn count_commands(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Number of connection attempts, refused ones included.
    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::SeqCst)
    }

    /// Number of commands that arrived while the previous reply on the same
    /// stream had not been fully read.
    pub fn overlaps(&self) -> usize {
        self.inner.overlaps.load(Ordering::SeqCst)
    }

    fn record(&self, line: &str) {
        self.inner
            .log
            .lock()
            .expect("mock log lock")
            .push(line.to_string());
    }

    fn respond(&self, session: &mut Session, line: &str) -> String {
        let config = self.config();

        if let Some(reply) = config.replies.get(line) {
            if let Some(group) = line.strip_prefix("GROUP ") {
                if reply.starts_with("211") {
                    session.group = Some(group.to_string());
                }
            }
            return format!("{reply}\r\n");
        }

        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.trim()),
            None => (line.to_ascii_uppercase(), ""),
        };

        match verb.as_str() {
            "AUTHINFO" => respond_auth(&config, session, arg),
            "GROUP" => match config.groups.get(arg) {
                Some(articles) => {
                    session.group = Some(arg.to_string());
                    let n = articles.len();
                    format!("211 {n} 1 {n} {arg}\r\n")
                }
                None => "411 No such newsgroup\r\n".to_string(),
            },
            "STAT" | "BODY" => {
                let Some(group) = session.group.as_ref() else {
                    return "412 No newsgroup selected\r\n".to_string();
                };
                let id = arg.trim_start_matches('<').trim_end_matches('>');
                match config.groups.get(group).and_then(|g| g.get(id)) {
                    Some(_) if verb == "STAT" => format!("223 0 <{id}>\r\n"),
                    Some(body) => format!("222 0 <{id}>\r\n{}.\r\n", dot_stuff(body)),
                    None => "430 No article with that message-id\r\n".to_string(),
                }
            }
            _ => "500 Unknown command\r\n".to_string(),
        }
    }
}

fn respond_auth(config: &Config, session: &mut Session, arg: &str) -> String {
    let (kind, value) = arg.split_once(' ').unwrap_or((arg, ""));
    match (kind.to_ascii_uppercase().as_str(), &config.credentials) {
        ("USER", None) => "281 Authentication accepted\r\n".to_string(),
        ("USER", Some((user, _))) if user == value => {
            session.user_accepted = true;
            "381 Password required\r\n".to_string()
        }
        ("USER", Some(_)) => "481 Authentication failed\r\n".to_string(),
        ("PASS", _) if !session.user_accepted => {
            "482 Authentication commands issued out of sequence\r\n".to_string()
        }
        ("PASS", Some((_, pass))) if pass == value => "281 Authentication accepted\r\n".to_string(),
        ("PASS", _) => "481 Authentication failed\r\n".to_string(),
        _ => "501 Syntax error\r\n".to_string(),
    }
}

fn dot_stuff(body: &str) -> String {
    let mut out = String::with_capacity(body.len() + 8);
    for line in body.split_inclusive('\n') {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
    }
    if !out.is_empty() && !out.ends_with("\r\n") {
        out.push_str("\r\n");
    }
    out
}

#[async_trait]
impl Connector for MockServer {
    async fn connect(&self, _target: &ServerTarget) -> Result<Box<dyn AsyncStream>> {
        self.inner.connections.fetch_add(1, Ordering::SeqCst);
        let (refuse, greeting, latency) = {
            let config = self.config();
            (config.refuse, config.greeting.clone(), config.latency)
        };
        if refuse {
            return Err(Error::Connection("Connection refused".to_string()));
        }
        Ok(Box::new(MockStream::new(self.clone(), &greeting, latency)))
    }
}

#[derive(Default)]
struct Session {
    group: Option<String>,
    user_accepted: bool,
}

/// Server side of one mock connection.
struct MockStream {
    server: MockServer,
    session: Session,
    inbound: BytesMut,
    outbound: BytesMut,
    closed: bool,
    latency: Option<Duration>,
}

impl MockStream {
    fn new(server: MockServer, greeting: &str, latency: Option<Duration>) -> Self {
        let mut outbound = BytesMut::new();
        outbound.put_slice(greeting.as_bytes());
        outbound.put_slice(b"\r\n");
        Self {
            server,
            session: Session::default(),
            inbound: BytesMut::new(),
            outbound,
            closed: false,
            latency,
        }
    }

    fn handle_line(&mut self, line: &str) {
        if !self.outbound.is_empty() {
            self.server.inner.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.server.record(line);

        if self.server.config().hang_up.contains(line) {
            self.closed = true;
            self.outbound.clear();
            return;
        }

        let reply = self.server.respond(&mut self.session, line);
        self.outbound.put_slice(reply.as_bytes());
    }
}

#[async_trait]
impl AsyncStream for MockStream {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.closed || self.outbound.is_empty() {
            return Ok(0);
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let n = buf.len().min(self.outbound.len());
        buf[..n].copy_from_slice(&self.outbound[..n]);
        self.outbound.advance(n);
        Ok(n)
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        if self.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock stream closed",
            ));
        }
        self.inbound.put_slice(buf);
        while let Some(pos) = self.inbound.windows(2).position(|w| w == b"\r\n") {
            let raw = self.inbound.split_to(pos + 2);
            let line = String::from_utf8_lossy(&raw[..pos]).into_owned();
            self.handle_line(&line);
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip(stream: &mut Box<dyn AsyncStream>, line: &str) -> String {
        stream.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn serves_greeting_and_groups() {
        let server = MockServer::new().with_article("alt.test", "a@b", ".hidden\r\n");
        let target = ServerTarget::new("mock", 119);
        let mut stream = server.connect(&target).await.unwrap();

        let mut buf = [0u8; 128];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"200 mock server ready\r\n");

        assert_eq!(roundtrip(&mut stream, "STAT <a@b>").await, "412 No newsgroup selected\r\n");
        assert_eq!(roundtrip(&mut stream, "GROUP alt.test").await, "211 1 1 1 alt.test\r\n");
        assert_eq!(roundtrip(&mut stream, "STAT <a@b>").await, "223 0 <a@b>\r\n");
        assert_eq!(
            roundtrip(&mut stream, "BODY <a@b>").await,
            "222 0 <a@b>\r\n..hidden\r\n.\r\n"
        );
        assert_eq!(server.connections(), 1);
        assert_eq!(server.overlaps(), 0);
    }

    #[tokio::test]
    async fn counts_overlapping_commands() {
        let server = MockServer::new();
        let mut stream = server.connect(&ServerTarget::new("mock", 119)).await.unwrap();

        // Greeting still unread.
        stream.write_all(b"GROUP alt.test\r\n").await.unwrap();
        assert_eq!(server.overlaps(), 1);
    }

    #[tokio::test]
    async fn refused_connections_are_counted() {
        let server = MockServer::new().refuse_connections();
        assert!(server.connect(&ServerTarget::new("mock", 119)).await.is_err());
        assert_eq!(server.connections(), 1);
    }
}
