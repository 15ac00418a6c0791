//! A single NNTP session over one exclusively-owned transport.
//!
//! [`ProtocolConnection`] implements the command/response exchanges a pooled
//! worker needs: greeting and authentication on connect, group selection,
//! existence checks (`STAT`) and body retrieval (`BODY`).
//!
//! The protocol is strictly request/response: every operation writes one
//! command line and reads its reply before returning. Operations take
//! `&mut self`, so a connection can never have two commands in flight.
//!
//! Operations do not enforce that a group has been selected; callers issue
//! [`switch_group`](ProtocolConnection::switch_group) first and interpret the
//! server's 412 reply otherwise.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::codec::{ResponseReader, StatusLine};
use crate::codes;
use crate::command::Command;
use crate::config::ServerTarget;
use crate::error::{Error, Result};
use crate::transport::{AsyncStream, Connector};

const READ_CHUNK: usize = 4096;

/// Session state of a [`ProtocolConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No live transport
    Disconnected,
    /// Transport open, greeting (and authentication) done, no group selected
    Connected,
    /// A group has been selected
    GroupSelected(String),
}

/// One NNTP connection, owned by exactly one worker.
pub struct ProtocolConnection {
    id: usize,
    target: Arc<ServerTarget>,
    connector: Arc<dyn Connector>,
    stream: Option<Box<dyn AsyncStream>>,
    reader: ResponseReader,
    state: SessionState,
}

impl fmt::Display for ProtocolConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target.host, self.id)
    }
}

impl fmt::Debug for ProtocolConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolConnection")
            .field("id", &self.id)
            .field("target", &self.target.addr())
            .field("state", &self.state)
            .finish()
    }
}

impl ProtocolConnection {
    /// Create a disconnected connection. Nothing is opened until
    /// [`connect`](Self::connect).
    pub fn new(id: usize, target: Arc<ServerTarget>, connector: Arc<dyn Connector>) -> Self {
        Self {
            id,
            target,
            connector,
            stream: None,
            reader: ResponseReader::new(),
            state: SessionState::Disconnected,
        }
    }

    /// Identifier of this connection within its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Current session state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Whether a transport is open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// The currently selected group, if any.
    pub fn current_group(&self) -> Option<&str> {
        match &self.state {
            SessionState::GroupSelected(group) => Some(group),
            _ => None,
        }
    }

    /// Open the transport, read the greeting and authenticate if the target
    /// carries credentials.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if the transport cannot be opened or the
    ///   greeting is not 200/201
    /// - [`Error::Auth`] if the server rejects the credentials
    ///
    /// On failure the transport is closed and the connection stays
    /// [`SessionState::Disconnected`].
    pub async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            self.close().await;
        }

        let stream = self.connector.connect(&self.target).await?;
        self.stream = Some(stream);
        self.reader.clear();

        if let Err(err) = self.handshake().await {
            self.drop_transport().await;
            return Err(err);
        }

        self.state = SessionState::Connected;
        info!(connection = %self, tls = self.target.tls, "connected");
        Ok(())
    }

    async fn handshake(&mut self) -> Result<()> {
        let greeting = self.read_status().await.map_err(|err| match err {
            Error::Io(msg) | Error::Parse(msg) => {
                Error::Connection(format!("Failed to read greeting: {msg}"))
            }
            other => other,
        })?;
        if !codes::is_greeting_ok(greeting.code) {
            return Err(Error::Connection(format!(
                "Unexpected greeting {}: {}",
                greeting.code, greeting.message
            )));
        }

        if let Some(credentials) = self.target.credentials.clone() {
            self.authenticate(&credentials.username, &credentials.password)
                .await?;
        }
        Ok(())
    }

    /// Authenticate with AUTHINFO USER/PASS.
    ///
    /// A 281 reply to the username completes authentication without sending
    /// the password. A 381 reply asks for the password. 481, 482 and 502 fail
    /// immediately.
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<()> {
        let reply = self
            .execute(Command::AuthInfoUser(username.to_string()))
            .await?;
        match reply.code {
            codes::AUTH_ACCEPTED => {
                debug!(connection = %self, "accepted without password");
                return Ok(());
            }
            codes::PASSWORD_REQUIRED => {}
            code if codes::is_auth_failure(code) => {
                return Err(Error::Auth {
                    code,
                    message: reply.message,
                });
            }
            code => {
                return Err(Error::UnexpectedStatus {
                    code,
                    message: reply.message,
                });
            }
        }

        let reply = self
            .execute(Command::AuthInfoPass(password.to_string()))
            .await?;
        match reply.code {
            codes::AUTH_ACCEPTED => Ok(()),
            code if codes::is_auth_failure(code) => Err(Error::Auth {
                code,
                message: reply.message,
            }),
            code => Err(Error::UnexpectedStatus {
                code,
                message: reply.message,
            }),
        }
    }

    /// Select `group`.
    ///
    /// Selecting the group that is already selected succeeds without any
    /// network traffic. On failure the previously selected group is kept.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] without a live transport
    /// - [`Error::NoSuchGroup`] on 411
    /// - [`Error::UnexpectedStatus`] on any other non-211 reply
    pub async fn switch_group(&mut self, group: &str) -> Result<()> {
        if self.current_group() == Some(group) {
            return Ok(());
        }
        self.ensure_connected()?;

        let reply = self.execute(Command::Group(group.to_string())).await?;
        match reply.code {
            codes::GROUP_SELECTED => {
                debug!(connection = %self, group, "group selected");
                self.state = SessionState::GroupSelected(group.to_string());
                Ok(())
            }
            codes::NO_SUCH_GROUP => Err(Error::NoSuchGroup(group.to_string())),
            code => Err(Error::UnexpectedStatus {
                code,
                message: reply.message,
            }),
        }
    }

    /// Check whether the article with message id `id` exists.
    ///
    /// "Not found" (430) is a normal negative answer, returned as `Ok(false)`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] without a live transport
    /// - [`Error::NoGroupSelected`] on 412
    /// - [`Error::InvalidReference`] on 420
    /// - [`Error::UnexpectedStatus`] on anything else
    pub async fn article_exists(&mut self, id: &str) -> Result<bool> {
        self.ensure_connected()?;

        let reply = self.execute(Command::Stat(id.to_string())).await?;
        match reply.code {
            codes::ARTICLE_EXISTS => Ok(true),
            codes::NO_SUCH_ARTICLE_ID => Ok(false),
            codes::NO_GROUP_SELECTED => Err(Error::NoGroupSelected),
            codes::INVALID_ARTICLE_REFERENCE => Err(Error::InvalidReference(id.to_string())),
            code => Err(Error::UnexpectedStatus {
                code,
                message: reply.message,
            }),
        }
    }

    /// Retrieve the body of the article with message id `id`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] without a live transport
    /// - [`Error::NoGroupSelected`] on 412
    /// - [`Error::InvalidReference`] on 420
    /// - [`Error::NoSuchArticle`] on 423 or 430
    /// - [`Error::UnexpectedStatus`] on anything else
    pub async fn fetch_article(&mut self, id: &str) -> Result<Bytes> {
        self.ensure_connected()?;

        let reply = self.execute(Command::Body(id.to_string())).await?;
        match reply.code {
            codes::BODY_FOLLOWS => {
                let body = self.read_body().await?;
                debug!(connection = %self, message_id = id, bytes = body.len(), "body received");
                Ok(body)
            }
            codes::NO_GROUP_SELECTED => Err(Error::NoGroupSelected),
            codes::INVALID_ARTICLE_REFERENCE => Err(Error::InvalidReference(id.to_string())),
            codes::NO_SUCH_ARTICLE_NUMBER | codes::NO_SUCH_ARTICLE_ID => {
                Err(Error::NoSuchArticle(id.to_string()))
            }
            code => Err(Error::UnexpectedStatus {
                code,
                message: reply.message,
            }),
        }
    }

    /// Release the transport. Calling this on a disconnected connection is a
    /// no-op.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.shutdown().await {
                debug!(connection = %self, error = %err, "shutdown failed");
            }
            info!(connection = %self, "closed");
        }
        self.reader.clear();
        self.state = SessionState::Disconnected;
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.stream.is_some() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Send a command and read its status line.
    ///
    /// A transport failure drops the transport; the connection is left
    /// disconnected.
    async fn execute(&mut self, command: Command) -> Result<StatusLine> {
        let request = command.encode()?;
        debug!(connection = %self, command = command.verb(), "sending");

        let result = match self.stream.as_mut() {
            Some(stream) => stream.write_all(&request).await.map_err(Error::from),
            None => Err(Error::NotConnected),
        };
        if let Err(err) = result {
            self.fail_transport(&err).await;
            return Err(err);
        }

        let reply = self.read_status().await?;
        debug!(connection = %self, command = command.verb(), code = reply.code, "reply");
        Ok(reply)
    }

    async fn read_status(&mut self) -> Result<StatusLine> {
        loop {
            if let Some(status) = self.reader.decode_status_line()? {
                return Ok(status);
            }
            self.fill().await?;
        }
    }

    async fn read_body(&mut self) -> Result<Bytes> {
        loop {
            if let Some(body) = self.reader.decode_body()? {
                return Ok(body);
            }
            self.fill().await?;
        }
    }

    /// Read more data from the network into the reader.
    async fn fill(&mut self) -> Result<()> {
        let mut buffer = [0u8; READ_CHUNK];
        let result = match self.stream.as_mut() {
            Some(stream) => match stream.read(&mut buffer).await {
                Ok(0) => Err(Error::Io("Connection closed by server".to_string())),
                Ok(n) => Ok(n),
                Err(err) => Err(Error::from(err)),
            },
            None => Err(Error::NotConnected),
        };

        match result {
            Ok(n) => {
                self.reader.feed_bytes(&buffer[..n]);
                Ok(())
            }
            Err(err) => {
                self.fail_transport(&err).await;
                Err(err)
            }
        }
    }

    async fn fail_transport(&mut self, err: &Error) {
        if err.is_transport() {
            warn!(connection = %self, error = %err, "transport failed, dropping connection");
            self.drop_transport().await;
        }
    }

    async fn drop_transport(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.reader.clear();
        self.state = SessionState::Disconnected;
    }
}
