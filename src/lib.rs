//! # nntp-pool
//!
//! A pooled NNTP (Network News Transfer Protocol) client for checking and
//! fetching articles by message id.
//!
//! A [`ConnectionPool`] keeps a fixed number of persistent connections to one
//! server. Callers push [`Request`]s onto a shared queue; each request names an
//! article and the groups it may be found in, and asks either whether the
//! article exists (`STAT`) or for its body (`BODY`). Idle workers pick requests
//! up, try the candidate groups in order, and publish a [`Response`] on a
//! merged stream.
//!
//! ## Design
//!
//! - **One command in flight per connection**: every connection is owned by a
//!   single worker task, and NNTP is strictly request/response.
//! - **Bounded concurrency**: at most `size` requests are processed at once;
//!   further requests wait on the queue.
//! - **No ordering**: requests submitted close together may complete in any
//!   order. Match responses to requests by article id.
//! - **Best-effort stop**: [`ConnectionPool::stop`] returns immediately and
//!   does not drain the queue.
//!
//! ## Example
//!
//! ```rust,no_run
//! use nntp_pool::{ConnectionPool, Request, ServerTarget};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let target = ServerTarget::new("news.example.com", 563)
//!     .with_tls(true)
//!     .with_credentials("reader", "secret");
//!
//! let (requests, inbound) = flume::unbounded();
//! let mut pool = ConnectionPool::new(target, inbound, 8);
//! pool.start();
//! let mut responses = pool.collect();
//!
//! for part in ["part1@example.com", "part2@example.com"] {
//!     requests.send(Request::fetch(part, ["alt.binaries.test"])).unwrap();
//! }
//!
//! for _ in 0..2 {
//!     let Some(response) = responses.recv().await else { break };
//!     match response.error {
//!         None => println!("{}: {} bytes", response.article, response.article.content.as_ref().map_or(0, |c| c.len())),
//!         Some(err) => println!("{}: {err}", response.article),
//!     }
//! }
//!
//! pool.stop();
//! # }
//! ```
//!
//! ## Testing
//!
//! The [`mock`] module provides an in-memory server that plugs into
//! [`ConnectionPool::with_connector`].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod codec;
pub mod codes;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod model;
pub mod pool;
pub mod transport;
mod worker;

// Mock server for testing
pub mod mock;

pub use config::{Credentials, ServerTarget, DEFAULT_PORT, DEFAULT_TLS_PORT};
pub use connection::{ProtocolConnection, SessionState};
pub use error::{Error, Result};
pub use model::{Article, Operation, Request, Response};
pub use pool::{ConnectionPool, PoolStats};
pub use transport::{AsyncStream, Connector, TcpConnector, TokioStream};
pub use worker::process;

#[cfg(feature = "tls")]
#[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
pub use transport::TlsStream;
