//! Requests submitted to a pool and the responses it produces.

use crate::error::Error;
use bytes::Bytes;
use std::fmt;

/// What to do with an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Check whether the article exists (STAT)
    CheckExistence,
    /// Retrieve the article body (BODY)
    FetchContent,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CheckExistence => f.write_str("check"),
            Operation::FetchContent => f.write_str("fetch"),
        }
    }
}

/// An article to look up, plus the result fields filled in by a worker.
///
/// The result fields are written once, by the worker that processes the
/// request carrying this article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    /// Message id, with or without angle brackets
    pub id: String,
    /// Groups to try, in order
    pub groups: Vec<String>,
    /// Whether the article was found on the server
    pub exists: bool,
    /// Body of the article, filled by [`Operation::FetchContent`]
    pub content: Option<Bytes>,
}

impl Article {
    /// Create an article with empty result fields.
    pub fn new(id: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            id: id.into(),
            groups,
            exists: false,
            content: None,
        }
    }
}

impl fmt::Display for Article {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id.starts_with('<') {
            f.write_str(&self.id)
        } else {
            write!(f, "<{}>", self.id)
        }
    }
}

/// A unit of work for the pool. Consumed by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The article to look up
    pub article: Article,
    /// What to do with it
    pub operation: Operation,
}

impl Request {
    /// Build a request for `id`, trying `groups` in order.
    ///
    /// # Example
    ///
    /// ```
    /// use nntp_pool::{Operation, Request};
    ///
    /// let request = Request::new("part1@example.com", ["alt.binaries.test"], Operation::FetchContent);
    /// assert_eq!(request.article.groups, vec!["alt.binaries.test".to_string()]);
    /// ```
    pub fn new<I, S>(id: impl Into<String>, groups: I, operation: Operation) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            article: Article::new(id, groups.into_iter().map(Into::into).collect()),
            operation,
        }
    }

    /// Shorthand for a [`Operation::CheckExistence`] request.
    pub fn check<I, S>(id: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(id, groups, Operation::CheckExistence)
    }

    /// Shorthand for a [`Operation::FetchContent`] request.
    pub fn fetch<I, S>(id: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(id, groups, Operation::FetchContent)
    }

    /// Turn the request into its response, handing over the article.
    pub(crate) fn into_response(self, source: impl Into<String>) -> Response {
        Response {
            article: self.article,
            operation: self.operation,
            error: None,
            source: source.into(),
        }
    }
}

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The request's article, with its result fields filled in
    pub article: Article,
    /// The operation that was executed
    pub operation: Operation,
    /// Error observed, if the request could not be answered
    pub error: Option<Error>,
    /// Connection that produced the response, as `host:worker`
    pub source: String,
}

impl Response {
    /// Whether the request was answered without error.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
