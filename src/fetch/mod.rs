//! Page-fetch collaborator boundary.
//!
//! The pipeline never talks to the network directly. Each worker owns exactly
//! one [`FetchSession`] for its lifetime, opened through a shared
//! [`SessionFactory`] when the worker starts and closed when it exits. Sessions
//! are never shared between workers.
//!
//! - [`FetchSession`] - fetches rendered item pages and listing pages
//! - [`SessionFactory`] - opens fresh sessions (credentials, cookie jar)
//! - [`FetchError`] - transport, status and session failures, classified for retry
//! - [`HttpSessionFactory`] - default `reqwest` implementation with optional form login

mod error;
mod http;

pub use error::FetchError;
pub use http::{HttpSession, HttpSessionConfig, HttpSessionFactory, LoginConfig};

use async_trait::async_trait;

use crate::retry::Recover;

/// Raw page content as returned by the fetch layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    /// Final URL after redirects; relative links resolve against it.
    pub url: String,
    /// Page body (rendered HTML or API payload).
    pub body: String,
}

impl RawDocument {
    /// Creates a document from a URL and body.
    #[must_use]
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
        }
    }
}

/// A stateful fetch session (cookies, authentication, browser context).
#[async_trait]
pub trait FetchSession: Send {
    /// Fetches a fully rendered item or link page.
    async fn fetch_rendered_page(&mut self, url: &str) -> Result<RawDocument, FetchError>;

    /// Fetches one page of a listing.
    async fn fetch_listing_page(&mut self, url: &str) -> Result<RawDocument, FetchError>;

    /// Discards session state and re-authenticates.
    async fn restart(&mut self) -> Result<(), FetchError>;

    /// Releases the session. Called once when the owning worker exits.
    async fn close(&mut self) {}
}

#[async_trait]
impl<'s> Recover for dyn FetchSession + 's {
    async fn recover(&mut self) -> Result<(), String> {
        self.restart().await.map_err(|error| error.to_string())
    }
}

/// Opens new fetch sessions; shared by all workers.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Opens a session ready for fetching.
    async fn open(&self) -> Result<Box<dyn FetchSession>, FetchError>;
}
