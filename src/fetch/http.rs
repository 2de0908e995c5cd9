//! `reqwest`-backed fetch sessions.
//!
//! Each [`HttpSession`] owns its own client and cookie jar so authentication
//! state never leaks across workers. A restart throws both away, builds a
//! fresh client and logs in again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::cookie::Jar;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, instrument};

use super::{FetchError, FetchSession, RawDocument, SessionFactory};

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/catalog-ingest";

/// Default User-Agent for page requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("catalog-ingest/{version} (+{PROJECT_UA_URL})")
}

/// Form login performed when a session opens or restarts.
#[derive(Debug, Clone)]
pub struct LoginConfig {
    /// URL the login form posts to.
    pub url: String,
    /// Form field carrying the username.
    pub username_field: String,
    /// Form field carrying the password.
    pub password_field: String,
    /// Account username.
    pub username: String,
    /// Account password.
    pub password: String,
}

/// Client settings shared by every session the factory opens.
#[derive(Debug, Clone)]
pub struct HttpSessionConfig {
    /// User-Agent header; defaults to the crate identifier.
    pub user_agent: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub read_timeout: Duration,
    /// Optional login performed on open and restart.
    pub login: Option<LoginConfig>,
}

impl Default for HttpSessionConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            login: None,
        }
    }
}

/// Opens [`HttpSession`]s.
#[derive(Debug, Clone, Default)]
pub struct HttpSessionFactory {
    config: Arc<HttpSessionConfig>,
}

impl HttpSessionFactory {
    /// Creates a factory for the given client settings.
    #[must_use]
    pub fn new(config: HttpSessionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn open(&self) -> Result<Box<dyn FetchSession>, FetchError> {
        let session = HttpSession::open(Arc::clone(&self.config)).await?;
        Ok(Box::new(session))
    }
}

/// One authenticated HTTP session.
#[derive(Debug)]
pub struct HttpSession {
    config: Arc<HttpSessionConfig>,
    client: Client,
}

impl HttpSession {
    /// Builds a client with a fresh cookie jar and logs in when configured.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::SessionSetup`] if the client cannot be built or
    /// the login request fails.
    #[instrument(skip(config), fields(login = config.login.is_some()))]
    pub async fn open(config: Arc<HttpSessionConfig>) -> Result<Self, FetchError> {
        let client = build_client(&config)?;
        let session = Self { config, client };
        session.login().await?;
        Ok(session)
    }

    async fn login(&self) -> Result<(), FetchError> {
        let Some(login) = &self.config.login else {
            return Ok(());
        };

        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(&login.username_field, &login.username)
            .append_pair(&login.password_field, &login.password)
            .finish();

        let response = self
            .client
            .post(&login.url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| FetchError::session_setup(format!("login request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() && !status.is_redirection() {
            return Err(FetchError::session_setup(format!(
                "login rejected with HTTP {}",
                status.as_u16()
            )));
        }

        info!("session logged in");
        Ok(())
    }

    async fn get(&self, url: &str) -> Result<RawDocument, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(url)
            } else {
                FetchError::transport(url, e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(url, status.as_u16()));
        }

        let final_url = response.url().to_string();
        if self.is_login_redirect(&final_url) {
            return Err(FetchError::session_invalid(url, "redirected to login page"));
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(url)
            } else {
                FetchError::transport(url, e.to_string())
            }
        })?;

        debug!(url, bytes = body.len(), "page fetched");
        Ok(RawDocument::new(final_url, body))
    }

    fn is_login_redirect(&self, final_url: &str) -> bool {
        let Some(login) = &self.config.login else {
            return false;
        };
        match (url::Url::parse(final_url), url::Url::parse(&login.url)) {
            (Ok(fetched), Ok(login_url)) => {
                fetched.host_str() == login_url.host_str() && fetched.path() == login_url.path()
            }
            _ => false,
        }
    }
}

#[async_trait]
impl FetchSession for HttpSession {
    async fn fetch_rendered_page(&mut self, url: &str) -> Result<RawDocument, FetchError> {
        self.get(url).await
    }

    async fn fetch_listing_page(&mut self, url: &str) -> Result<RawDocument, FetchError> {
        self.get(url).await
    }

    #[instrument(skip(self))]
    async fn restart(&mut self) -> Result<(), FetchError> {
        self.client = build_client(&self.config)?;
        self.login().await
    }
}

fn build_client(config: &HttpSessionConfig) -> Result<Client, FetchError> {
    let jar = Arc::new(Jar::default());
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.read_timeout)
        .user_agent(config.user_agent.clone())
        .gzip(true)
        .cookie_provider(jar)
        .build()
        .map_err(|e| FetchError::session_setup(format!("HTTP client construction failed: {e}")))
}
