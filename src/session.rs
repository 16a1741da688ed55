use std::sync::Arc;

use log::debug;
use once_cell::sync::Lazy;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONNECTION,
    CONTENT_TYPE, ORIGIN, PRAGMA, REFERER, USER_AGENT,
};
use reqwest::Client;
use url::Url;

use crate::proxy::{ProxyDescriptor, ProxyError};

/// Header the platform reads the account's identity token from.
pub const IDENTITY_HEADER: &str = "init-data";

static BASE_HEADERS: Lazy<HeaderMap> = Lazy::new(|| {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(HeaderName::from_static("sec-fetch-dest"), HeaderValue::from_static("empty"));
    headers.insert(HeaderName::from_static("sec-fetch-mode"), HeaderValue::from_static("cors"));
    headers.insert(HeaderName::from_static("sec-fetch-site"), HeaderValue::from_static("same-origin"));
    headers
});

/// One automated identity, as handed over by the input loader for a single pass.
#[derive(Debug, Clone)]
pub struct Account {
    pub token: String,
    pub display_name: String,
    /// Raw proxy line; parsed when the context is built so a bad line fails this account only.
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug)]
pub enum ContextError {
    Proxy(ProxyError),
    InvalidHeader { header: &'static str, source: InvalidHeaderValue },
    ClientBuild(reqwest::Error),
}

impl std::fmt::Display for ContextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextError::Proxy(e) => write!(f, "Proxy error: {}", e),
            ContextError::InvalidHeader { header, source } => {
                write!(f, "Value for header '{}' is not valid: {}", header, source)
            }
            ContextError::ClientBuild(e) => write!(f, "Failed to build HTTP client: {}", e),
        }
    }
}

impl std::error::Error for ContextError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ContextError::Proxy(e) => Some(e),
            ContextError::InvalidHeader { source, .. } => Some(source),
            ContextError::ClientBuild(e) => Some(e),
        }
    }
}

impl From<ProxyError> for ContextError {
    fn from(err: ProxyError) -> Self {
        ContextError::Proxy(err)
    }
}

/// Everything needed to talk to the platform as one account. Built once per pipeline run
/// and shared by every request of that run.
#[derive(Debug, Clone)]
pub struct NetworkContext {
    client: Client,
    base_url: Url,
    account: String,
    route: ProxyDescriptor,
}

impl NetworkContext {
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Display name used to prefix every log line of this account.
    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn route(&self) -> &ProxyDescriptor {
        &self.route
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path)
    }
}

/// Produces [`NetworkContext`]s bound to a single platform origin.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    base_url: Url,
    referer: Url,
}

impl ContextBuilder {
    pub fn new(base_url: Url, referer_path: &str) -> Result<Self, url::ParseError> {
        let referer = base_url.join(referer_path)?;
        Ok(Self { base_url, referer })
    }

    pub fn build(&self, account: &Account) -> Result<NetworkContext, ContextError> {
        let route = match account.proxy.as_deref() {
            Some(raw) => ProxyDescriptor::parse(raw)?,
            None => ProxyDescriptor::DirectConnection,
        };

        let mut headers = BASE_HEADERS.clone();
        headers.insert(
            HeaderName::from_static(IDENTITY_HEADER),
            header_value(IDENTITY_HEADER, &account.token)?,
        );
        let origin = self.base_url.origin().unicode_serialization();
        headers.insert(ORIGIN, header_value("origin", &origin)?);
        headers.insert(REFERER, header_value("referer", self.referer.as_str())?);
        if let Some(agent) = account.user_agent.as_deref() {
            headers.insert(USER_AGENT, header_value("user-agent", agent)?);
        }

        let mut builder = Client::builder()
            .default_headers(headers)
            .cookie_provider(Arc::new(reqwest::cookie::Jar::default()));
        if let Some(proxy) = route.to_reqwest_proxy()? {
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(ContextError::ClientBuild)?;

        debug!("[{}] Context ready, route: {}", account.display_name, route.redacted());
        Ok(NetworkContext {
            client,
            base_url: self.base_url.clone(),
            account: account.display_name.clone(),
            route,
        })
    }
}

fn header_value(header: &'static str, value: &str) -> Result<HeaderValue, ContextError> {
    HeaderValue::from_str(value).map_err(|source| ContextError::InvalidHeader { header, source })
}
