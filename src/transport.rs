use std::fmt;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use tracing::debug;

use crate::error::TransportError;

/// Basic-auth credentials for the GTmetrix API (account e-mail and API key).
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub api_key: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            api_key: api_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Raw HTTP response handed back to the session for decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }
}

/// Authenticated HTTP requester used by [`crate::TestSession`].
///
/// Non-2xx statuses are not errors here: the API reports failures in the JSON body.
pub trait Transport {
    fn get(&self, url: &str, credentials: &Credentials) -> Result<HttpReply, TransportError>;
    fn post_form(
        &self,
        url: &str,
        credentials: &Credentials,
        form: &[(&str, &str)],
    ) -> Result<HttpReply, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &str, credentials: &Credentials) -> Result<HttpReply, TransportError> {
        (**self).get(url, credentials)
    }

    fn post_form(
        &self,
        url: &str,
        credentials: &Credentials,
        form: &[(&str, &str)],
    ) -> Result<HttpReply, TransportError> {
        (**self).post_form(url, credentials, form)
    }
}

/// Transport backed by a single reusable `reqwest` blocking client.
#[derive(Debug, Clone)]
pub struct BlockingTransport {
    client: Client,
}

impl BlockingTransport {
    pub fn new(user_agent: &str, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(request_timeout)
            .build()
            .map_err(|err| TransportError::Client(Box::new(err)))?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn execute(&self, url: &str, request: RequestBuilder) -> Result<HttpReply, TransportError> {
        let response = request.send().map_err(|err| TransportError::Send {
            url: url.to_string(),
            source: Box::new(err),
        })?;
        let status = response.status();
        if !status.is_success() {
            debug!(%url, %status, "GTmetrix returned non-success status");
        }
        let body = response.text().map_err(|err| TransportError::Read {
            url: url.to_string(),
            source: Box::new(err),
        })?;
        Ok(HttpReply {
            status: status.as_u16(),
            body,
        })
    }
}

impl Transport for BlockingTransport {
    fn get(&self, url: &str, credentials: &Credentials) -> Result<HttpReply, TransportError> {
        let request = self
            .client
            .get(url)
            .basic_auth(&credentials.username, Some(&credentials.api_key));
        self.execute(url, request)
    }

    fn post_form(
        &self,
        url: &str,
        credentials: &Credentials,
        form: &[(&str, &str)],
    ) -> Result<HttpReply, TransportError> {
        let request = self
            .client
            .post(url)
            .basic_auth(&credentials.username, Some(&credentials.api_key))
            .form(form);
        self.execute(url, request)
    }
}

/// Join an API root and a relative path, tolerating stray slashes on either side.
pub fn join_endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
