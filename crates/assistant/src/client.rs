use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use snafu::Snafu;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type RemoteResult<T> = Result<T, RemoteError>;
pub type ClientResult<T> = Result<T, ClientError>;

/// Connection settings for the assistant backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().to_string(),
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Opaque reference to an image the assistant attached to its reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One successful assistant turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub response: String,
    pub image: Option<ImageRef>,
}

impl ChatReply {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }
}

/// Failure of one remote call, classified once at the client boundary.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RemoteError {
    #[snafu(display("request to assistant backend failed on `{stage}`, {source}"))]
    Transport {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("assistant backend returned status {status} on `{stage}`"))]
    Status {
        stage: &'static str,
        status: u16,
        message: Option<String>,
    },
    #[snafu(display("failed to decode assistant response on `{stage}`, {source}"))]
    Decode {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("cannot build assistant endpoint on `{stage}`: {details}"))]
    InvalidEndpoint {
        stage: &'static str,
        details: String,
    },
}

impl RemoteError {
    /// Error text supplied by the backend itself, if it sent one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Status { message, .. } => message.as_deref(),
            Self::Transport { .. } | Self::Decode { .. } | Self::InvalidEndpoint { .. } => None,
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClientError {
    #[snafu(display("assistant base URL '{base_url}' is invalid: {details}"))]
    InvalidBaseUrl {
        stage: &'static str,
        base_url: String,
        details: String,
    },
    #[snafu(display("assistant base URL '{base_url}' cannot carry a path"))]
    CannotBeABase {
        stage: &'static str,
        base_url: String,
    },
    #[snafu(display("failed to build HTTP client on `{stage}`, {source}"))]
    BuildHttpClient {
        stage: &'static str,
        source: reqwest::Error,
    },
}

/// Boundary to the remote assistant service.
///
/// Calls are independent request/response cycles; implementations keep no
/// client-side conversation state.
pub trait AssistantClient: Send + Sync {
    fn send_message<'a>(&'a self, text: &'a str) -> BoxFuture<'a, RemoteResult<ChatReply>>;
    fn reset_conversation<'a>(&'a self) -> BoxFuture<'a, RemoteResult<()>>;
    fn fetch_suggestions<'a>(&'a self, text: &'a str) -> BoxFuture<'a, RemoteResult<Vec<String>>>;
}
