use reqwest::Url;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::client::{
    AssistantClient, BoxFuture, BuildHttpClientSnafu, ChatReply, ClientConfig, ClientError,
    ClientResult, DecodeSnafu, ImageRef, RemoteError, RemoteResult, StatusSnafu, TransportSnafu,
};

const CHAT_PATH: &str = "chat";
const RESET_PATH: &str = "reset_chat";
const SUGGESTIONS_PATH: &str = "suggestions";

#[derive(Debug, Serialize)]
struct MessageBody<'a> {
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponseBody {
    response: String,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SuggestionsResponseBody {
    suggestions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// JSON-over-HTTP client for the assistant backend.
pub struct HttpAssistantClient {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpAssistantClient {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let base_url = parse_base_url(&config.base_url)?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context(BuildHttpClientSnafu {
            stage: "http-client-build",
        })?;

        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Requests the backend root; used for startup diagnostics only.
    pub async fn health(&self) -> RemoteResult<()> {
        let response = self
            .http
            .get(self.base_url.clone())
            .send()
            .await
            .context(TransportSnafu {
                stage: "health-send",
            })?;
        ensure_success(response, "health-status").await?;
        Ok(())
    }

    fn endpoint(&self, path: &str, stage: &'static str) -> RemoteResult<Url> {
        self.base_url
            .join(path)
            .map_err(|source| RemoteError::InvalidEndpoint {
                stage,
                details: format!("cannot build endpoint '{path}': {source}"),
            })
    }

    async fn post_message(
        &self,
        path: &str,
        text: &str,
        stage: &'static str,
    ) -> RemoteResult<reqwest::Response> {
        let url = self.endpoint(path, stage)?;
        let response = self
            .http
            .post(url)
            .json(&MessageBody { message: text })
            .send()
            .await
            .context(TransportSnafu { stage })?;
        ensure_success(response, stage).await
    }
}

impl AssistantClient for HttpAssistantClient {
    fn send_message<'a>(&'a self, text: &'a str) -> BoxFuture<'a, RemoteResult<ChatReply>> {
        Box::pin(async move {
            let response = self.post_message(CHAT_PATH, text, "chat-send").await?;
            let body: ChatResponseBody = response.json().await.context(DecodeSnafu {
                stage: "chat-decode",
            })?;

            let image = body
                .image
                .filter(|image| !image.trim().is_empty())
                .map(ImageRef::new);
            tracing::debug!(
                response_chars = body.response.chars().count(),
                has_image = image.is_some(),
                "assistant replied"
            );
            Ok(ChatReply {
                response: body.response,
                image,
            })
        })
    }

    fn reset_conversation<'a>(&'a self) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let url = self.endpoint(RESET_PATH, "reset-endpoint")?;
            let response = self.http.post(url).send().await.context(TransportSnafu {
                stage: "reset-send",
            })?;
            ensure_success(response, "reset-status").await?;
            Ok(())
        })
    }

    fn fetch_suggestions<'a>(&'a self, text: &'a str) -> BoxFuture<'a, RemoteResult<Vec<String>>> {
        Box::pin(async move {
            let response = self
                .post_message(SUGGESTIONS_PATH, text, "suggestions-send")
                .await?;
            let body: SuggestionsResponseBody = response.json().await.context(DecodeSnafu {
                stage: "suggestions-decode",
            })?;
            Ok(body.suggestions)
        })
    }
}

async fn ensure_success(
    response: reqwest::Response,
    stage: &'static str,
) -> RemoteResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    // An unreadable error body is not worse than an absent one.
    let body = response.text().await.unwrap_or_default();
    StatusSnafu {
        stage,
        status: status.as_u16(),
        message: error_message_from_body(&body),
    }
    .fail()
}

fn error_message_from_body(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
}

fn parse_base_url(raw: &str) -> ClientResult<Url> {
    let mut url = Url::parse(raw.trim()).map_err(|source| ClientError::InvalidBaseUrl {
        stage: "parse-base-url",
        base_url: raw.to_string(),
        details: source.to_string(),
    })?;

    if url.cannot_be_a_base() {
        return Err(ClientError::CannotBeABase {
            stage: "parse-base-url",
            base_url: raw.to_string(),
        });
    }

    // Url::join replaces the last segment unless the base ends with '/'.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}
