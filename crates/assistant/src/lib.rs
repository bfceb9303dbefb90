mod client;
mod http;

pub use client::{
    AssistantClient, BoxFuture, ChatReply, ClientConfig, ClientError, ClientResult, ImageRef,
    RemoteError, RemoteResult,
};
pub use http::HttpAssistantClient;
