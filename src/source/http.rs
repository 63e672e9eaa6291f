//! HTTP bridge client for the message source.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::config::SourceSettings;
use crate::error::{SourceError, TransferError};
use crate::source::{BlobStore, ChannelInfo, Document, Message, MessageId, MessageSource, ProgressFn};

/// [`MessageSource`] and [`BlobStore`] backed by an HTTP bridge.
pub struct HttpBridgeSource {
    client: reqwest::Client,
    base_url: Url,
    token: Option<SecretString>,
    timeout: Duration,
}

impl HttpBridgeSource {
    pub fn new(settings: &SourceSettings) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_seconds))
            .build()
            .map_err(|e| SourceError::Connection(e.to_string()))?;
        let base_url = Url::parse(&settings.base_url)
            .map_err(|e| SourceError::InvalidUrl(format!("{}: {e}", settings.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(SourceError::InvalidUrl(settings.base_url.clone()));
        }
        Ok(Self {
            client,
            base_url,
            token: settings.token.clone().map(SecretString::from),
            timeout: Duration::from_secs(settings.request_timeout_seconds),
        })
    }

    /// Base URL with `segments` appended, each percent-encoded as one segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, SourceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| SourceError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn get(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Response, SourceError> {
        let request = self
            .client
            .get(self.endpoint(segments)?)
            .query(query)
            .timeout(self.timeout);
        self.authorize(request)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))
    }

    fn map_request_error(&self, e: reqwest::Error) -> SourceError {
        if e.is_timeout() {
            SourceError::Timeout(self.timeout)
        } else {
            SourceError::from(e)
        }
    }
}

/// Turn a non-success status into the matching source error.
async fn check_status(response: Response) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(SourceError::RateLimited { retry_after });
    }
    let body = response.text().await.unwrap_or_default();
    Err(SourceError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl MessageSource for HttpBridgeSource {
    async fn describe(&self, channel: &str) -> Result<ChannelInfo, SourceError> {
        let response = self.get(&["channels", channel], &[]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::ChannelNotFound {
                channel: channel.to_string(),
            });
        }
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))
    }

    async fn fetch_page(
        &self,
        channel: &str,
        min_id: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, SourceError> {
        let response = self
            .get(
                &["channels", channel, "messages"],
                &[("min_id", min_id.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))
    }

    async fn resolve(
        &self,
        channel: &str,
        message_id: MessageId,
    ) -> Result<Option<Message>, SourceError> {
        let response = self
            .get(&["channels", channel, "messages", message_id.to_string().as_str()], &[])
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))
    }

    async fn send_and_await_reply(
        &self,
        bot: &str,
        command: &str,
    ) -> Result<Vec<Message>, SourceError> {
        let request = self
            .client
            .post(self.endpoint(&["bots", bot, "commands"])?)
            .json(&serde_json::json!({ "command": command }))
            .timeout(self.timeout);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl BlobStore for HttpBridgeSource {
    async fn transfer(
        &self,
        channel: &str,
        message_id: MessageId,
        document: &Document,
        destination: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<u64, TransferError> {
        // No overall timeout: large documents legitimately take a while.
        let url = self.endpoint(&[
            "channels",
            channel,
            "messages",
            message_id.to_string().as_str(),
            "document",
        ])?;
        let request = self.client.get(url);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| TransferError::Interrupted(SourceError::from(e)))?;
        let response = check_status(response).await?;

        let total = response.content_length().unwrap_or(document.size);
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| TransferError::storage(destination, e))?;

        let mut done: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransferError::Interrupted(SourceError::from(e)))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| TransferError::storage(destination, e))?;
            done += chunk.len() as u64;
            progress(done, total);
        }
        file.flush()
            .await
            .map_err(|e| TransferError::storage(destination, e))?;

        if total > 0 && done < total {
            return Err(TransferError::Incomplete {
                received: done,
                expected: total,
            });
        }
        Ok(done)
    }
}
