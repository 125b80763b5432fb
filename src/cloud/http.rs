//! Production `CloudClient`: paginated REST catch-up over `reqwest`, live
//! subscription over `tokio-tungstenite` — the same two-transport split as
//! the teacher's uplink (WS) plus a new REST leg for catch-up, since the
//! teacher had no paginated-fetch precedent of its own.

use super::{CloudClient, EventStream};
use crate::error::CloudError;
use crate::model::Event;
use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

pub struct HttpCloudClient {
    http: reqwest::Client,
    base_url: String,
    key: String,
}

impl HttpCloudClient {
    pub fn new(base_url: impl Into<String>, key: impl Into<String>) -> Self {
        HttpCloudClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            key: key.into(),
        }
    }

    fn ws_url(&self, repo: &str) -> String {
        let ws_base = self
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{ws_base}/realtime/v1/subscribe?repo={repo}")
    }
}

#[async_trait]
impl CloudClient for HttpCloudClient {
    async fn fetch_since(
        &self,
        repo: &str,
        after_remote_id: i64,
        limit: u32,
    ) -> Result<Vec<Event>, CloudError> {
        let url = format!("{}/rest/v1/events", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", self.key))
            .query(&[
                ("repo", format!("eq.{repo}")),
                ("id", format!("gt.{after_remote_id}")),
                ("order", "id.asc".to_owned()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| CloudError::Transient(e.to_string()))?;

        classify_status(response.status())?;

        response
            .json::<Vec<Event>>()
            .await
            .map_err(|e| CloudError::Transient(format!("decoding catch-up page: {e}")))
    }

    async fn subscribe(&self, repo: &str) -> Result<EventStream, CloudError> {
        let url = self.ws_url(repo);
        let mut request = url
            .into_client_request()
            .map_err(|e| CloudError::Fatal(format!("invalid subscribe URL: {e}")))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.key)
                .parse()
                .map_err(|e| CloudError::Fatal(format!("invalid auth header: {e}")))?,
        );

        let (ws, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| CloudError::Transient(format!("subscribe connect: {e}")))?;
        if response.status() == StatusCode::UNAUTHORIZED || response.status() == StatusCode::FORBIDDEN {
            return Err(CloudError::Fatal(format!(
                "subscribe rejected: {}",
                response.status()
            )));
        }

        let stream = try_stream! {
            let mut ws = ws;
            while let Some(msg) = ws.next().await {
                let msg = msg.map_err(|e| CloudError::Transient(e.to_string()))?;
                match msg {
                    Message::Text(text) => {
                        let event: Event = serde_json::from_str(&text)
                            .map_err(|e| CloudError::Transient(format!("decoding live event: {e}")))?;
                        yield event;
                    }
                    Message::Ping(_) | Message::Pong(_) => {
                        debug!("subscribe stream keepalive");
                    }
                    Message::Close(_) => {
                        debug!("subscribe stream closed by server");
                        break;
                    }
                    _ => {}
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

fn classify_status(status: StatusCode) -> Result<(), CloudError> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(CloudError::Fatal(format!("authentication failed: {status}")));
    }
    warn!(%status, "catch-up fetch returned non-success status");
    Err(CloudError::Transient(format!("unexpected status: {status}")))
}
