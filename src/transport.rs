use anyhow::Result;
use async_trait::async_trait;

use crate::api::ApiRequest;

/// Raw HTTP response handed back by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as text
    pub body: String,
}

impl TransportResponse {
    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP seam used by [`AppStoreServerClient`](crate::client::AppStoreServerClient).
///
/// Implementations only move bytes. Authentication headers come in the
/// request, and trust decisions are made by the caller on the returned body.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request`.
    ///
    /// Non-2xx statuses are returned as responses, not errors; only network
    /// failures are errors.
    async fn send(&self, request: &ApiRequest) -> Result<TransportResponse>;
}

/// `reqwest` backed transport, enabled by the `reqwest-transport` feature.
#[cfg(feature = "reqwest-transport")]
pub use reqwest_transport::ReqwestTransport;

#[cfg(feature = "reqwest-transport")]
mod reqwest_transport {
    use anyhow::Result;
    use async_trait::async_trait;

    use super::{Transport, TransportResponse};
    use crate::api::{ApiRequest, HttpMethod};

    /// [`Transport`] backed by a shared `reqwest` client.
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        /// Wraps an existing client, keeping its connection pool and TLS setup.
        pub fn new(client: reqwest::Client) -> Self {
            ReqwestTransport { client }
        }
    }

    #[async_trait]
    impl Transport for ReqwestTransport {
        async fn send(&self, request: &ApiRequest) -> Result<TransportResponse> {
            let builder = match request.method {
                HttpMethod::Get => self.client.get(&request.url),
                HttpMethod::Post => self.client.post(&request.url),
            }
            .header(reqwest::header::AUTHORIZATION, &request.authorization);

            log::debug!("{} {}", request.method, request.url);
            let response = builder.send().await?;

            let status = response.status().as_u16();
            let body = response.text().await?;

            log::trace!("Response status: {status}, body: {body}");

            Ok(TransportResponse { status, body })
        }
    }

}
