use std::time::Duration;
use reqwest::StatusCode;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use shared::protocol::{NOTIFICATIONS_PATH, SYSTEM_PRODUCTS_PATH};
use shared::types::{Product, ProductsResponse};
use crate::config::DeviceConfig;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} cancelled")]
    Cancelled { url: String },
}

/// Build the HTTP client shared by every device call.
/// Only the connect phase is bounded here; the notification stream must be
/// allowed to stay open indefinitely.
pub fn http_client(config: &DeviceConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(config.request_timeout())
        .build()
}

/// REST client for one product, addressed as `http://<address>:<port>`
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl DeviceClient {
    pub fn new(http: reqwest::Client, address: &str, config: &DeviceConfig) -> Self {
        Self {
            http,
            base_url: format!("http://{}:{}", address, config.port),
            request_timeout: config.request_timeout(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Every product this product knows about, itself included
    pub async fn system_products(&self) -> Result<Vec<Product>, ClientError> {
        let url = format!("{}{}", self.base_url, SYSTEM_PRODUCTS_PATH);

        let response = self
            .http
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|source| ClientError::Http { url: url.clone(), source })?;

        let response = check_status(&url, response)?;
        let body: ProductsResponse = response
            .json()
            .await
            .map_err(|source| ClientError::Decode { url, source })?;

        Ok(body.products)
    }

    /// Open the notification feed. Succeeds once the response headers arrive
    /// with a success status; the body is left unread for the caller.
    pub async fn open_notifications(
        &self,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ClientError> {
        let url = format!("{}{}", self.base_url, NOTIFICATIONS_PATH);
        tracing::debug!("Opening notification stream at {}", url);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled { url }),
            response = self.http.get(&url).send() => response,
        };

        let response = response.map_err(|source| ClientError::Http { url: url.clone(), source })?;
        check_status(&url, response)
    }
}

fn check_status(url: &str, response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ClientError::Status { url: url.to_string(), status })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::SocketAddr;
    use axum::{http::StatusCode as AxumStatus, routing::get, Router};

    /// Serve `app` on an ephemeral localhost port
    pub(crate) async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    pub(crate) fn client_for(addr: SocketAddr) -> DeviceClient {
        let config = DeviceConfig {
            port: addr.port(),
            request_timeout_secs: 5,
        };
        DeviceClient::new(http_client(&config).unwrap(), "127.0.0.1", &config)
    }

    #[tokio::test]
    async fn test_system_products() {
        let app = Router::new().route(
            SYSTEM_PRODUCTS_PATH,
            get(|| async {
                r#"{"products": [
                    {"jid": "a@p", "friendlyName": "Kitchen", "online": true},
                    {"jid": "b@p", "friendlyName": "Den", "online": false}
                ]}"#
            }),
        );
        let client = client_for(serve(app).await);

        let products = client.system_products().await.unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].friendly_name, "Kitchen");
        assert!(!products[1].online);
    }

    #[tokio::test]
    async fn test_system_products_error_status() {
        let app = Router::new().route(
            SYSTEM_PRODUCTS_PATH,
            get(|| async { AxumStatus::INTERNAL_SERVER_ERROR }),
        );
        let client = client_for(serve(app).await);

        let err = client.system_products().await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn test_system_products_bad_body() {
        let app = Router::new().route(SYSTEM_PRODUCTS_PATH, get(|| async { "<html>" }));
        let client = client_for(serve(app).await);

        let err = client.system_products().await.unwrap_err();
        assert!(matches!(err, ClientError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_open_notifications_rejects_error_status() {
        let app = Router::new().route(
            NOTIFICATIONS_PATH,
            get(|| async { AxumStatus::SERVICE_UNAVAILABLE }),
        );
        let client = client_for(serve(app).await);

        let err = client
            .open_notifications(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Status { .. }));
    }

    #[tokio::test]
    async fn test_open_notifications_cancelled() {
        let client = client_for(serve(Router::new()).await);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client.open_notifications(&cancel).await.unwrap_err();
        assert!(matches!(err, ClientError::Cancelled { .. }));
    }
}
