//! Payment gateway adapter: completes payments against the backend

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::types::{CompletionReceipt, PaymentCompletion};
use crate::{endpoint_url, PaygError, Result};

/// Characters escaped when a payment id is placed in a path segment
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Completes a payment identified by the id issued with a 402
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Ask the backend to complete `payment_id`. Never returns an error past
    /// this boundary; failures are reported as [`PaymentCompletion::Failed`].
    async fn complete(&self, payment_id: &str) -> PaymentCompletion;
}

/// Backend route used to complete payments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionRoute {
    /// `api-proxy/payment/{id}/complete`
    ApiProxy,
    /// `ad-skip/payment/{id}/complete`
    AdSkip,
}

impl CompletionRoute {
    fn prefix(&self) -> &'static str {
        match self {
            CompletionRoute::ApiProxy => "api-proxy",
            CompletionRoute::AdSkip => "ad-skip",
        }
    }

    /// Path of the completion endpoint for `payment_id`
    pub fn path(&self, payment_id: &str) -> String {
        format!(
            "{}/payment/{}/complete",
            self.prefix(),
            utf8_percent_encode(payment_id, SEGMENT)
        )
    }
}

/// HTTP payment gateway
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    base_url: Url,
    route: CompletionRoute,
    client: Client,
}

impl HttpPaymentGateway {
    /// Create a gateway for `route` from client configuration
    pub fn new(config: &ClientConfig, route: CompletionRoute) -> Result<Self> {
        Ok(Self::with_client(config.base_url()?, route, config.http_client()?))
    }

    /// Create a gateway sharing an existing HTTP client
    pub fn with_client(base_url: Url, route: CompletionRoute, client: Client) -> Self {
        Self {
            base_url,
            route,
            client,
        }
    }

    /// Completion route in use
    pub fn route(&self) -> CompletionRoute {
        self.route
    }

    async fn post_completion(&self, payment_id: &str) -> Result<CompletionReceipt> {
        let url = endpoint_url(&self.base_url, &self.route.path(payment_id))?;
        let response = self.client.post(url).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let reason = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|body| body.get("error").and_then(Value::as_str).map(String::from))
                .unwrap_or_else(|| format!("completion returned status {}", status));
            return Err(PaygError::payment_failed(payment_id, reason));
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(CompletionReceipt::from_body(payment_id, body))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn complete(&self, payment_id: &str) -> PaymentCompletion {
        match self.post_completion(payment_id).await {
            Ok(receipt) => {
                info!(payment_id, route = ?self.route, "payment completed");
                PaymentCompletion::Completed(receipt)
            }
            Err(err) => {
                warn!(payment_id, route = ?self.route, error = %err, "payment completion failed");
                PaymentCompletion::Failed(err)
            }
        }
    }
}
