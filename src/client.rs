//! HTTP client that drives the 402 pay-then-retry protocol

use http::{HeaderName, HeaderValue, StatusCode};
use parking_lot::Mutex;
use reqwest::{Client, Response};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::gateway::{CompletionRoute, HttpPaymentGateway, PaymentGateway};
use crate::store::{GrantStore, MemoryGrantStore};
use crate::types::*;
use crate::{endpoint_url, PaygError, Result, PAYMENT_ID_HEADER};

/// Per-key guard allowing one payment sequence per resource at a time
#[derive(Debug, Clone, Default)]
pub struct InFlightPayments {
    keys: Arc<Mutex<HashSet<ResourceKey>>>,
}

impl InFlightPayments {
    /// Create an empty guard set
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`; `None` when another sequence already holds it
    pub fn try_acquire(&self, key: &ResourceKey) -> Option<PaymentSlot> {
        let mut keys = self.keys.lock();
        if !keys.insert(key.clone()) {
            return None;
        }
        Some(PaymentSlot {
            keys: Arc::clone(&self.keys),
            key: key.clone(),
        })
    }

    /// Whether a sequence currently holds `key`
    pub fn is_held(&self, key: &ResourceKey) -> bool {
        self.keys.lock().contains(key)
    }
}

/// Claim on a resource key, released on drop
#[derive(Debug)]
pub struct PaymentSlot {
    keys: Arc<Mutex<HashSet<ResourceKey>>>,
    key: ResourceKey,
}

impl Drop for PaymentSlot {
    fn drop(&mut self) {
        self.keys.lock().remove(&self.key);
    }
}

/// HTTP client with 402 payment support
#[derive(Clone)]
pub struct PaygClient {
    base_url: Url,
    http: Client,
    store: Arc<dyn GrantStore>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    in_flight: InFlightPayments,
}

impl std::fmt::Debug for PaygClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaygClient")
            .field("base_url", &self.base_url.as_str())
            .field("store", &"<grant store>")
            .field("gateway", &"<payment gateway>")
            .finish()
    }
}

impl PaygClient {
    /// Create a client with an in-memory grant store and the API-proxy gateway
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let base_url = config.base_url()?;
        let http = config.http_client()?;
        let gateway =
            HttpPaymentGateway::with_client(base_url.clone(), CompletionRoute::ApiProxy, http.clone());

        Ok(Self {
            base_url,
            http,
            store: Arc::new(MemoryGrantStore::new()),
            gateway: Arc::new(gateway),
            clock: Arc::new(SystemClock),
            in_flight: InFlightPayments::new(),
        })
    }

    /// Replace the grant store
    pub fn with_store(mut self, store: Arc<dyn GrantStore>) -> Self {
        self.store = store;
        self
    }

    /// Replace the payment gateway
    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    /// Replace the clock used for expiry checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share an in-flight guard with other components
    pub fn with_in_flight(mut self, in_flight: InFlightPayments) -> Self {
        self.in_flight = in_flight;
        self
    }

    /// Grant store in use
    pub fn store(&self) -> &Arc<dyn GrantStore> {
        &self.store
    }

    /// Payment gateway in use
    pub fn gateway(&self) -> &Arc<dyn PaymentGateway> {
        &self.gateway
    }

    /// Clock in use
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// In-flight payment guard
    pub fn in_flight(&self) -> &InFlightPayments {
        &self.in_flight
    }

    /// Base URL of the backend
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Perform a protected request, attaching any one-shot payment proof held
    /// for `key` and recording a pending grant when the server answers 402
    pub async fn request(&self, key: &ResourceKey, spec: &RequestSpec) -> RequestOutcome {
        let grant = match self.store.get(key) {
            Ok(grant) => grant,
            Err(err) => return RequestOutcome::Failure(err),
        };

        let mut proof = None;
        if let Some(grant) = &grant {
            if grant.is_one_shot() {
                debug!(%key, payment_id = %grant.payment_id, "attaching payment proof");
                proof = Some(grant.payment_id.as_str());
            } else if grant.is_valid_at(self.clock.now()) {
                debug!(%key, "access window open");
            } else {
                info!(%key, "access window expired");
                if let Err(err) = self.store.delete(key) {
                    return RequestOutcome::Failure(err);
                }
            }
        }

        let response = match self.send(spec, proof).await {
            Ok(response) => response,
            Err(err) => {
                warn!(%key, error = %err, "request failed");
                return RequestOutcome::Failure(err);
            }
        };

        let status = response.status();
        if status == StatusCode::PAYMENT_REQUIRED {
            return self.record_requirement(key, response).await;
        }

        if status.is_success() {
            let data = match read_body(response).await {
                Ok(data) => data,
                Err(err) => return RequestOutcome::Failure(err),
            };
            if grant.as_ref().is_some_and(PaymentGrant::is_one_shot) {
                if let Err(err) = self.store.delete(key) {
                    return RequestOutcome::Failure(err);
                }
                debug!(%key, "one-shot grant consumed");
            }
            return RequestOutcome::Success {
                status: status.as_u16(),
                data,
            };
        }

        let message = read_body(response)
            .await
            .ok()
            .and_then(|body| error_message(&body))
            .unwrap_or_else(|| status.to_string());
        warn!(%key, status = status.as_u16(), %message, "request rejected");
        RequestOutcome::Failure(PaygError::status(status.as_u16(), message))
    }

    /// Perform a request and, when payment is owed, ask `decide` whether to
    /// pay. On approval the payment is completed and the request re-issued
    /// exactly once.
    pub async fn request_with_auto_pay<F, Fut>(
        &self,
        key: &ResourceKey,
        spec: &RequestSpec,
        decide: F,
    ) -> RequestOutcome
    where
        F: FnOnce(PaymentRequirement) -> Fut,
        Fut: Future<Output = bool>,
    {
        let Some(_slot) = self.in_flight.try_acquire(key) else {
            warn!(%key, "payment already in progress");
            return RequestOutcome::Failure(PaygError::PaymentInProgress {
                key: key.to_string(),
            });
        };

        let requirement = match self.request(key, spec).await {
            RequestOutcome::PaymentRequired(requirement) => requirement,
            other => return other,
        };

        if !decide(requirement.clone()).await {
            info!(%key, payment_id = %requirement.payment_id, "payment declined");
            return RequestOutcome::Declined(requirement);
        }

        if let Err(err) = self.complete_pending(key).await {
            return RequestOutcome::Failure(err);
        }

        self.request(key, spec).await
    }

    /// GET `api-proxy/{api_name}/{endpoint}`
    pub async fn call_api(&self, api_name: &str, endpoint: &str) -> RequestOutcome {
        self.request(
            &ResourceKey::api(api_name, endpoint),
            &RequestSpec::api(api_name, endpoint),
        )
        .await
    }

    /// GET `api-proxy/{api_name}/{endpoint}` with automatic payment
    pub async fn call_api_with_payment<F, Fut>(
        &self,
        api_name: &str,
        endpoint: &str,
        decide: F,
    ) -> RequestOutcome
    where
        F: FnOnce(PaymentRequirement) -> Fut,
        Fut: Future<Output = bool>,
    {
        self.request_with_auto_pay(
            &ResourceKey::api(api_name, endpoint),
            &RequestSpec::api(api_name, endpoint),
            decide,
        )
        .await
    }

    /// Complete the pending payment held for `key`
    pub async fn complete_payment(&self, key: &ResourceKey) -> Result<CompletionReceipt> {
        let Some(_slot) = self.in_flight.try_acquire(key) else {
            return Err(PaygError::PaymentInProgress {
                key: key.to_string(),
            });
        };
        self.complete_pending(key).await
    }

    /// Complete the pending grant for `key`; the caller holds its slot.
    /// A failed completion leaves the grant pending.
    pub(crate) async fn complete_pending(&self, key: &ResourceKey) -> Result<CompletionReceipt> {
        let grant = self
            .store
            .get(key)?
            .filter(PaymentGrant::is_pending)
            .ok_or_else(|| PaygError::NoPendingPayment {
                key: key.to_string(),
            })?;

        match self.gateway.complete(&grant.payment_id).await {
            PaymentCompletion::Completed(receipt) => {
                // a fresh 402 may have replaced the grant while completing
                let current = self.store.get(key)?;
                if current.is_some_and(|c| c.payment_id == grant.payment_id) {
                    self.store.put(key, grant.completed())?;
                }
                Ok(receipt)
            }
            PaymentCompletion::Failed(err) => Err(err),
        }
    }

    /// Drop every stored grant
    pub fn clear_payments(&self) -> Result<()> {
        self.store.clear()
    }

    /// List protected APIs and their nominal pricing
    pub async fn available_apis(&self) -> Result<ApiCatalog> {
        let url = endpoint_url(&self.base_url, "available-apis")?;
        let response = self.http.get(url).send().await?;

        if !response.status().is_success() {
            return Err(PaygError::status(
                response.status().as_u16(),
                "Failed to list available APIs",
            ));
        }

        Ok(response.json().await?)
    }

    async fn send(&self, spec: &RequestSpec, proof: Option<&str>) -> Result<Response> {
        let url = endpoint_url(&self.base_url, &spec.path)?;

        let mut headers = spec.headers.clone();
        if let Some(payment_id) = proof {
            let value = HeaderValue::from_str(payment_id).map_err(|_| {
                PaygError::malformed_response(format!("Payment id {:?} is not a valid header", payment_id))
            })?;
            headers.insert(payment_header(), value);
        }

        let mut request = self
            .http
            .request(spec.method.clone(), url)
            .headers(headers);
        if !spec.query.is_empty() {
            request = request.query(&spec.query);
        }
        if let Some(body) = &spec.body {
            request = request.json(body);
        }

        Ok(request.send().await?)
    }

    async fn record_requirement(&self, key: &ResourceKey, response: Response) -> RequestOutcome {
        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => return RequestOutcome::Failure(err.into()),
        };
        let requirement: PaymentRequirement = match serde_json::from_str(&text) {
            Ok(requirement) => requirement,
            Err(err) => {
                return RequestOutcome::Failure(PaygError::malformed_response(format!(
                    "Invalid payment requirement: {}",
                    err
                )))
            }
        };

        if let Err(err) = self.store.put(key, PaymentGrant::pending(&requirement)) {
            return RequestOutcome::Failure(err);
        }
        info!(
            %key,
            payment_id = %requirement.payment_id,
            amount_usd = %requirement.amount_usd,
            "payment required"
        );
        RequestOutcome::PaymentRequired(requirement)
    }
}

fn payment_header() -> HeaderName {
    HeaderName::from_static(PAYMENT_ID_HEADER)
}

async fn read_body(response: Response) -> Result<Value> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

fn error_message(body: &Value) -> Option<String> {
    match body {
        Value::Object(map) => map
            .get("error")
            .or_else(|| map.get("message"))
            .and_then(Value::as_str)
            .map(String::from),
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client(url: &str) -> PaygClient {
        PaygClient::new(&ClientConfig::new(url)).unwrap()
    }

    #[test]
    fn test_client_creation() {
        let client = client("http://localhost:5000/api");
        assert_eq!(client.base_url().as_str(), "http://localhost:5000/api/");
    }

    #[test]
    fn test_client_rejects_invalid_config() {
        assert!(PaygClient::new(&ClientConfig::new("localhost:5000")).is_err());
    }

    #[test]
    fn test_in_flight_guard() {
        let guard = InFlightPayments::new();
        let key = ResourceKey::from("ml-inference:predict");
        let other = ResourceKey::from("weather:current");

        let slot = guard.try_acquire(&key).unwrap();
        assert!(guard.try_acquire(&key).is_none());
        assert!(guard.try_acquire(&other).is_some());
        assert!(guard.is_held(&key));

        drop(slot);
        assert!(!guard.is_held(&key));
        assert!(guard.try_acquire(&key).is_some());
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(&json!({"error": "API not found"})).as_deref(),
            Some("API not found")
        );
        assert_eq!(
            error_message(&json!({"message": "nope"})).as_deref(),
            Some("nope")
        );
        assert_eq!(error_message(&json!([1, 2])), None);
    }

    #[tokio::test]
    async fn test_caller_headers_are_kept_and_query_sent() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/api-proxy/weather/current")
            .match_query(Matcher::UrlEncoded("q".into(), "London".into()))
            .match_header("x-trace", "abc")
            .match_header(PAYMENT_ID_HEADER, Matcher::Missing)
            .with_status(200)
            .with_body(json!({"response": {"temperature": 22}}).to_string())
            .expect(1)
            .create_async()
            .await;

        let spec = RequestSpec::api("weather", "current")
            .query("q", "London")
            .header("x-trace", "abc")
            .unwrap();
        let outcome = client(&server.url())
            .request(&ResourceKey::api("weather", "current"), &spec)
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.data().unwrap()["response"]["temperature"], 22);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_not_found_is_failure_without_grant() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/api-proxy/unknown/x")
            .with_status(404)
            .with_body(json!({"error": "API not found"}).to_string())
            .create_async()
            .await;

        let client = client(&server.url());
        let outcome = client.call_api("unknown", "x").await;

        let err = outcome.error().unwrap();
        assert_eq!(err.http_status(), Some(404));
        assert!(err.to_string().contains("API not found"));
        assert!(client
            .store()
            .get(&ResourceKey::api("unknown", "x"))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_malformed_402_leaves_store_untouched() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/api-proxy/ml-inference/predict")
            .with_status(402)
            .with_body("payment please")
            .create_async()
            .await;

        let client = client(&server.url());
        let outcome = client.call_api("ml-inference", "predict").await;

        assert!(outcome.error().unwrap().is_transport());
        assert!(client
            .store()
            .get(&ResourceKey::api("ml-inference", "predict"))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_available_apis() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/available-apis")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "apis": {
                        "weather": {"cost_per_call": 0.001, "free": true, "description": "Weather API service"},
                        "ml-inference": {"cost_per_call": 0.01, "free": false, "description": "Ml-Inference API service"}
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let catalog = client(&server.url()).available_apis().await.unwrap();
        assert_eq!(catalog.apis.len(), 2);
        assert!(catalog.apis["weather"].free);
        assert!(!catalog.apis["ml-inference"].free);
        assert_eq!(catalog.apis["ml-inference"].cost_per_call.to_string(), "0.01");
    }

    #[tokio::test]
    async fn test_available_apis_failure() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/available-apis")
            .with_status(500)
            .create_async()
            .await;

        let err = client(&server.url()).available_apis().await.unwrap_err();
        assert_eq!(err.http_status(), Some(500));
    }
}
