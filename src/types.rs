//! Core types for the payg protocol

use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::PaygError;

/// Length of the hex digest used for page-level resource keys
const PAGE_KEY_LEN: usize = 16;

/// Stable identifier for a unit of protected access
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Wrap an already-derived key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for a metered API endpoint, e.g. `ml-inference:predict`
    pub fn api(api_name: &str, endpoint: &str) -> Self {
        Self(format!("{}:{}", api_name, endpoint))
    }

    /// Key for page-level access, a short digest of the page identity
    pub fn page(url: &str, title: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update(title.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(digest[..PAGE_KEY_LEN].to_string())
    }

    /// Borrow the key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Payment state of a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    /// 402 seen, not yet paid
    Pending,
    /// Payment confirmed by the backend
    Completed,
}

/// Payment state tracked for one resource key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentGrant {
    /// Identifier issued by the backend with the 402
    pub payment_id: String,
    /// Informational price in USD
    pub amount_usd: Decimal,
    /// Informational price in satoshis
    pub amount_satoshis: u64,
    /// Current payment state
    pub status: GrantStatus,
    /// End of the access window; absent for one-shot grants
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PaymentGrant {
    /// Create a pending grant from a payment requirement
    pub fn pending(requirement: &PaymentRequirement) -> Self {
        Self {
            payment_id: requirement.payment_id.clone(),
            amount_usd: requirement.amount_usd,
            amount_satoshis: requirement.amount_satoshis,
            status: GrantStatus::Pending,
            expires_at: None,
        }
    }

    /// Mark the grant as paid
    pub fn completed(mut self) -> Self {
        self.status = GrantStatus::Completed;
        self
    }

    /// Turn the grant into an access window ending at `expires_at`
    pub fn time_boxed(mut self, expires_at: DateTime<Utc>) -> Self {
        self.status = GrantStatus::Completed;
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the grant is consumed by the next successful request
    pub fn is_one_shot(&self) -> bool {
        self.expires_at.is_none()
    }

    /// Whether the grant is still awaiting payment
    pub fn is_pending(&self) -> bool {
        self.status == GrantStatus::Pending
    }

    /// A time-boxed grant is valid strictly before its expiry
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => self.status == GrantStatus::Completed && now < expires_at,
            None => false,
        }
    }
}

/// Body of a 402 Payment Required response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequirement {
    /// Identifier to complete and present on retry
    pub payment_id: String,
    /// Price in USD
    #[serde(default, deserialize_with = "lenient_usd")]
    pub amount_usd: Decimal,
    /// Price in satoshis
    #[serde(default, deserialize_with = "lenient_satoshis")]
    pub amount_satoshis: u64,
    /// API the requirement was issued for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_name: Option<String>,
    /// Endpoint the requirement was issued for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Seconds of access bought by this payment (page-level only)
    #[serde(
        default,
        alias = "granted_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<u64>,
    /// Whether the publisher's certificate is known (page-level only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_verified: Option<bool>,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// Pricing is informational only, so an odd or missing value never rejects a 402
fn lenient_usd<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => {
            let text = n.to_string();
            text.parse::<Decimal>()
                .or_else(|_| Decimal::from_scientific(&text))
                .unwrap_or_default()
        }
        Value::String(text) => text.trim().parse().unwrap_or_default(),
        _ => Decimal::ZERO,
    })
}

fn lenient_satoshis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f as u64)
            })
            .unwrap_or(0),
        Value::String(text) => text.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Description of a request against the resource server
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// HTTP method
    pub method: Method,
    /// Path relative to the configured base URL
    pub path: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// JSON body
    pub body: Option<Value>,
    /// Caller-supplied headers
    pub headers: HeaderMap,
}

impl RequestSpec {
    /// Create a request spec
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    /// Create a GET request spec
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Create a POST request spec
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// GET against the API proxy for `api_name/endpoint`
    pub fn api(api_name: &str, endpoint: &str) -> Self {
        Self::get(api_proxy_path(api_name, endpoint))
    }

    /// Set the method
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a query parameter
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set a JSON body
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a header
    pub fn header(mut self, name: &str, value: &str) -> crate::Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| PaygError::config(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| PaygError::config(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

/// Backend path of a proxied API endpoint
pub fn api_proxy_path(api_name: &str, endpoint: &str) -> String {
    format!("api-proxy/{}/{}", api_name, endpoint.trim_start_matches('/'))
}

/// Result of a protected request
#[derive(Debug)]
pub enum RequestOutcome {
    /// The resource server answered without a 402
    Success { status: u16, data: Value },
    /// Payment is owed; a pending grant was stored
    PaymentRequired(PaymentRequirement),
    /// The caller's pay decision declined; the pending grant remains
    Declined(PaymentRequirement),
    /// Transport, status or payment failure
    Failure(PaygError),
}

impl RequestOutcome {
    /// Whether the request succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The payment requirement, if payment is owed or was declined
    pub fn requirement(&self) -> Option<&PaymentRequirement> {
        match self {
            Self::PaymentRequired(req) | Self::Declined(req) => Some(req),
            _ => None,
        }
    }

    /// Response payload on success
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Failure carried by this outcome
    pub fn error(&self) -> Option<&PaygError> {
        match self {
            Self::Failure(err) => Some(err),
            _ => None,
        }
    }
}

/// Successful completion reported by the payment backend
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReceipt {
    /// Completed payment
    pub payment_id: String,
    /// Seconds of access granted, when the backend states it
    pub granted_seconds: Option<u64>,
    /// Raw response body
    pub data: Value,
}

impl CompletionReceipt {
    /// Build a receipt from a completion response body
    pub fn from_body(payment_id: impl Into<String>, data: Value) -> Self {
        let granted_seconds = data
            .get("ad_free_duration")
            .or_else(|| data.get("granted_seconds"))
            .and_then(Value::as_u64);
        Self {
            payment_id: payment_id.into(),
            granted_seconds,
            data,
        }
    }
}

/// Result of a payment completion call
#[derive(Debug)]
pub enum PaymentCompletion {
    Completed(CompletionReceipt),
    Failed(PaygError),
}

impl PaymentCompletion {
    /// Whether the backend confirmed the payment
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Catalog entry for a protected API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiListing {
    /// Nominal price per call in USD
    pub cost_per_call: Decimal,
    /// Whether calls are free
    pub free: bool,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
}

/// Catalog of protected APIs and their pricing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCatalog {
    pub apis: BTreeMap<String, ApiListing>,
}

/// Identity of a page for ad-free access
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageIdentity {
    pub url: String,
    pub title: String,
}

impl PageIdentity {
    /// Create a page identity
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }

    /// Resource key derived from the page identity
    pub fn key(&self) -> ResourceKey {
        ResourceKey::page(&self.url, &self.title)
    }
}

/// Body posted to the ad-skip request endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdSkipRequest {
    pub page_hash: String,
    pub page_url: String,
    pub page_title: String,
}

impl AdSkipRequest {
    /// Build the request body for a page
    pub fn for_page(page: &PageIdentity) -> Self {
        Self {
            page_hash: page.key().to_string(),
            page_url: page.url.clone(),
            page_title: page.title.clone(),
        }
    }
}
