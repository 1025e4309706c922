//! Time-boxed access windows for page-level purchases
//!
//! A completed page payment becomes a grant with an `expires_at`. Every page
//! load checks that grant against the clock before any network traffic; while
//! it is valid the 402 round trip is skipped entirely.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::PaygClient;
use crate::config::ClientConfig;
use crate::gateway::{CompletionRoute, HttpPaymentGateway};
use crate::persist::FileGrantStore;
use crate::store::{GrantStore, MemoryGrantStore};
use crate::types::*;
use crate::{PaygError, Result};

/// Backend path that prices ad-free access for a page
pub const AD_SKIP_REQUEST_PATH: &str = "ad-skip/request";

/// Longest window accepted from the backend (one year)
const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Collaborator that hides paid-for content while a window is open
pub trait ContentMasker: Send + Sync {
    fn window_opened(&self, key: &ResourceKey, remaining: Duration);
}

/// Masker that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMasker;

impl ContentMasker for NoopMasker {
    fn window_opened(&self, _key: &ResourceKey, _remaining: Duration) {}
}

/// An open access window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessWindow {
    pub key: ResourceKey,
    pub expires_at: DateTime<Utc>,
    pub remaining: Duration,
}

/// Access state of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowState {
    Open(AccessWindow),
    Closed,
}

impl WindowState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

/// Result of a page purchase attempt
#[derive(Debug)]
pub enum PurchaseOutcome {
    /// A valid window already existed; no network traffic was made
    AlreadyOpen(AccessWindow),
    /// A window was opened after payment or an "already paid" reply
    Opened(AccessWindow),
    /// The pay decision declined; the pending grant remains
    Declined(PaymentRequirement),
    Failure(PaygError),
}

impl PurchaseOutcome {
    /// The window, if access was granted
    pub fn window(&self) -> Option<&AccessWindow> {
        match self {
            Self::AlreadyOpen(window) | Self::Opened(window) => Some(window),
            _ => None,
        }
    }
}

/// Converts page payments into time-boxed access windows
pub struct AccessWindowManager {
    client: PaygClient,
    masker: Arc<dyn ContentMasker>,
    default_window: u64,
}

impl std::fmt::Debug for AccessWindowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessWindowManager")
            .field("client", &self.client)
            .field("default_window", &self.default_window)
            .finish()
    }
}

impl AccessWindowManager {
    /// Create a manager using the ad-skip completion route. Grants are kept
    /// in `config.grant_file` when set, otherwise in memory.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let store: Arc<dyn GrantStore> = match &config.grant_file {
            Some(path) => Arc::new(FileGrantStore::open(path)?),
            None => Arc::new(MemoryGrantStore::new()),
        };
        let gateway = HttpPaymentGateway::new(config, CompletionRoute::AdSkip)?;
        let client = PaygClient::new(config)?
            .with_store(store)
            .with_gateway(Arc::new(gateway));
        Ok(Self::with_client(client, config.ad_free_seconds))
    }

    /// Wrap an already configured client
    pub fn with_client(client: PaygClient, default_window_secs: u64) -> Self {
        Self {
            client,
            masker: Arc::new(NoopMasker),
            default_window: default_window_secs,
        }
    }

    /// Set the content masker signalled when a window opens
    pub fn with_masker(mut self, masker: Arc<dyn ContentMasker>) -> Self {
        self.masker = masker;
        self
    }

    /// Underlying client
    pub fn client(&self) -> &PaygClient {
        &self.client
    }

    /// Window state for `key` at the current time, without side effects
    pub fn check(&self, key: &ResourceKey) -> Result<WindowState> {
        let now = self.client.clock().now();
        Ok(match self.client.store().get(key)? {
            Some(grant) if grant.is_valid_at(now) => WindowState::Open(window(key, grant, now)),
            _ => WindowState::Closed,
        })
    }

    /// Page load hook: reopens a still-valid window and drops an expired one
    pub fn on_page_load(&self, page: &PageIdentity) -> Result<WindowState> {
        let key = page.key();
        let now = self.client.clock().now();

        match self.client.store().get(&key)? {
            Some(grant) if grant.is_valid_at(now) => {
                let window = window(&key, grant, now);
                debug!(%key, remaining = window.remaining.num_seconds(), "access window still open");
                self.masker.window_opened(&key, window.remaining);
                Ok(WindowState::Open(window))
            }
            Some(grant) if !grant.is_one_shot() => {
                info!(%key, "access window expired");
                self.client.store().delete(&key)?;
                Ok(WindowState::Closed)
            }
            _ => Ok(WindowState::Closed),
        }
    }

    /// Buy ad-free access to `page`, asking `decide` before paying
    pub async fn purchase<F, Fut>(&self, page: &PageIdentity, decide: F) -> PurchaseOutcome
    where
        F: FnOnce(PaymentRequirement) -> Fut,
        Fut: Future<Output = bool>,
    {
        match self.on_page_load(page) {
            Ok(WindowState::Open(window)) => return PurchaseOutcome::AlreadyOpen(window),
            Ok(WindowState::Closed) => {}
            Err(err) => return PurchaseOutcome::Failure(err),
        }

        let key = page.key();
        let Some(_slot) = self.client.in_flight().try_acquire(&key) else {
            warn!(%key, "page purchase already in progress");
            return PurchaseOutcome::Failure(PaygError::PaymentInProgress {
                key: key.to_string(),
            });
        };

        let body = match serde_json::to_value(AdSkipRequest::for_page(page)) {
            Ok(body) => body,
            Err(err) => return PurchaseOutcome::Failure(err.into()),
        };
        let spec = RequestSpec::post(AD_SKIP_REQUEST_PATH).json(body);

        match self.client.request(&key, &spec).await {
            RequestOutcome::Success { data, .. } => {
                let seconds = data
                    .get("remaining_time")
                    .and_then(Value::as_u64)
                    .unwrap_or(self.default_window);
                let grant = already_paid_grant(&data);
                self.finish(&key, grant, seconds)
            }
            RequestOutcome::PaymentRequired(requirement) => {
                if !decide(requirement.clone()).await {
                    info!(%key, payment_id = %requirement.payment_id, "page payment declined");
                    return PurchaseOutcome::Declined(requirement);
                }

                let receipt = match self.client.complete_pending(&key).await {
                    Ok(receipt) => receipt,
                    Err(err) => return PurchaseOutcome::Failure(err),
                };
                let seconds = requirement
                    .duration
                    .or(receipt.granted_seconds)
                    .unwrap_or(self.default_window);
                self.finish(&key, PaymentGrant::pending(&requirement), seconds)
            }
            RequestOutcome::Declined(requirement) => PurchaseOutcome::Declined(requirement),
            RequestOutcome::Failure(err) => PurchaseOutcome::Failure(err),
        }
    }

    /// Persist `grant` as a window of `seconds` from now and signal the masker
    pub fn open_window(
        &self,
        key: &ResourceKey,
        grant: PaymentGrant,
        seconds: u64,
    ) -> Result<AccessWindow> {
        let now = self.client.clock().now();
        let length = Duration::seconds(seconds.min(MAX_WINDOW_SECS) as i64);
        let grant = grant.time_boxed(now + length);
        self.client.store().put(key, grant.clone())?;

        let window = window(key, grant, now);
        info!(%key, expires_at = %window.expires_at, "access window opened");
        self.masker.window_opened(key, window.remaining);
        Ok(window)
    }

    fn finish(&self, key: &ResourceKey, grant: PaymentGrant, seconds: u64) -> PurchaseOutcome {
        match self.open_window(key, grant, seconds) {
            Ok(window) => PurchaseOutcome::Opened(window),
            Err(err) => PurchaseOutcome::Failure(err),
        }
    }
}

fn window(key: &ResourceKey, grant: PaymentGrant, now: DateTime<Utc>) -> AccessWindow {
    let expires_at = grant.expires_at.unwrap_or(now);
    AccessWindow {
        key: key.clone(),
        expires_at,
        remaining: expires_at - now,
    }
}

/// Grant recorded when the backend reports the page as already paid
fn already_paid_grant(data: &Value) -> PaymentGrant {
    PaymentGrant {
        payment_id: data
            .get("payment_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        amount_usd: Default::default(),
        amount_satoshis: 0,
        status: GrantStatus::Completed,
        expires_at: None,
    }
}
