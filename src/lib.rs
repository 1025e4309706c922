//! # payg - pay-as-you-go access over HTTP 402
//!
//! A client for resources guarded by `402 Payment Required`. It tracks one
//! payment grant per resource, surfaces payment requirements, completes
//! payments through a gateway and retries the original request once. Page-level
//! purchases become time-boxed access windows that persist across restarts.

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod persist;
pub mod store;
pub mod types;
pub mod window;

// Re-exports for convenience
pub use client::PaygClient;
pub use config::ClientConfig;
pub use error::{PaygError, Result};
pub use gateway::{CompletionRoute, HttpPaymentGateway, PaymentGateway};
pub use persist::FileGrantStore;
pub use store::{GrantStore, MemoryGrantStore};
pub use types::*;
pub use window::{AccessWindowManager, ContentMasker, PurchaseOutcome, WindowState};

/// Current version of the payg library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Header carrying the payment id on retried requests (`X-Payment-ID`)
pub const PAYMENT_ID_HEADER: &str = "x-payment-id";

/// Join a backend-relative path onto a base URL
pub(crate) fn endpoint_url(base: &url::Url, path: &str) -> Result<url::Url> {
    Ok(base.join(path.trim_start_matches('/'))?)
}
