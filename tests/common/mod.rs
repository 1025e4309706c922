//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use payg::{CompletionReceipt, PaygError, PaymentCompletion, PaymentGateway};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Gateway fake that records calls and answers with a fixed result
#[derive(Debug)]
pub struct CountingGateway {
    calls: AtomicUsize,
    succeed: bool,
}

impl CountingGateway {
    pub fn succeeding() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            succeed: true,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            succeed: false,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for CountingGateway {
    async fn complete(&self, payment_id: &str) -> PaymentCompletion {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            PaymentCompletion::Completed(CompletionReceipt::from_body(
                payment_id,
                json!({"payment_id": payment_id}),
            ))
        } else {
            PaymentCompletion::Failed(PaygError::payment_failed(payment_id, "insufficient funds"))
        }
    }
}

/// 402 body as returned by the API proxy
pub fn payment_required_body(payment_id: &str, amount_usd: f64) -> String {
    json!({
        "error": "Payment Required",
        "payment_id": payment_id,
        "api_name": "ml-inference",
        "endpoint": "predict",
        "amount_usd": amount_usd,
        "amount_satoshis": (amount_usd * 100000.0) as u64,
        "message": "Payment required to access ml-inference API"
    })
    .to_string()
}

/// Successful proxied API response
pub fn api_response_body(api_name: &str, response: Value) -> String {
    json!({
        "api_name": api_name,
        "cost": 0.01,
        "response": response,
        "call_id": "call-1"
    })
    .to_string()
}
