//! Example client walking the pay-as-you-go flow against a local backend
//!
//! Run with `PAYG_BASE_URL=http://localhost:5000/api cargo run --example client`.

use payg::{ClientConfig, PaygClient, RequestOutcome, RequestSpec, ResourceKey};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("payg=info")))
        .init();

    let config = ClientConfig::from_env()?;
    let client = PaygClient::new(&config)?;

    println!("Listing available APIs...");
    let catalog = client.available_apis().await?;
    for (name, listing) in &catalog.apis {
        let price = if listing.free {
            "free".to_string()
        } else {
            format!("${} per call", listing.cost_per_call)
        };
        println!("  {name}: {price}");
    }

    println!("\nCalling the free weather API...");
    let weather = client
        .request(
            &ResourceKey::api("weather", "current"),
            &RequestSpec::api("weather", "current").query("q", "London"),
        )
        .await;
    report(&weather);

    println!("\nCalling the paid ML inference API...");
    let key = ResourceKey::api("ml-inference", "predict");
    match client.call_api("ml-inference", "predict").await {
        RequestOutcome::PaymentRequired(requirement) => {
            println!(
                "Payment of ${} required (payment id {})",
                requirement.amount_usd, requirement.payment_id
            );
            let receipt = client.complete_payment(&key).await?;
            println!("Payment {} completed, retrying...", receipt.payment_id);
            report(&client.call_api("ml-inference", "predict").await);
        }
        other => report(&other),
    }

    println!("\nCalling with automatic payment...");
    client.clear_payments()?;
    let outcome = client
        .call_api_with_payment("ml-inference", "predict", |requirement| async move {
            println!("Approving ${} payment", requirement.amount_usd);
            true
        })
        .await;
    report(&outcome);

    Ok(())
}

fn report(outcome: &RequestOutcome) {
    match outcome {
        RequestOutcome::Success { status, data } => println!("{status}: {data:#}"),
        RequestOutcome::PaymentRequired(req) => println!("Payment required: {}", req.payment_id),
        RequestOutcome::Declined(req) => println!("Declined payment {}", req.payment_id),
        RequestOutcome::Failure(err) => println!("Failed: {err}"),
    }
}
