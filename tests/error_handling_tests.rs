//! Error handling tests for payg

use payg::PaygError;

#[test]
fn test_status_error() {
    let error = PaygError::status(404, "API not found");

    let error_msg = error.to_string();
    assert!(
        error_msg.contains("404"),
        "Error message MUST contain the status code - actual: {}",
        error_msg
    );
    assert!(
        error_msg.contains("API not found"),
        "Error message MUST contain the server's reason - actual: {}",
        error_msg
    );
    assert_eq!(error.http_status(), Some(404));
    assert!(!error.is_transport());
    assert!(!error.is_payment_failure());
}

#[test]
fn test_payment_failed_error() {
    let error = PaygError::payment_failed("pay_1", "Payment request not found");

    let error_msg = error.to_string();
    assert!(
        error_msg.contains("pay_1"),
        "Error message MUST name the payment - actual: {}",
        error_msg
    );
    assert!(error.is_payment_failure());
    assert_eq!(error.http_status(), None);
}

#[test]
fn test_malformed_response_is_transport() {
    let error = PaygError::malformed_response("Invalid payment requirement");

    assert!(error.is_transport());
    assert!(error.to_string().contains("Malformed response"));
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let error: PaygError = json_error.into();

    assert!(error.is_transport());
    assert!(error.to_string().starts_with("JSON error"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
    let error: PaygError = io_error.into();

    assert!(matches!(error, PaygError::Storage(_)));
    assert!(!error.is_transport());
}

#[test]
fn test_in_progress_and_config_errors() {
    let error = PaygError::PaymentInProgress {
        key: "ml-inference:predict".to_string(),
    };
    assert!(error.to_string().contains("ml-inference:predict"));

    let error = PaygError::config("Base URL cannot be empty");
    assert_eq!(
        error.to_string(),
        "Configuration error: Base URL cannot be empty"
    );
}

#[test]
fn test_url_error_conversion() {
    let parse_error = url::Url::parse("not a url").unwrap_err();
    let error: PaygError = parse_error.into();
    assert!(error.to_string().starts_with("URL error"));
}
