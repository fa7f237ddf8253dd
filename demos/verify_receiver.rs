use message_dispatcher::{
    compute_signature, verify_request, DEFAULT_SIGNATURE_HEADER, DEFAULT_TIMESTAMP_HEADER,
};

/// What a webhook receiver does with a request relayed by `HttpBackend`.
fn main() {
    let secret = b"supersecret";
    let payload = br#"{"id":"order-1","recipient":"ops@example.com","subject":"hi","body":"...","metadata":{}}"#;
    let timestamp = "1700000000";
    let signature = compute_signature(secret, payload, Some(timestamp));

    let headers = vec![
        (DEFAULT_SIGNATURE_HEADER, signature.as_str()),
        (DEFAULT_TIMESTAMP_HEADER, timestamp),
    ];

    let now_secs = 1_700_000_200;
    match verify_request(headers.iter().copied(), payload, secret, 300, now_secs) {
        Ok(()) => println!("signature ok"),
        Err(err) => println!("rejected: {err}"),
    }
}
