use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Dispatch-Signature";
pub const DEFAULT_TIMESTAMP_HEADER: &str = "X-Dispatch-Timestamp";

/// Header pairs to attach to an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaders {
    pub signature: (String, String),
    pub timestamp: Option<(String, String)>,
}

/// Sign `payload`, optionally binding it to `timestamp_secs`.
pub fn signature_headers(
    secret: &[u8],
    payload: &[u8],
    timestamp_secs: Option<u64>,
    signature_header: &str,
    timestamp_header: &str,
) -> SignatureHeaders {
    let timestamp = timestamp_secs.map(|secs| secs.to_string());
    let signature = compute_signature(secret, payload, timestamp.as_deref());

    SignatureHeaders {
        signature: (signature_header.to_string(), signature),
        timestamp: timestamp.map(|ts| (timestamp_header.to_string(), ts)),
    }
}

fn mac_over(secret: &[u8], payload: &[u8], timestamp: Option<&str>) -> Option<HmacSha256> {
    // HMAC takes keys of any length, so this only fails on a broken digest impl.
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    if let Some(ts) = timestamp {
        mac.update(ts.as_bytes());
    }
    mac.update(payload);
    Some(mac)
}

/// Hex-encoded HMAC-SHA256 over `timestamp || payload`.
pub fn compute_signature(secret: &[u8], payload: &[u8], timestamp: Option<&str>) -> String {
    match mac_over(secret, payload, timestamp) {
        Some(mac) => hex::encode(mac.finalize().into_bytes()),
        None => String::new(),
    }
}

/// Constant-time check of a received hex signature.
pub fn verify_signature(
    secret: &[u8],
    payload: &[u8],
    timestamp: Option<&str>,
    signature_hex: &str,
) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    match mac_over(secret, payload, timestamp) {
        Some(mac) => mac.verify_slice(&signature).is_ok(),
        None => false,
    }
}

/// Receivers should reject timestamps older than `max_age_secs` or from
/// the future.
pub fn is_timestamp_fresh(timestamp_secs: u64, now_secs: u64, max_age_secs: u64) -> bool {
    now_secs >= timestamp_secs && now_secs - timestamp_secs <= max_age_secs
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("signature header missing")]
    MissingSignature,
    #[error("timestamp header missing")]
    MissingTimestamp,
    #[error("timestamp is not a unix epoch second")]
    InvalidTimestamp,
    #[error("timestamp outside the accepted window")]
    StaleTimestamp,
    #[error("signature mismatch")]
    InvalidSignature,
}

/// Verify a relayed request from its headers in one call. Header names
/// are matched case-insensitively.
pub fn verify_request<'a, I>(
    headers: I,
    payload: &[u8],
    secret: &[u8],
    max_age_secs: u64,
    now_secs: u64,
) -> Result<(), VerificationError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut signature = None;
    let mut timestamp = None;
    for (name, value) in headers {
        if name.eq_ignore_ascii_case(DEFAULT_SIGNATURE_HEADER) {
            signature = Some(value);
        } else if name.eq_ignore_ascii_case(DEFAULT_TIMESTAMP_HEADER) {
            timestamp = Some(value);
        }
    }

    let signature = signature.ok_or(VerificationError::MissingSignature)?;
    let timestamp_str = timestamp.ok_or(VerificationError::MissingTimestamp)?;
    let timestamp = timestamp_str
        .parse::<u64>()
        .map_err(|_| VerificationError::InvalidTimestamp)?;

    if !is_timestamp_fresh(timestamp, now_secs, max_age_secs) {
        return Err(VerificationError::StaleTimestamp);
    }

    if verify_signature(secret, payload, Some(timestamp_str), signature) {
        Ok(())
    } else {
        Err(VerificationError::InvalidSignature)
    }
}
