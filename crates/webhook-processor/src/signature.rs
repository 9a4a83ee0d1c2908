use crate::error::WebhookError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_WINDOW_SECS: i64 = 5 * 60;

/// Verifies `X-Provider-Signature: t=<unix_seconds>,v0=<hex_hmac>` against
/// `HMAC-SHA256("<timestamp>.<raw_body>")` (spec §4.5 point 1, §6). Rejects a
/// malformed header, a timestamp outside the ±5 minute window, or a
/// signature mismatch — the comparison itself runs in constant time.
///
/// # Errors
/// Returns [`WebhookError::MalformedSignatureHeader`],
/// [`WebhookError::TimestampOutOfWindow`], or
/// [`WebhookError::InvalidSignature`] as appropriate.
pub fn verify(secret: &str, header_value: &str, raw_body: &[u8], now_unix_secs: i64) -> Result<(), WebhookError> {
	let (timestamp, signature_hex) = parse_header(header_value)?;

	if (now_unix_secs - timestamp).abs() > SIGNATURE_WINDOW_SECS {
		return Err(WebhookError::TimestampOutOfWindow);
	}

	let expected_signature = hex::decode(signature_hex).map_err(|_| WebhookError::MalformedSignatureHeader)?;

	let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::MalformedSignatureHeader)?;
	mac.update(timestamp.to_string().as_bytes());
	mac.update(b".");
	mac.update(raw_body);

	let computed = mac.finalize().into_bytes();
	if computed.as_slice().ct_eq(&expected_signature).into() {
		Ok(())
	} else {
		Err(WebhookError::InvalidSignature)
	}
}

fn parse_header(header_value: &str) -> Result<(i64, &str), WebhookError> {
	let mut timestamp = None;
	let mut signature = None;

	for part in header_value.split(',') {
		let (key, value) = part.split_once('=').ok_or(WebhookError::MalformedSignatureHeader)?;
		match key.trim() {
			"t" => timestamp = value.trim().parse::<i64>().ok(),
			"v0" => signature = Some(value.trim()),
			_ => {}
		}
	}

	match (timestamp, signature) {
		(Some(t), Some(v)) => Ok((t, v)),
		_ => Err(WebhookError::MalformedSignatureHeader),
	}
}
