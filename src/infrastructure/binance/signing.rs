//! HMAC-SHA256 request signing for authenticated Binance-style REST calls (spec.md §4.2).
//!
//! Grounded on the teacher's `infrastructure/binance.rs::sign_request`: builds a Binance
//! query-string, HMACs it with the API secret, appends the resulting signature as the
//! `signature` query parameter.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn sign_query(api_secret: &str, query_string: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(api_secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(query_string.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn signed_query_string(api_secret: &str, params: &[(&str, String)]) -> String {
    let query_string: String = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let signature = sign_query(api_secret, &query_string);
    format!("{query_string}&signature={signature}")
}
