//! Opaque pagination cursor.
//!
//! Encodes the `(last_time_ns, last_id)` continuation point of a timeline
//! range. Callers treat it as an opaque token.

use base64::Engine;

const ENGINE: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;

pub fn encode_cursor(time_ns: i64, id: &str) -> String {
    ENGINE.encode(format!("{time_ns}:{id}"))
}

pub fn decode_cursor(token: &str) -> Option<(i64, String)> {
    let raw = ENGINE.decode(token).ok()?;
    let text = String::from_utf8(raw).ok()?;
    let (time, id) = text.split_once(':')?;
    Some((time.parse().ok()?, id.to_string()))
}
