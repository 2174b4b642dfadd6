//! The closed value grammar carried as call arguments, call results, and
//! publish payloads.
//!
//! A portable reimplementation can't ride on a language-native reflection
//! mechanism to transport arbitrary runtime types, so the wire only ever
//! carries a fixed grammar: primitive, string, nullable, sequence, and
//! tagged structure. `serde_json::Value` already models exactly that closed
//! set (null, bool, number, string, array, object) and every envelope
//! payload that isn't raw opaque bytes is one, encoded with
//! `serde_json::to_vec` / `serde_json::from_slice`.
pub type Value = serde_json::Value;

/// Encode a value into the bytes that go in an envelope's `payload` field.
pub fn encode(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// Decode an envelope payload back into a value.
pub fn decode(bytes: &[u8]) -> Result<Value, serde_json::Error> {
    serde_json::from_slice(bytes)
}
