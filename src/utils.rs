//! Identity and reference utilities.

use bech32::Bech32m;
use chrono::{SecondsFormat, Utc};
use uuid7::uuid7;

// construct a unique document/slot id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Deterministic reference id shared by both parties.
///
/// The sender hashes the envelope it encoded; the receiver hashes the exact
/// bytes it fetched from the ledger, so both derive the same value without
/// coordination.
pub fn reference_id(owner_msp: &str, payload: &[u8]) -> String {
    let mut input = Vec::with_capacity(owner_msp.len() + 1 + payload.len());
    input.extend_from_slice(owner_msp.as_bytes());
    input.push(b':');
    input.extend_from_slice(payload);
    sha256::digest(&input)
}

/// Id mint with the engine's error type, for use inside lifecycle code.
pub(crate) fn mint(hrp: &str) -> crate::error::EngineResult<String> {
    new_uuid_to_bech32(hrp).map_err(|e| crate::error::EngineError::Codec(e.to_string()))
}

/// RFC 3339 timestamp for blockchain refs and history entries.
pub fn tx_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_id_is_deterministic() {
        let a = reference_id("MSP-A", b"payload");
        let b = reference_id("MSP-A", b"payload");
        assert_eq!(a, b);
        assert_ne!(a, reference_id("MSP-B", b"payload"));
        assert_ne!(a, reference_id("MSP-A", b"other"));
    }
}
