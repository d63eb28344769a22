//! Ledger adapter boundary.
//!
//! The engine never talks to the blockchain network directly; everything goes
//! through [`LedgerAdapter`]. Calls are blocking and failures never mutate
//! local state. Signature blobs are opaque here: whether they verify is the
//! adapter's problem, the engine only anchors them to transactions.

use crate::document::SlotParty;
use crate::error::{EngineError, EngineResult};
use crate::utils;
use crate::wire::Envelope;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid7::uuid7;

pub const EVENT_PAYLOADLINK: &str = "STORE:PAYLOADLINK";
pub const EVENT_SIGNATURE: &str = "STORE:SIGNATURE";

/// Result of anchoring a private document on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_id: String,
    pub timestamp: String,
    pub reference_id: String,
}

/// Off-ledger signature payload, anchored on-ledger by its transaction id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignaturePayload {
    pub msp: SlotParty,
    pub index: usize,
    pub algorithm: String,
    pub certificate: String,
    pub signature: String,
}

/// Webhook events the adapter delivers to the reception pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    /// `STORE:PAYLOADLINK`: a private document reference landed on-ledger.
    PayloadLink { reference_id: String },
    /// `STORE:SIGNATURE`: a counterparty filled the `(msp, index)` slot.
    Signature {
        reference_id: String,
        msp: SlotParty,
        index: usize,
        tx_id: String,
    },
}

pub trait LedgerAdapter: Send + Sync {
    fn send_private_document(&self, payload: &[u8]) -> EngineResult<TxReceipt>;
    fn get_private_document(&self, reference_id: &str) -> EngineResult<Vec<u8>>;
    fn put_signature(&self, reference_id: &str, payload: &SignaturePayload)
    -> EngineResult<String>;
    fn get_signature(&self, reference_id: &str, tx_id: &str) -> EngineResult<SignaturePayload>;
    fn subscribe_webhook(&self, event_name: &str, callback_url: &str) -> EngineResult<String>;
}

#[derive(Default)]
struct LoopbackState {
    documents: HashMap<String, Vec<u8>>,
    signatures: HashMap<String, SignaturePayload>,
    subscriptions: Vec<(String, String)>,
    events: Vec<LedgerEvent>,
}

/// In-process adapter used by scenario tests and demos. Events are queued and
/// drained explicitly so tests stay synchronous and deterministic.
#[derive(Default)]
pub struct LoopbackLedger {
    inner: Mutex<LoopbackState>,
}

impl LoopbackLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_tx_id() -> String {
        hex::encode(uuid7().as_bytes())
    }

    /// Take every event queued since the last drain, oldest first.
    pub fn drain_events(&self) -> Vec<LedgerEvent> {
        let mut inner = self.inner.lock().expect("loopback ledger lock poisoned");
        std::mem::take(&mut inner.events)
    }
}

impl LedgerAdapter for LoopbackLedger {
    fn send_private_document(&self, payload: &[u8]) -> EngineResult<TxReceipt> {
        // The adapter derives the same content-addressed reference the
        // parties compute locally.
        let envelope = Envelope::decode(payload)?;
        let reference_id = utils::reference_id(&envelope.from_msp, payload);

        let mut inner = self.inner.lock().expect("loopback ledger lock poisoned");
        inner.documents.insert(reference_id.clone(), payload.to_vec());
        inner.events.push(LedgerEvent::PayloadLink {
            reference_id: reference_id.clone(),
        });

        Ok(TxReceipt {
            tx_id: Self::next_tx_id(),
            timestamp: utils::tx_timestamp(),
            reference_id,
        })
    }

    fn get_private_document(&self, reference_id: &str) -> EngineResult<Vec<u8>> {
        let inner = self.inner.lock().expect("loopback ledger lock poisoned");
        inner
            .documents
            .get(reference_id)
            .cloned()
            .ok_or_else(|| {
                EngineError::Adapter(anyhow::anyhow!(
                    "no private document for reference {reference_id}"
                ))
            })
    }

    fn put_signature(
        &self,
        reference_id: &str,
        payload: &SignaturePayload,
    ) -> EngineResult<String> {
        let mut inner = self.inner.lock().expect("loopback ledger lock poisoned");
        if !inner.documents.contains_key(reference_id) {
            return Err(EngineError::Adapter(anyhow::anyhow!(
                "no anchored document for reference {reference_id}"
            )));
        }

        let tx_id = Self::next_tx_id();
        inner.signatures.insert(tx_id.clone(), payload.clone());
        inner.events.push(LedgerEvent::Signature {
            reference_id: reference_id.to_string(),
            msp: payload.msp,
            index: payload.index,
            tx_id: tx_id.clone(),
        });
        Ok(tx_id)
    }

    fn get_signature(&self, _reference_id: &str, tx_id: &str) -> EngineResult<SignaturePayload> {
        let inner = self.inner.lock().expect("loopback ledger lock poisoned");
        inner.signatures.get(tx_id).cloned().ok_or_else(|| {
            EngineError::Adapter(anyhow::anyhow!("no signature anchored under tx {tx_id}"))
        })
    }

    fn subscribe_webhook(&self, event_name: &str, callback_url: &str) -> EngineResult<String> {
        let mut inner = self.inner.lock().expect("loopback ledger lock poisoned");
        inner
            .subscriptions
            .push((event_name.to_string(), callback_url.to_string()));
        Ok(format!("sub-{}", inner.subscriptions.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentKind;

    #[test]
    fn loopback_anchors_and_replays_documents() {
        let ledger = LoopbackLedger::new();
        let envelope = Envelope::new(
            DocumentKind::Contract,
            "MSP-A".into(),
            "MSP-B".into(),
            b"{}".to_vec(),
        );
        let bytes = envelope.encode().unwrap();

        let receipt = ledger.send_private_document(&bytes).unwrap();
        assert_eq!(ledger.get_private_document(&receipt.reference_id).unwrap(), bytes);

        let events = ledger.drain_events();
        assert_eq!(
            events,
            vec![LedgerEvent::PayloadLink {
                reference_id: receipt.reference_id
            }]
        );
        assert!(ledger.drain_events().is_empty());
    }

    #[test]
    fn put_signature_requires_an_anchored_document() {
        let ledger = LoopbackLedger::new();
        let payload = SignaturePayload {
            msp: SlotParty::FromMsp,
            index: 0,
            algorithm: "ecdsa".into(),
            certificate: "cert".into(),
            signature: "sig".into(),
        };
        let err = ledger.put_signature("missing", &payload).unwrap_err();
        assert_eq!(err.internal_error_code(), 3000);
    }
}
