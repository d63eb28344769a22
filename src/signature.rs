//! Signature linker: maps signature ids to `(msp, index)` slots and enforces
//! who may fill them.
//!
//! Slot state is never stored. A slot is SIGNED iff it carries a `txId`; the
//! payload itself lives on the ledger and is only fetched on demand.

use crate::document::{
    Contract, DocumentKind, DocumentState, Header, HistoryAction, HistoryEntry, SignatureSlot,
    SlotParty, SlotState, Usage,
};
use crate::error::{EngineError, EngineResult, messages};
use crate::ledger::SignaturePayload;
use crate::service::DocumentService;
use serde::Serialize;
use sled::IVec;
use tracing::{info, warn};

/// Caller-supplied signature material. Opaque to the engine; verification is
/// the adapter's responsibility.
#[derive(Debug, Clone)]
pub struct SignatureInput {
    pub algorithm: String,
    pub certificate: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureAnchor {
    #[serde(rename = "type")]
    pub ref_type: String,
    pub tx_id: String,
}

/// Enriched slot view returned by put/get.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureView {
    pub signature_id: String,
    pub document_id: String,
    pub msp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blockchain_ref: Option<SignatureAnchor>,
    pub state: SlotState,
}

/// One row of `listSignatures`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureSummary {
    pub signature_id: String,
    pub document_id: String,
    pub msp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub state: SlotState,
}

/// Contract or usage loaded for signature work, plus the header declaring the
/// signatories (the usage's governing contract header).
enum SignableDoc {
    Contract(Contract),
    Usage { usage: Usage, header: Header },
}

impl SignableDoc {
    fn id(&self) -> &str {
        match self {
            SignableDoc::Contract(c) => &c.id,
            SignableDoc::Usage { usage, .. } => &usage.id,
        }
    }

    fn state(&self) -> DocumentState {
        match self {
            SignableDoc::Contract(c) => c.state,
            SignableDoc::Usage { usage, .. } => usage.state,
        }
    }

    fn reference_id(&self) -> Option<&str> {
        match self {
            SignableDoc::Contract(c) => c.reference_id.as_deref(),
            SignableDoc::Usage { usage, .. } => usage.reference_id.as_deref(),
        }
    }

    fn header(&self) -> &Header {
        match self {
            SignableDoc::Contract(c) => &c.header,
            SignableDoc::Usage { header, .. } => header,
        }
    }

    fn slots(&self) -> &[SignatureSlot] {
        match self {
            SignableDoc::Contract(c) => &c.signature_link,
            SignableDoc::Usage { usage, .. } => &usage.signature_link,
        }
    }

    fn slot(&self, signature_id: &str) -> Option<&SignatureSlot> {
        self.slots().iter().find(|s| s.id == signature_id)
    }

    fn slot_mut(&mut self, signature_id: &str) -> Option<&mut SignatureSlot> {
        match self {
            SignableDoc::Contract(c) => c.slot_mut(signature_id),
            SignableDoc::Usage { usage, .. } => usage.slot_mut(signature_id),
        }
    }
}

fn party_msp<'a>(header: &'a Header, party: SlotParty) -> &'a str {
    match party {
        SlotParty::FromMsp => &header.from_msp.msp_id,
        SlotParty::ToMsp => &header.to_msp.msp_id,
    }
}

fn readable(state: DocumentState) -> bool {
    matches!(
        state,
        DocumentState::Sent | DocumentState::Received | DocumentState::Signed
    )
}

impl DocumentService {
    fn load_signable(&self, kind: DocumentKind, id: &str) -> EngineResult<(SignableDoc, IVec)> {
        let raw = self.store.get_raw(kind, id)?.ok_or(EngineError::NotFound)?;
        let doc = match kind {
            DocumentKind::Contract => SignableDoc::Contract(serde_json::from_slice(&raw)?),
            DocumentKind::Usage => {
                let usage: Usage = serde_json::from_slice(&raw)?;
                let contract = self.get_contract(&usage.contract_id)?;
                SignableDoc::Usage {
                    usage,
                    header: contract.header,
                }
            }
            DocumentKind::Settlement => {
                return Err(EngineError::Validation(
                    "settlements carry no signature slots".into(),
                ));
            }
        };
        Ok((doc, raw))
    }

    fn commit_signable(&self, kind: DocumentKind, raw: &IVec, doc: &SignableDoc) -> EngineResult<()> {
        match doc {
            SignableDoc::Contract(c) => self.store.update_if(kind, &c.id, raw, c),
            SignableDoc::Usage { usage, .. } => self.store.update_if(kind, &usage.id, raw, usage),
        }
    }

    /// Fill a signature slot and anchor the payload on the ledger.
    pub fn put_signature(
        &self,
        kind: DocumentKind,
        id: &str,
        signature_id: &str,
        input: SignatureInput,
    ) -> EngineResult<SignatureView> {
        let (mut doc, raw) = self.load_signable(kind, id)?;
        if !matches!(doc.state(), DocumentState::Sent | DocumentState::Received) {
            return Err(EngineError::TransitionNotAllowed(
                messages::UPDATE_SIGNATURES_NOT_ALLOWED,
            ));
        }
        let slot = doc.slot(signature_id).ok_or(EngineError::SignatureNotFound)?;
        let (slot_party, slot_index) = (slot.msp, slot.index);

        // The local party may only fill its own declared slot(s).
        let slot_msp = party_msp(doc.header(), slot_party);
        if slot_msp != self.own_msp {
            return Err(EngineError::TransitionNotAllowed(
                if doc.state() == DocumentState::Received {
                    messages::RECEIVED_SIGNATURE_ON_TO_MSP_ONLY
                } else {
                    messages::SENT_SIGNATURE_ON_FROM_MSP_ONLY
                },
            ));
        }

        let reference_id = doc
            .reference_id()
            .ok_or(EngineError::TransitionNotAllowed(
                messages::UPDATE_SIGNATURES_NOT_ALLOWED,
            ))?
            .to_string();

        let payload = SignaturePayload {
            msp: slot_party,
            index: slot_index,
            algorithm: input.algorithm.clone(),
            certificate: input.certificate.clone(),
            signature: input.signature.clone(),
        };
        let tx_id = self
            .ledger
            .put_signature(&reference_id, &payload)
            .inspect_err(|e| warn!(error = %e, "ledger putSignature failed"))?;

        let slot = doc
            .slot_mut(signature_id)
            .ok_or(EngineError::SignatureNotFound)?;
        slot.tx_id = Some(tx_id.clone());
        if let SignableDoc::Contract(contract) = &mut doc {
            if contract.fully_signed() {
                contract.state = DocumentState::Signed;
                contract.history.push(HistoryEntry::now(HistoryAction::Signed));
            }
            contract.touch();
        } else if let SignableDoc::Usage { usage, .. } = &mut doc {
            usage.touch();
        }
        self.commit_signable(kind, &raw, &doc)?;
        info!(document_id = %id, signature_id, tx_id = %tx_id, "signature anchored");

        let signatory = doc.header().signatory(slot_party, slot_index);
        Ok(SignatureView {
            signature_id: signature_id.to_string(),
            document_id: doc.id().to_string(),
            msp: party_msp(doc.header(), slot_party).to_string(),
            name: signatory.map(|s| s.name.clone()),
            role: signatory.map(|s| s.role.clone()),
            algorithm: Some(input.algorithm),
            certificate: Some(input.certificate),
            signature: Some(input.signature),
            blockchain_ref: Some(SignatureAnchor {
                ref_type: "hlf".into(),
                tx_id,
            }),
            state: SlotState::Signed,
        })
    }

    /// Read one slot. UNSIGNED slots are answered locally without touching
    /// the adapter.
    pub fn get_signature(
        &self,
        kind: DocumentKind,
        id: &str,
        signature_id: &str,
    ) -> EngineResult<SignatureView> {
        let (doc, _raw) = self.load_signable(kind, id)?;
        if !readable(doc.state()) {
            return Err(EngineError::TransitionNotAllowed(
                messages::GET_SIGNATURES_NOT_ALLOWED,
            ));
        }
        let slot = doc.slot(signature_id).ok_or(EngineError::SignatureNotFound)?;
        let signatory = doc.header().signatory(slot.msp, slot.index);
        let msp = party_msp(doc.header(), slot.msp).to_string();

        let Some(tx_id) = &slot.tx_id else {
            return Ok(SignatureView {
                signature_id: signature_id.to_string(),
                document_id: doc.id().to_string(),
                msp,
                name: signatory.map(|s| s.name.clone()),
                role: None,
                algorithm: None,
                certificate: None,
                signature: None,
                blockchain_ref: None,
                state: SlotState::Unsigned,
            });
        };

        let reference_id = doc
            .reference_id()
            .ok_or(EngineError::TransitionNotAllowed(
                messages::GET_SIGNATURES_NOT_ALLOWED,
            ))?;
        let payload = self
            .ledger
            .get_signature(reference_id, tx_id)
            .inspect_err(|e| warn!(error = %e, "ledger getSignature failed"))?;

        Ok(SignatureView {
            signature_id: signature_id.to_string(),
            document_id: doc.id().to_string(),
            msp,
            name: signatory.map(|s| s.name.clone()),
            role: signatory.map(|s| s.role.clone()),
            algorithm: Some(payload.algorithm),
            certificate: Some(payload.certificate),
            signature: Some(payload.signature),
            blockchain_ref: Some(SignatureAnchor {
                ref_type: "hlf".into(),
                tx_id: tx_id.clone(),
            }),
            state: SlotState::Signed,
        })
    }

    /// Summarize every slot with its derived state.
    pub fn list_signatures(
        &self,
        kind: DocumentKind,
        id: &str,
    ) -> EngineResult<Vec<SignatureSummary>> {
        let (doc, _raw) = self.load_signable(kind, id)?;
        if !readable(doc.state()) {
            return Err(EngineError::TransitionNotAllowed(
                messages::GET_SIGNATURES_NOT_ALLOWED,
            ));
        }
        Ok(doc
            .slots()
            .iter()
            .map(|slot| SignatureSummary {
                signature_id: slot.id.clone(),
                document_id: doc.id().to_string(),
                msp: party_msp(doc.header(), slot.msp).to_string(),
                name: doc
                    .header()
                    .signatory(slot.msp, slot.index)
                    .map(|s| s.name.clone()),
                state: slot.state(),
            })
            .collect())
    }
}
