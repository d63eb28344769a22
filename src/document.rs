//! Core document model: contracts, usages, settlements and signature slots.
//!
//! State that can be derived is never stored: a signature slot is SIGNED iff
//! it carries a `txId`, and a usage's APPROVED tag is recomputed on read from
//! both parties' slot sets.

use crate::error::{EngineError, EngineResult};
use crate::utils;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentState {
    Draft,
    Sent,
    Received,
    Signed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UsageTag {
    Approved,
    Rejected,
}

/// Document kind, also the sled tree a document lives in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, minicbor::Encode, minicbor::Decode,
)]
#[serde(rename_all = "lowercase")]
#[cbor(index_only)]
pub enum DocumentKind {
    #[n(0)]
    Contract,
    #[n(1)]
    Usage,
    #[n(2)]
    Settlement,
}

impl DocumentKind {
    pub fn tree_name(&self) -> &'static str {
        match self {
            DocumentKind::Contract => "contracts",
            DocumentKind::Usage => "usages",
            DocumentKind::Settlement => "settlements",
        }
    }
}

/// Pointer to the ledger transaction that anchored a document or a signature.
/// Write-once per document, set at the SENT transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainRef {
    #[serde(rename = "type")]
    pub ref_type: String,
    pub tx_id: String,
    pub timestamp: String,
}

impl BlockchainRef {
    pub fn hlf(tx_id: String, timestamp: String) -> Self {
        Self {
            ref_type: "hlf".to_string(),
            tx_id,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryAction {
    Creation,
    Update,
    Sent,
    Received,
    Rejected,
    Signed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub action: HistoryAction,
    pub date: String,
}

impl HistoryEntry {
    pub fn now(action: HistoryAction) -> Self {
        Self {
            action,
            date: utils::tx_timestamp(),
        }
    }
}

/// One named signatory position declared in a document header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signatory {
    pub name: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MspParty {
    pub msp_id: String,
    #[serde(default)]
    pub signatures: Vec<Signatory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub name: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub version: String,
    pub from_msp: MspParty,
    pub to_msp: MspParty,
}

impl Header {
    pub fn validate(&self) -> EngineResult<()> {
        if self.name.is_empty() {
            return Err(EngineError::Validation("header.name is required".into()));
        }
        if self.version.is_empty() {
            return Err(EngineError::Validation("header.version is required".into()));
        }
        if self.from_msp.msp_id.is_empty() || self.to_msp.msp_id.is_empty() {
            return Err(EngineError::Validation(
                "header.fromMsp.mspId and header.toMsp.mspId are required".into(),
            ));
        }
        if self.from_msp.msp_id == self.to_msp.msp_id {
            return Err(EngineError::Validation(
                "header.fromMsp.mspId and header.toMsp.mspId must differ".into(),
            ));
        }
        Ok(())
    }

    /// The other party's MSP id relative to `own_msp`.
    pub fn counterparty(&self, own_msp: &str) -> &str {
        if self.from_msp.msp_id == own_msp {
            &self.to_msp.msp_id
        } else {
            &self.from_msp.msp_id
        }
    }

    /// Declared signatory at `(party, index)`, if any.
    pub fn signatory(&self, party: SlotParty, index: usize) -> Option<&Signatory> {
        match party {
            SlotParty::FromMsp => self.from_msp.signatures.get(index),
            SlotParty::ToMsp => self.to_msp.signatures.get(index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SlotParty {
    FromMsp,
    ToMsp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SlotState {
    Signed,
    Unsigned,
}

/// One position inside `signatureLink`. Keyed by its own id instead of the
/// array position so slots cannot drift when the set changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureSlot {
    pub id: String,
    pub msp: SlotParty,
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
}

impl SignatureSlot {
    /// Derived, never stored.
    pub fn state(&self) -> SlotState {
        if self.tx_id.is_some() {
            SlotState::Signed
        } else {
            SlotState::Unsigned
        }
    }
}

/// Materialize one UNSIGNED slot per declared signatory, ordered and indexed
/// by `(msp, index)`.
pub fn materialize_slots(header: &Header) -> anyhow::Result<Vec<SignatureSlot>> {
    let mut slots = Vec::new();
    for (party, declared) in [
        (SlotParty::FromMsp, &header.from_msp.signatures),
        (SlotParty::ToMsp, &header.to_msp.signatures),
    ] {
        for index in 0..declared.len() {
            slots.push(SignatureSlot {
                id: utils::new_uuid_to_bech32("sig")?,
                msp: party,
                index,
                tx_id: None,
            });
        }
    }
    Ok(slots)
}

fn all_signed(slots: &[SignatureSlot]) -> bool {
    !slots.is_empty() && slots.iter().all(|s| s.tx_id.is_some())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: String,
    pub state: DocumentState,
    pub header: Header,
    pub body: Value,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockchain_ref: Option<BlockchainRef>,
    #[serde(default)]
    pub signature_link: Vec<SignatureSlot>,
    pub creation_date: String,
    pub last_modification_date: String,
}

impl Contract {
    pub fn new(id: String, header: Header, body: Value) -> Self {
        let now = utils::tx_timestamp();
        Self {
            id,
            state: DocumentState::Draft,
            header,
            body,
            history: vec![HistoryEntry::now(HistoryAction::Creation)],
            reference_id: None,
            blockchain_ref: None,
            signature_link: Vec::new(),
            creation_date: now.clone(),
            last_modification_date: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_modification_date = utils::tx_timestamp();
    }

    pub fn slot(&self, signature_id: &str) -> Option<&SignatureSlot> {
        self.signature_link.iter().find(|s| s.id == signature_id)
    }

    pub fn slot_mut(&mut self, signature_id: &str) -> Option<&mut SignatureSlot> {
        self.signature_link
            .iter_mut()
            .find(|s| s.id == signature_id)
    }

    pub fn slot_at_mut(&mut self, party: SlotParty, index: usize) -> Option<&mut SignatureSlot> {
        self.signature_link
            .iter_mut()
            .find(|s| s.msp == party && s.index == index)
    }

    pub fn fully_signed(&self) -> bool {
        all_signed(&self.signature_link)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub id: String,
    pub contract_id: String,
    pub msp_owner: String,
    pub msp_receiver: String,
    pub state: DocumentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<UsageTag>,
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockchain_ref: Option<BlockchainRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_usage_id: Option<String>,
    #[serde(default)]
    pub signature_link: Vec<SignatureSlot>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub creation_date: String,
    pub last_modification_date: String,
}

impl Usage {
    pub fn new(
        id: String,
        contract_id: String,
        msp_owner: String,
        msp_receiver: String,
        contract_reference_id: Option<String>,
        body: Value,
    ) -> Self {
        let now = utils::tx_timestamp();
        Self {
            id,
            contract_id,
            msp_owner,
            msp_receiver,
            state: DocumentState::Draft,
            tag: None,
            body,
            reference_id: None,
            contract_reference_id,
            blockchain_ref: None,
            partner_usage_id: None,
            signature_link: Vec::new(),
            history: vec![HistoryEntry::now(HistoryAction::Creation)],
            creation_date: now.clone(),
            last_modification_date: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_modification_date = utils::tx_timestamp();
    }

    pub fn slot(&self, signature_id: &str) -> Option<&SignatureSlot> {
        self.signature_link.iter().find(|s| s.id == signature_id)
    }

    pub fn slot_mut(&mut self, signature_id: &str) -> Option<&mut SignatureSlot> {
        self.signature_link
            .iter_mut()
            .find(|s| s.id == signature_id)
    }

    pub fn slot_at_mut(&mut self, party: SlotParty, index: usize) -> Option<&mut SignatureSlot> {
        self.signature_link
            .iter_mut()
            .find(|s| s.msp == party && s.index == index)
    }

    pub fn fully_signed(&self) -> bool {
        all_signed(&self.signature_link)
    }

    /// Derived tag, recomputed on read. A stored REJECTED sticks; APPROVED
    /// requires both parties' corresponding usages to be fully signed.
    pub fn derived_tag(&self, partner: Option<&Usage>) -> Option<UsageTag> {
        if self.tag == Some(UsageTag::Rejected) {
            return Some(UsageTag::Rejected);
        }
        match partner {
            Some(p) if self.fully_signed() && p.fully_signed() => Some(UsageTag::Approved),
            _ => self.tag,
        }
    }
}

/// Per-direction traffic figures inside a settlement's `generatedResult`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MocFigures {
    #[serde(default)]
    pub back_home: f64,
    #[serde(default)]
    pub local: f64,
    #[serde(default)]
    pub international: f64,
    #[serde(default)]
    pub premium: f64,
    #[serde(default)]
    pub satellite: f64,
    #[serde(default)]
    pub video_telephony: f64,
    #[serde(default)]
    pub special_destinations: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceFigures {
    #[serde(default)]
    pub moc: MocFigures,
    #[serde(default)]
    pub mtc: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct SmsFigures {
    #[serde(default)]
    pub mo: f64,
    #[serde(default)]
    pub mt: f64,
}

/// Named data service (GPRS, VoLTE, NB-IOT, ...), values in MB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFigure {
    pub name: String,
    #[serde(default)]
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessFigures {
    #[serde(default)]
    pub network_access: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionFigures {
    #[serde(default)]
    pub voice: VoiceFigures,
    #[serde(default)]
    pub sms: SmsFigures,
    #[serde(default)]
    pub data: Vec<DataFigure>,
    #[serde(default)]
    pub access: AccessFigures,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedResult {
    #[serde(default)]
    pub inbound: DirectionFigures,
    #[serde(default)]
    pub outbound: DirectionFigures,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_result: Option<GeneratedResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub id: String,
    pub contract_id: String,
    pub msp_owner: String,
    pub msp_receiver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_reference_id: Option<String>,
    pub state: DocumentState,
    pub body: SettlementBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockchain_ref: Option<BlockchainRef>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub creation_date: String,
    pub last_modification_date: String,
}

impl Settlement {
    pub fn new(
        id: String,
        contract_id: String,
        msp_owner: String,
        msp_receiver: String,
        contract_reference_id: Option<String>,
        body: SettlementBody,
    ) -> Self {
        let now = utils::tx_timestamp();
        Self {
            id,
            contract_id,
            msp_owner,
            msp_receiver,
            contract_reference_id,
            state: DocumentState::Draft,
            body,
            reference_id: None,
            blockchain_ref: None,
            history: vec![HistoryEntry::now(HistoryAction::Creation)],
            creation_date: now.clone(),
            last_modification_date: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_modification_date = utils::tx_timestamp();
    }
}
