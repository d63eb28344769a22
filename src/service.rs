//! Lifecycle state machine for contracts, usages and settlements.
//!
//! Every transition is a read-modify-write: load the row, verify state and
//! policy, call the ledger if the transition anchors anything, and only then
//! commit through the store's compare-and-swap. A failed adapter call leaves
//! the local document untouched.

use crate::document::{
    BlockchainRef, Contract, DocumentKind, DocumentState, Header, HistoryAction, HistoryEntry,
    Settlement, SettlementBody, Usage, UsageTag, materialize_slots,
};
use crate::error::{EngineError, EngineResult, messages};
use crate::ledger::LedgerAdapter;
use crate::store::DocumentStore;
use crate::utils;
use crate::wire::Envelope;
use serde_json::Value;
use sled::IVec;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Update request for a contract. The declared `state` is carried for wire
/// compatibility but deliberately ignored: only the stored state gates a
/// contract update. Usage updates validate it instead (see [`UsageUpdate`]).
#[derive(Debug, Clone)]
pub struct ContractUpdate {
    pub state: DocumentState,
    pub header: Header,
    pub body: Value,
}

/// Update request for a usage. Unlike contracts, the declared `state` is
/// validated: anything but DRAFT is refused even when the stored document is
/// still a draft.
#[derive(Debug, Clone)]
pub struct UsageUpdate {
    pub state: DocumentState,
    pub body: Value,
}

pub struct DocumentService {
    pub(crate) store: DocumentStore,
    pub(crate) ledger: Arc<dyn LedgerAdapter>,
    pub(crate) own_msp: String,
}

impl DocumentService {
    pub fn new(store: DocumentStore, ledger: Arc<dyn LedgerAdapter>, own_msp: String) -> Self {
        Self {
            store,
            ledger,
            own_msp,
        }
    }

    pub fn own_msp(&self) -> &str {
        &self.own_msp
    }

    fn load_raw<T: serde::de::DeserializeOwned>(
        &self,
        kind: DocumentKind,
        id: &str,
    ) -> EngineResult<(T, IVec)> {
        let raw = self.store.get_raw(kind, id)?.ok_or(EngineError::NotFound)?;
        let doc = serde_json::from_slice(&raw)?;
        Ok((doc, raw))
    }

    fn anchor(&self, envelope: &Envelope) -> EngineResult<(String, BlockchainRef)> {
        let (reference_id, bytes) = envelope.finalise()?;
        let receipt = self
            .ledger
            .send_private_document(&bytes)
            .inspect_err(|e| warn!(error = %e, "ledger sendPrivateDocument failed"))?;
        if receipt.reference_id != reference_id {
            warn!(
                local = %reference_id,
                adapter = %receipt.reference_id,
                "adapter disagreed on reference id, keeping local derivation"
            );
        }
        Ok((
            reference_id,
            BlockchainRef::hlf(receipt.tx_id, receipt.timestamp),
        ))
    }

    // ------------------------------------------------------------------
    // Contracts
    // ------------------------------------------------------------------

    pub fn create_contract(&self, header: Header, body: Value) -> EngineResult<Contract> {
        header.validate()?;
        let id = utils::mint("ctr")?;
        let contract = Contract::new(id, header, body);
        self.store
            .create(DocumentKind::Contract, &contract.id, &contract)?;
        info!(contract_id = %contract.id, "contract created");
        Ok(contract)
    }

    pub fn get_contract(&self, id: &str) -> EngineResult<Contract> {
        self.store
            .get(DocumentKind::Contract, id)?
            .ok_or(EngineError::NotFound)
    }

    pub fn list_contracts(&self) -> EngineResult<Vec<Contract>> {
        self.store.query(DocumentKind::Contract, |_: &Contract| true)
    }

    /// Update a draft contract. Only the stored state gates this; the
    /// payload-declared state is ignored on purpose.
    pub fn update_contract(&self, id: &str, update: ContractUpdate) -> EngineResult<Contract> {
        let (mut contract, raw) = self.load_raw::<Contract>(DocumentKind::Contract, id)?;
        if contract.state != DocumentState::Draft {
            return Err(EngineError::TransitionNotAllowed(
                messages::CONTRACT_MODIFICATION_NOT_ALLOWED,
            ));
        }
        update.header.validate()?;
        contract.header = update.header;
        contract.body = update.body;
        contract.history.push(HistoryEntry::now(HistoryAction::Update));
        contract.touch();
        self.store
            .update_if(DocumentKind::Contract, id, &raw, &contract)?;
        debug!(contract_id = %id, "contract updated");
        Ok(contract)
    }

    /// DRAFT → SENT. Anchors the document on the ledger, then materializes
    /// one UNSIGNED slot per declared signatory.
    pub fn send_contract(&self, id: &str) -> EngineResult<Contract> {
        let (mut contract, raw) = self.load_raw::<Contract>(DocumentKind::Contract, id)?;
        if contract.state != DocumentState::Draft {
            return Err(EngineError::TransitionNotAllowed(
                messages::SEND_CONTRACT_NOT_ALLOWED,
            ));
        }

        let envelope = Envelope::new(
            DocumentKind::Contract,
            contract.header.from_msp.msp_id.clone(),
            contract.header.to_msp.msp_id.clone(),
            serde_json::to_vec(&contract)?,
        );
        let (reference_id, blockchain_ref) = self.anchor(&envelope)?;

        contract.state = DocumentState::Sent;
        contract.reference_id = Some(reference_id.clone());
        contract.blockchain_ref = Some(blockchain_ref);
        contract.signature_link =
            materialize_slots(&contract.header).map_err(|e| EngineError::Codec(e.to_string()))?;
        contract.history.push(HistoryEntry::now(HistoryAction::Sent));
        contract.touch();

        self.store
            .update_if(DocumentKind::Contract, id, &raw, &contract)?;
        self.store
            .index_reference(&reference_id, DocumentKind::Contract, id)?;
        info!(contract_id = %id, reference_id = %reference_id, "contract sent");
        Ok(contract)
    }

    /// Remove the local copy in any state; returns the last snapshot.
    /// Deletion never cascades to the counterparty's store.
    pub fn delete_contract(&self, id: &str) -> EngineResult<Contract> {
        let contract: Contract = self
            .store
            .delete(DocumentKind::Contract, id)?
            .ok_or(EngineError::NotFound)?;
        if let Some(reference) = &contract.reference_id {
            self.store.drop_reference(reference)?;
        }
        info!(contract_id = %id, "contract deleted");
        Ok(contract)
    }

    // ------------------------------------------------------------------
    // Usages
    // ------------------------------------------------------------------

    pub fn create_usage(&self, contract_id: &str, body: Value) -> EngineResult<Usage> {
        let contract = self.get_contract(contract_id)?;
        let id = utils::mint("usg")?;
        let receiver = contract.header.counterparty(&self.own_msp).to_string();
        let usage = Usage::new(
            id,
            contract_id.to_string(),
            self.own_msp.clone(),
            receiver,
            contract.reference_id.clone(),
            body,
        );
        self.store.create(DocumentKind::Usage, &usage.id, &usage)?;
        info!(usage_id = %usage.id, contract_id = %contract_id, "usage created");
        Ok(usage)
    }

    /// Read a usage with its tag recomputed: REJECTED sticks, APPROVED is
    /// derived from both parties' slot sets and never stored.
    pub fn get_usage(&self, id: &str) -> EngineResult<Usage> {
        let mut usage: Usage = self
            .store
            .get(DocumentKind::Usage, id)?
            .ok_or(EngineError::NotFound)?;
        let partner = self.find_partner_usage(&usage)?;
        usage.tag = usage.derived_tag(partner.as_ref());
        Ok(usage)
    }

    pub fn list_usages(&self, contract_id: &str) -> EngineResult<Vec<Usage>> {
        self.store
            .query(DocumentKind::Usage, |u: &Usage| u.contract_id == contract_id)
    }

    fn find_partner_usage(&self, usage: &Usage) -> EngineResult<Option<Usage>> {
        if let Some(partner_id) = &usage.partner_usage_id {
            return self.store.get(DocumentKind::Usage, partner_id);
        }
        let mut candidates = self.store.query(DocumentKind::Usage, |u: &Usage| {
            u.contract_id == usage.contract_id && u.msp_owner != usage.msp_owner
        })?;
        Ok(candidates.pop())
    }

    /// Update a draft usage. Both the stored state and the request's declared
    /// state must be DRAFT.
    pub fn update_usage(&self, id: &str, update: UsageUpdate) -> EngineResult<Usage> {
        if update.state != DocumentState::Draft {
            return Err(EngineError::TransitionNotAllowed(
                messages::USAGE_MODIFICATION_NOT_ALLOWED,
            ));
        }
        let (mut usage, raw) = self.load_raw::<Usage>(DocumentKind::Usage, id)?;
        if usage.state != DocumentState::Draft {
            return Err(EngineError::TransitionNotAllowed(
                messages::USAGE_MODIFICATION_NOT_ALLOWED,
            ));
        }
        usage.body = update.body;
        usage.history.push(HistoryEntry::now(HistoryAction::Update));
        usage.touch();
        self.store.update_if(DocumentKind::Usage, id, &raw, &usage)?;
        debug!(usage_id = %id, "usage updated");
        Ok(usage)
    }

    /// DRAFT → SENT. Slots are declared on the governing contract's header.
    pub fn send_usage(&self, id: &str) -> EngineResult<Usage> {
        let (mut usage, raw) = self.load_raw::<Usage>(DocumentKind::Usage, id)?;
        if usage.state != DocumentState::Draft {
            return Err(EngineError::TransitionNotAllowed(
                messages::PUT_USAGE_NOT_ALLOWED,
            ));
        }
        let contract = self.get_contract(&usage.contract_id)?;

        let envelope = Envelope::new(
            DocumentKind::Usage,
            usage.msp_owner.clone(),
            usage.msp_receiver.clone(),
            serde_json::to_vec(&usage)?,
        );
        let (reference_id, blockchain_ref) = self.anchor(&envelope)?;

        usage.state = DocumentState::Sent;
        usage.reference_id = Some(reference_id.clone());
        usage.contract_reference_id = usage
            .contract_reference_id
            .take()
            .or_else(|| contract.reference_id.clone());
        usage.blockchain_ref = Some(blockchain_ref);
        usage.signature_link =
            materialize_slots(&contract.header).map_err(|e| EngineError::Codec(e.to_string()))?;
        usage.history.push(HistoryEntry::now(HistoryAction::Sent));
        usage.touch();

        self.store.update_if(DocumentKind::Usage, id, &raw, &usage)?;
        self.store
            .index_reference(&reference_id, DocumentKind::Usage, id)?;
        info!(usage_id = %id, reference_id = %reference_id, "usage sent");
        Ok(usage)
    }

    /// Reject a usage in any state: the tag flips to REJECTED, the updated
    /// document is re-anchored for the counterparty to observe, the state is
    /// left unchanged.
    pub fn reject_usage(&self, id: &str) -> EngineResult<Usage> {
        let (mut usage, raw) = self.load_raw::<Usage>(DocumentKind::Usage, id)?;
        usage.tag = Some(UsageTag::Rejected);
        usage
            .history
            .push(HistoryEntry::now(HistoryAction::Rejected));
        usage.touch();

        let envelope = Envelope::new(
            DocumentKind::Usage,
            usage.msp_owner.clone(),
            usage.msp_receiver.clone(),
            serde_json::to_vec(&usage)?,
        );
        let (reference_id, blockchain_ref) = self.anchor(&envelope)?;
        // Rejection anchors a fresh transaction; the first send's reference
        // stays the document's identity when one exists.
        usage.blockchain_ref = Some(blockchain_ref);
        let first_anchor = usage.reference_id.is_none();
        if first_anchor {
            usage.reference_id = Some(reference_id.clone());
        }

        self.store.update_if(DocumentKind::Usage, id, &raw, &usage)?;
        if first_anchor {
            self.store
                .index_reference(&reference_id, DocumentKind::Usage, id)?;
        }
        info!(usage_id = %id, "usage rejected");
        Ok(usage)
    }

    pub fn delete_usage(&self, id: &str) -> EngineResult<Usage> {
        let usage: Usage = self
            .store
            .delete(DocumentKind::Usage, id)?
            .ok_or(EngineError::NotFound)?;
        if let Some(reference) = &usage.reference_id {
            self.store.drop_reference(reference)?;
        }
        info!(usage_id = %id, "usage deleted");
        Ok(usage)
    }

    // ------------------------------------------------------------------
    // Settlements
    // ------------------------------------------------------------------

    pub fn create_settlement(
        &self,
        contract_id: &str,
        body: SettlementBody,
    ) -> EngineResult<Settlement> {
        let contract = self.get_contract(contract_id)?;
        let id = utils::mint("stl")?;
        let receiver = contract.header.counterparty(&self.own_msp).to_string();
        let settlement = Settlement::new(
            id,
            contract_id.to_string(),
            self.own_msp.clone(),
            receiver,
            contract.reference_id.clone(),
            body,
        );
        self.store
            .create(DocumentKind::Settlement, &settlement.id, &settlement)?;
        info!(settlement_id = %settlement.id, contract_id = %contract_id, "settlement created");
        Ok(settlement)
    }

    pub fn get_settlement(&self, id: &str) -> EngineResult<Settlement> {
        self.store
            .get(DocumentKind::Settlement, id)?
            .ok_or(EngineError::NotFound)
    }

    pub fn list_settlements(&self, contract_id: &str) -> EngineResult<Vec<Settlement>> {
        self.store.query(DocumentKind::Settlement, |s: &Settlement| {
            s.contract_id == contract_id
        })
    }

    /// Update a draft settlement. Only the stored state gates this.
    pub fn update_settlement(&self, id: &str, body: SettlementBody) -> EngineResult<Settlement> {
        let (mut settlement, raw) = self.load_raw::<Settlement>(DocumentKind::Settlement, id)?;
        if settlement.state != DocumentState::Draft {
            return Err(EngineError::TransitionNotAllowed(
                messages::SETTLEMENT_MODIFICATION_NOT_ALLOWED,
            ));
        }
        settlement.body = body;
        settlement
            .history
            .push(HistoryEntry::now(HistoryAction::Update));
        settlement.touch();
        self.store
            .update_if(DocumentKind::Settlement, id, &raw, &settlement)?;
        debug!(settlement_id = %id, "settlement updated");
        Ok(settlement)
    }

    /// DRAFT → SENT, owner only.
    pub fn send_settlement(&self, id: &str) -> EngineResult<Settlement> {
        let (mut settlement, raw) = self.load_raw::<Settlement>(DocumentKind::Settlement, id)?;
        if settlement.state != DocumentState::Draft || settlement.msp_owner != self.own_msp {
            return Err(EngineError::TransitionNotAllowed(
                messages::SEND_SETTLEMENT_NOT_ALLOWED,
            ));
        }

        let envelope = Envelope::new(
            DocumentKind::Settlement,
            settlement.msp_owner.clone(),
            settlement.msp_receiver.clone(),
            serde_json::to_vec(&settlement)?,
        );
        let (reference_id, blockchain_ref) = self.anchor(&envelope)?;

        settlement.state = DocumentState::Sent;
        settlement.reference_id = Some(reference_id.clone());
        settlement.blockchain_ref = Some(blockchain_ref);
        settlement
            .history
            .push(HistoryEntry::now(HistoryAction::Sent));
        settlement.touch();

        self.store
            .update_if(DocumentKind::Settlement, id, &raw, &settlement)?;
        self.store
            .index_reference(&reference_id, DocumentKind::Settlement, id)?;
        info!(settlement_id = %id, reference_id = %reference_id, "settlement sent");
        Ok(settlement)
    }

    pub fn delete_settlement(&self, id: &str) -> EngineResult<Settlement> {
        let settlement: Settlement = self
            .store
            .delete(DocumentKind::Settlement, id)?
            .ok_or(EngineError::NotFound)?;
        if let Some(reference) = &settlement.reference_id {
            self.store.drop_reference(reference)?;
        }
        info!(settlement_id = %id, "settlement deleted");
        Ok(settlement)
    }
}
