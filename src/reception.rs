//! Reception pipeline: turns inbound ledger events into local RECEIVED
//! copies and remote signature anchorings.
//!
//! The adapter guarantees neither ordering nor at-most-once delivery, so
//! every handler is a match-and-skip: an already-materialized reference or an
//! already-filled slot makes the event a no-op.

use crate::document::{
    Contract, DocumentKind, DocumentState, HistoryAction, HistoryEntry, Settlement, SlotParty,
    Usage, UsageTag, materialize_slots,
};
use crate::error::{EngineError, EngineResult};
use crate::ledger::{EVENT_PAYLOADLINK, EVENT_SIGNATURE, LedgerAdapter, LedgerEvent};
use crate::store::DocumentStore;
use crate::utils;
use crate::wire::Envelope;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ReceptionPipeline {
    store: DocumentStore,
    ledger: Arc<dyn LedgerAdapter>,
    own_msp: String,
}

impl ReceptionPipeline {
    pub fn new(store: DocumentStore, ledger: Arc<dyn LedgerAdapter>, own_msp: String) -> Self {
        Self {
            store,
            ledger,
            own_msp,
        }
    }

    /// Register this node's callback for both event families with the
    /// adapter. Returns the subscription ids.
    pub fn subscribe(&self, callback_url: &str) -> EngineResult<Vec<String>> {
        Ok(vec![
            self.ledger.subscribe_webhook(EVENT_PAYLOADLINK, callback_url)?,
            self.ledger.subscribe_webhook(EVENT_SIGNATURE, callback_url)?,
        ])
    }

    /// Webhook intake. The HTTP layer decodes the event and calls this.
    pub fn handle_event(&self, event: LedgerEvent) -> EngineResult<()> {
        match event {
            LedgerEvent::PayloadLink { reference_id } => self.handle_payload_link(&reference_id),
            LedgerEvent::Signature {
                reference_id,
                msp,
                index,
                tx_id,
            } => self.handle_signature(&reference_id, msp, index, &tx_id),
        }
    }

    fn handle_payload_link(&self, reference_id: &str) -> EngineResult<()> {
        let bytes = self.ledger.get_private_document(reference_id)?;
        let (envelope, computed_ref) = Envelope::open(&bytes)?;
        if envelope.from_msp != self.own_msp && envelope.to_msp != self.own_msp {
            debug!(reference_id, "payload not addressed to this MSP, ignoring");
            return Ok(());
        }
        match envelope.kind {
            DocumentKind::Contract => self.receive_contract(&envelope, computed_ref),
            DocumentKind::Usage => self.receive_usage(&envelope, computed_ref),
            DocumentKind::Settlement => self.receive_settlement(&envelope, computed_ref),
        }
    }

    fn receive_contract(&self, envelope: &Envelope, computed_ref: String) -> EngineResult<()> {
        let wire: Contract = serde_json::from_slice(&envelope.document)?;
        let target_ref = wire.reference_id.clone().unwrap_or(computed_ref);
        if self.store.find_by_reference(&target_ref)?.is_some() {
            debug!(reference_id = %target_ref, "contract already materialized, skipping");
            return Ok(());
        }

        let mut local = wire;
        local.id = utils::mint("ctr")?;
        local.state = DocumentState::Received;
        local.reference_id = Some(target_ref.clone());
        local.signature_link =
            materialize_slots(&local.header).map_err(|e| EngineError::Codec(e.to_string()))?;
        local.history.push(HistoryEntry::now(HistoryAction::Received));
        local.touch();

        self.store
            .create(DocumentKind::Contract, &local.id, &local)?;
        self.store
            .index_reference(&target_ref, DocumentKind::Contract, &local.id)?;
        info!(contract_id = %local.id, reference_id = %target_ref, "contract received");
        self.adopt_orphans(&local)
    }

    /// Re-home documents that arrived before their governing contract: they
    /// still carry the owner's contract id and, for usages, no slots.
    fn adopt_orphans(&self, contract: &Contract) -> EngineResult<()> {
        let Some(contract_ref) = contract.reference_id.as_deref() else {
            return Ok(());
        };

        let orphaned_usages = self.store.query(DocumentKind::Usage, |u: &Usage| {
            u.state == DocumentState::Received
                && u.contract_id != contract.id
                && u.contract_reference_id.as_deref() == Some(contract_ref)
        })?;
        for orphan in orphaned_usages {
            let Some(raw) = self.store.get_raw(DocumentKind::Usage, &orphan.id)? else {
                continue;
            };
            let mut usage: Usage = serde_json::from_slice(&raw)?;
            usage.contract_id = contract.id.clone();
            if usage.signature_link.is_empty() {
                usage.signature_link = materialize_slots(&contract.header)
                    .map_err(|e| EngineError::Codec(e.to_string()))?;
            }
            usage.touch();
            self.store
                .update_if(DocumentKind::Usage, &usage.id, &raw, &usage)?;
            info!(usage_id = %usage.id, contract_id = %contract.id, "usage re-homed onto received contract");
        }

        let orphaned_settlements = self.store.query(DocumentKind::Settlement, |s: &Settlement| {
            s.state == DocumentState::Received
                && s.contract_id != contract.id
                && s.contract_reference_id.as_deref() == Some(contract_ref)
        })?;
        for orphan in orphaned_settlements {
            let Some(raw) = self.store.get_raw(DocumentKind::Settlement, &orphan.id)? else {
                continue;
            };
            let mut settlement: Settlement = serde_json::from_slice(&raw)?;
            settlement.contract_id = contract.id.clone();
            settlement.touch();
            self.store
                .update_if(DocumentKind::Settlement, &settlement.id, &raw, &settlement)?;
            info!(settlement_id = %settlement.id, contract_id = %contract.id, "settlement re-homed onto received contract");
        }
        Ok(())
    }

    fn receive_usage(&self, envelope: &Envelope, computed_ref: String) -> EngineResult<()> {
        let wire: Usage = serde_json::from_slice(&envelope.document)?;
        let target_ref = wire.reference_id.clone().unwrap_or(computed_ref);

        // A known reference is either a replay (skip) or a re-anchored tag
        // change (targeted update).
        if let Some((kind, id)) = self.store.find_by_reference(&target_ref)? {
            if kind == DocumentKind::Usage && wire.tag == Some(UsageTag::Rejected) {
                self.apply_rejection(&id)?;
            } else {
                debug!(reference_id = %target_ref, "usage already materialized, skipping");
            }
            return Ok(());
        }

        // Map the owner-local contract id onto ours via the shared reference.
        let local_contract: Option<Contract> = match wire.contract_reference_id.as_deref() {
            Some(contract_ref) => match self.store.find_by_reference(contract_ref)? {
                Some((DocumentKind::Contract, id)) => self.store.get(DocumentKind::Contract, &id)?,
                _ => None,
            },
            None => None,
        };

        let mut local = wire;
        local.id = utils::mint("usg")?;
        local.state = DocumentState::Received;
        local.msp_receiver = self.own_msp.clone();
        local.reference_id = Some(target_ref.clone());
        local.partner_usage_id = None;
        match &local_contract {
            Some(contract) => {
                local.contract_id = contract.id.clone();
                local.signature_link = materialize_slots(&contract.header)
                    .map_err(|e| EngineError::Codec(e.to_string()))?;
            }
            None => local.signature_link = Vec::new(),
        }
        local.history.push(HistoryEntry::now(HistoryAction::Received));
        local.touch();

        // Cross-link with our own sent usage for the same contract.
        if let Some(contract) = &local_contract {
            let mut mine = self.store.query(DocumentKind::Usage, |u: &Usage| {
                u.contract_id == contract.id
                    && u.msp_owner == self.own_msp
                    && u.partner_usage_id.is_none()
                    && u.state == DocumentState::Sent
            })?;
            if let Some(own_usage) = mine.pop() {
                local.partner_usage_id = Some(own_usage.id.clone());
                if let Some(raw) = self.store.get_raw(DocumentKind::Usage, &own_usage.id)? {
                    let mut mirror: Usage = serde_json::from_slice(&raw)?;
                    if mirror.partner_usage_id.is_none() {
                        mirror.partner_usage_id = Some(local.id.clone());
                        mirror.touch();
                        self.store
                            .update_if(DocumentKind::Usage, &mirror.id, &raw, &mirror)?;
                    }
                }
            }
        }

        self.store.create(DocumentKind::Usage, &local.id, &local)?;
        self.store
            .index_reference(&target_ref, DocumentKind::Usage, &local.id)?;
        info!(usage_id = %local.id, reference_id = %target_ref, "usage received");
        Ok(())
    }

    fn apply_rejection(&self, usage_id: &str) -> EngineResult<()> {
        let Some(raw) = self.store.get_raw(DocumentKind::Usage, usage_id)? else {
            return Ok(());
        };
        let mut usage: Usage = serde_json::from_slice(&raw)?;
        if usage.tag == Some(UsageTag::Rejected) {
            return Ok(());
        }
        usage.tag = Some(UsageTag::Rejected);
        usage
            .history
            .push(HistoryEntry::now(HistoryAction::Rejected));
        usage.touch();
        self.store
            .update_if(DocumentKind::Usage, usage_id, &raw, &usage)?;
        info!(usage_id, "partner rejection applied");
        Ok(())
    }

    fn receive_settlement(&self, envelope: &Envelope, computed_ref: String) -> EngineResult<()> {
        let wire: Settlement = serde_json::from_slice(&envelope.document)?;
        let target_ref = wire.reference_id.clone().unwrap_or(computed_ref);
        if self.store.find_by_reference(&target_ref)?.is_some() {
            debug!(reference_id = %target_ref, "settlement already materialized, skipping");
            return Ok(());
        }

        let local_contract_id = match wire.contract_reference_id.as_deref() {
            Some(contract_ref) => match self.store.find_by_reference(contract_ref)? {
                Some((DocumentKind::Contract, id)) => Some(id),
                _ => None,
            },
            None => None,
        };

        let mut local = wire;
        local.id = utils::mint("stl")?;
        local.state = DocumentState::Received;
        local.msp_receiver = self.own_msp.clone();
        local.reference_id = Some(target_ref.clone());
        if let Some(contract_id) = local_contract_id {
            local.contract_id = contract_id;
        }
        local.history.push(HistoryEntry::now(HistoryAction::Received));
        local.touch();

        self.store
            .create(DocumentKind::Settlement, &local.id, &local)?;
        self.store
            .index_reference(&target_ref, DocumentKind::Settlement, &local.id)?;
        info!(settlement_id = %local.id, reference_id = %target_ref, "settlement received");
        Ok(())
    }

    /// `STORE:SIGNATURE`: anchor a counterparty's signature on the slot at
    /// `(msp, index)`. Replays and self-echoes find the slot already filled.
    fn handle_signature(
        &self,
        reference_id: &str,
        msp: SlotParty,
        index: usize,
        tx_id: &str,
    ) -> EngineResult<()> {
        let Some((kind, id)) = self.store.find_by_reference(reference_id)? else {
            debug!(reference_id, "signature event for unknown reference");
            return Err(EngineError::NotFound);
        };
        match kind {
            DocumentKind::Contract => {
                let Some(raw) = self.store.get_raw(kind, &id)? else {
                    return Err(EngineError::NotFound);
                };
                let mut contract: Contract = serde_json::from_slice(&raw)?;
                let Some(slot) = contract.slot_at_mut(msp, index) else {
                    return Err(EngineError::SignatureNotFound);
                };
                if slot.tx_id.is_some() {
                    return Ok(());
                }
                slot.tx_id = Some(tx_id.to_string());
                if contract.fully_signed() {
                    contract.state = DocumentState::Signed;
                    contract
                        .history
                        .push(HistoryEntry::now(HistoryAction::Signed));
                }
                contract.touch();
                self.store.update_if(kind, &id, &raw, &contract)?;
                info!(contract_id = %id, tx_id, "remote contract signature applied");
            }
            DocumentKind::Usage => {
                let Some(raw) = self.store.get_raw(kind, &id)? else {
                    return Err(EngineError::NotFound);
                };
                let mut usage: Usage = serde_json::from_slice(&raw)?;
                let Some(slot) = usage.slot_at_mut(msp, index) else {
                    return Err(EngineError::SignatureNotFound);
                };
                if slot.tx_id.is_some() {
                    return Ok(());
                }
                slot.tx_id = Some(tx_id.to_string());
                usage.touch();
                self.store.update_if(kind, &id, &raw, &usage)?;
                info!(usage_id = %id, tx_id, "remote usage signature applied");
            }
            DocumentKind::Settlement => {
                debug!(reference_id, "signature event for a settlement, ignoring");
            }
        }
        Ok(())
    }
}
