//! Private-document envelope exchanged through the ledger adapter.
//!
//! The envelope is CBOR; the document inside is the owner's JSON encoding
//! carried verbatim, so the receiver rebuilds exactly what the owner stored
//! and both sides hash identical bytes for the reference id.

use crate::document::DocumentKind;
use crate::error::EngineResult;
use crate::utils;

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Envelope {
    #[n(0)]
    pub kind: DocumentKind,
    #[n(1)]
    pub from_msp: String,
    #[n(2)]
    pub to_msp: String,
    #[cbor(n(3), with = "minicbor::bytes")]
    pub document: Vec<u8>,
}

impl Envelope {
    pub fn new(kind: DocumentKind, from_msp: String, to_msp: String, document: Vec<u8>) -> Self {
        Self {
            kind,
            from_msp,
            to_msp,
            document,
        }
    }

    pub fn encode(&self) -> EngineResult<Vec<u8>> {
        Ok(minicbor::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> EngineResult<Self> {
        Ok(minicbor::decode(bytes)?)
    }

    /// Encode and derive the shared reference id in one step (owner side).
    pub fn finalise(&self) -> EngineResult<(String, Vec<u8>)> {
        let bytes = self.encode()?;
        let reference = utils::reference_id(&self.from_msp, &bytes);
        Ok((reference, bytes))
    }

    /// Decode fetched payload bytes and recompute the reference id they
    /// anchor (receiver side).
    pub fn open(bytes: &[u8]) -> EngineResult<(Self, String)> {
        let envelope = Self::decode(bytes)?;
        let reference = utils::reference_id(&envelope.from_msp, bytes);
        Ok((envelope, reference))
    }
}
