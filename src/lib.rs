//! Document lifecycle engine for inter-operator contract, usage and
//! settlement exchange over a permissioned ledger.
//!
//! Each operator (MSP) runs its own instance against a private sled store;
//! the ledger only ever carries references, hashes and signatures. The engine
//! covers the DRAFT → SENT → RECEIVED (→ SIGNED) lifecycle, the signature
//! slot linking, the webhook reception pipeline and the discrepancy
//! reconciliation of both parties' figures.

pub mod discrepancy;
pub mod document;
pub mod error;
pub mod ledger;
pub mod reception;
pub mod service;
pub mod signature;
pub mod store;
pub mod utils;
pub mod wire;
