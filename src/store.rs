//! Sled-backed document store.
//!
//! One tree per document type plus a `references` index tree mapping a shared
//! reference id to the local `(tree, id)` pair, so lookups by reference
//! succeed on both sides of an exchange. All transition writes go through
//! [`DocumentStore::update_if`], a compare-and-swap against the bytes the
//! caller read, which serializes concurrent writers to the same document.

use crate::document::DocumentKind;
use crate::error::{EngineError, EngineResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sled::{Db, IVec, Tree};
use std::sync::Arc;

#[derive(Clone)]
pub struct DocumentStore {
    contracts: Tree,
    usages: Tree,
    settlements: Tree,
    references: Tree,
}

impl DocumentStore {
    pub fn new(db: Arc<Db>) -> EngineResult<Self> {
        Ok(Self {
            contracts: db.open_tree(DocumentKind::Contract.tree_name())?,
            usages: db.open_tree(DocumentKind::Usage.tree_name())?,
            settlements: db.open_tree(DocumentKind::Settlement.tree_name())?,
            references: db.open_tree("references")?,
        })
    }

    fn tree(&self, kind: DocumentKind) -> &Tree {
        match kind {
            DocumentKind::Contract => &self.contracts,
            DocumentKind::Usage => &self.usages,
            DocumentKind::Settlement => &self.settlements,
        }
    }

    /// Raw row bytes, kept around by callers as the CAS witness for
    /// [`Self::update_if`].
    pub fn get_raw(&self, kind: DocumentKind, id: &str) -> EngineResult<Option<IVec>> {
        Ok(self.tree(kind).get(id.as_bytes())?)
    }

    pub fn get<T: DeserializeOwned>(&self, kind: DocumentKind, id: &str) -> EngineResult<Option<T>> {
        match self.get_raw(kind, id)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Insert a fresh document; fails on id collision.
    pub fn create<T: Serialize>(&self, kind: DocumentKind, id: &str, doc: &T) -> EngineResult<()> {
        let encoded = serde_json::to_vec(doc)?;
        self.tree(kind)
            .compare_and_swap(id.as_bytes(), None as Option<&[u8]>, Some(encoded))?
            .map_err(|_| EngineError::Conflict)
    }

    /// Read-modify-write commit: succeeds only if the row still holds the
    /// bytes the caller loaded. The losing writer gets `Conflict` and never
    /// half-applies its transition.
    pub fn update_if<T: Serialize>(
        &self,
        kind: DocumentKind,
        id: &str,
        expected: &IVec,
        doc: &T,
    ) -> EngineResult<()> {
        let encoded = serde_json::to_vec(doc)?;
        self.tree(kind)
            .compare_and_swap(id.as_bytes(), Some(expected), Some(encoded))?
            .map_err(|_| EngineError::Conflict)
    }

    /// Remove a document and return its last snapshot.
    pub fn delete<T: DeserializeOwned>(
        &self,
        kind: DocumentKind,
        id: &str,
    ) -> EngineResult<Option<T>> {
        match self.tree(kind).remove(id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn query<T: DeserializeOwned>(
        &self,
        kind: DocumentKind,
        mut keep: impl FnMut(&T) -> bool,
    ) -> EngineResult<Vec<T>> {
        let mut out = Vec::new();
        for row in self.tree(kind).iter() {
            let (_, raw) = row?;
            let doc: T = serde_json::from_slice(&raw)?;
            if keep(&doc) {
                out.push(doc);
            }
        }
        Ok(out)
    }

    /// Register the shared reference id of a sent or received document.
    pub fn index_reference(
        &self,
        reference_id: &str,
        kind: DocumentKind,
        id: &str,
    ) -> EngineResult<()> {
        let value = format!("{}:{}", kind.tree_name(), id);
        self.references
            .insert(reference_id.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    pub fn drop_reference(&self, reference_id: &str) -> EngineResult<()> {
        self.references.remove(reference_id.as_bytes())?;
        Ok(())
    }

    /// Resolve a shared reference id to the local `(kind, id)` pair.
    pub fn find_by_reference(
        &self,
        reference_id: &str,
    ) -> EngineResult<Option<(DocumentKind, String)>> {
        let Some(raw) = self.references.get(reference_id.as_bytes())? else {
            return Ok(None);
        };
        let value = String::from_utf8_lossy(&raw).into_owned();
        let Some((tree, id)) = value.split_once(':') else {
            return Err(EngineError::Codec(format!(
                "malformed reference index entry: {value}"
            )));
        };
        let kind = match tree {
            "contracts" => DocumentKind::Contract,
            "usages" => DocumentKind::Usage,
            "settlements" => DocumentKind::Settlement,
            other => {
                return Err(EngineError::Codec(format!(
                    "unknown tree in reference index: {other}"
                )));
            }
        };
        Ok(Some((kind, id.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn store() -> (tempfile::TempDir, DocumentStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("store.db")).unwrap();
        (dir, DocumentStore::new(Arc::new(db)).unwrap())
    }

    #[test]
    fn update_if_rejects_stale_writers() {
        let (_dir, store) = store();
        store
            .create(DocumentKind::Contract, "ctr1", &json!({"v": 1}))
            .unwrap();

        let first = store.get_raw(DocumentKind::Contract, "ctr1").unwrap().unwrap();
        store
            .update_if(DocumentKind::Contract, "ctr1", &first, &json!({"v": 2}))
            .unwrap();

        // Second writer still holds the v1 bytes.
        let err = store
            .update_if(DocumentKind::Contract, "ctr1", &first, &json!({"v": 3}))
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict));

        let current: Value = store.get(DocumentKind::Contract, "ctr1").unwrap().unwrap();
        assert_eq!(current, json!({"v": 2}));
    }

    #[test]
    fn reference_index_roundtrip() {
        let (_dir, store) = store();
        store
            .index_reference("ref-abc", DocumentKind::Usage, "usg1")
            .unwrap();
        assert_eq!(
            store.find_by_reference("ref-abc").unwrap(),
            Some((DocumentKind::Usage, "usg1".to_string()))
        );
        store.drop_reference("ref-abc").unwrap();
        assert_eq!(store.find_by_reference("ref-abc").unwrap(), None);
    }
}
