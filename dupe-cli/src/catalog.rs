//! A minimal in-process `Catalog` for the demo binary. A real deployment's
//! catalog is an external, persistent collaborator; this exists only so
//! the demo can call through the same trait the library expects.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use dupe_core::model::{Asset, DuplicateGroup, FileId, MergeTransaction};
use dupe_core::traits::{Catalog, CatalogError};

pub struct InMemoryCatalog {
    files: Mutex<HashMap<FileId, Asset>>,
    transactions: Mutex<Vec<MergeTransaction>>,
}

impl InMemoryCatalog {
    pub fn new(assets: Vec<Asset>) -> Self {
        Self {
            files: Mutex::new(assets.into_iter().map(|a| (a.id, a)).collect()),
            transactions: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self, id: FileId) -> Option<Asset> {
        self.files.lock().expect("catalog mutex poisoned").get(&id).cloned()
    }
}

impl Catalog for InMemoryCatalog {
    fn upsert_file(&self, asset: &Asset) -> Result<(), CatalogError> {
        self.files
            .lock()
            .expect("catalog mutex poisoned")
            .insert(asset.id, asset.clone());
        Ok(())
    }

    fn get_file_by_id(&self, id: FileId) -> Result<Option<Asset>, CatalogError> {
        Ok(self.get(id))
    }

    fn resolve_url(&self, _path: &Path) -> Result<Option<String>, CatalogError> {
        Ok(None)
    }

    fn create_or_update_group(&self, _group: &DuplicateGroup) -> Result<(), CatalogError> {
        Ok(())
    }

    fn record_transaction(&self, txn: &MergeTransaction) -> Result<(), CatalogError> {
        self.transactions
            .lock()
            .expect("catalog mutex poisoned")
            .push(txn.clone());
        Ok(())
    }

    fn fetch_history(&self) -> Result<Vec<MergeTransaction>, CatalogError> {
        Ok(self.transactions.lock().expect("catalog mutex poisoned").clone())
    }
}
