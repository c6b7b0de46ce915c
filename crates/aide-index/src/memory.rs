//! In-memory symbol store.
//!
//! Reference implementation of [`SymbolStore`] with no durability. Used by
//! the substrate's tests; real deployments plug in the persistent index.

use crate::{FileInfo, IndexStats, Reference, StoreError, Symbol, SymbolStore};
use std::collections::HashMap;

/// Volatile [`SymbolStore`] backed by plain maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    symbols: HashMap<String, Symbol>,
    references: Vec<Reference>,
    files: HashMap<String, FileInfo>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Symbols recorded for one file, in line order.
    pub fn symbols_in_file(&self, path: &str) -> Vec<&Symbol> {
        let mut found: Vec<&Symbol> = self.symbols.values().filter(|s| s.path == path).collect();
        found.sort_by_key(|s| s.line);
        found
    }
}

impl SymbolStore for MemoryStore {
    fn add_symbol(&mut self, symbol: Symbol) -> Result<(), StoreError> {
        self.symbols.insert(symbol.id.clone(), symbol);
        Ok(())
    }

    fn delete_symbol(&mut self, id: &str) -> Result<(), StoreError> {
        self.symbols
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn add_reference(&mut self, reference: Reference) -> Result<(), StoreError> {
        self.references.push(reference);
        Ok(())
    }

    fn clear_file_references(&mut self, path: &str) -> Result<(), StoreError> {
        self.symbols.retain(|_, s| s.path != path);
        self.references.retain(|r| r.path != path);
        Ok(())
    }

    fn set_file_info(&mut self, info: FileInfo) -> Result<(), StoreError> {
        self.files.insert(info.path.clone(), info);
        Ok(())
    }

    fn stats(&self) -> Result<IndexStats, StoreError> {
        Ok(IndexStats {
            symbols: self.symbols.len() as u64,
            references: self.references.len() as u64,
            files: self.files.len() as u64,
        })
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.symbols.clear();
        self.references.clear();
        self.files.clear();
        Ok(())
    }
}
