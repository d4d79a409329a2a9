//! Cache of decoded modules.
//!
//! Entries are immutable `Arc<CachedModule>` snapshots replaced as a whole,
//! so a reader sees either the previous or the new file set of a module.

use std::collections::HashMap;
use std::sync::Arc;

use carousel_protocol::ModuleFile;
use parking_lot::RwLock;

/// A decoded module and the metadata it was announced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedModule {
    pub module_id: u16,
    pub module_version: u8,
    pub module_size: u32,
    pub data_event_id: u8,
    /// Type descriptor text from the DII, if any.
    pub content_type: Option<String>,
    /// Extracted files; `None` when the module body could not be parsed.
    pub files: Option<Vec<ModuleFile>>,
}

impl CachedModule {
    /// Find a file by Content-Location.
    pub fn file(&self, content_location: &str) -> Option<&ModuleFile> {
        self.files
            .as_ref()?
            .iter()
            .find(|f| f.content_location.as_deref() == Some(content_location))
    }

    /// Whether this entry already holds the given module version.
    pub fn is_same_version(&self, module_version: u8, data_event_id: u8) -> bool {
        self.module_version == module_version && self.data_event_id == data_event_id
    }
}

/// Module cache shared between the engine (single writer) and readers.
#[derive(Debug, Default)]
pub struct ModuleCache {
    components: RwLock<HashMap<u8, HashMap<u16, Arc<CachedModule>>>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a cached module.
    pub fn module(&self, component_id: u8, module_id: u16) -> Option<Arc<CachedModule>> {
        self.components
            .read()
            .get(&component_id)?
            .get(&module_id)
            .cloned()
    }

    /// Look up one file of a cached module.
    pub fn file(&self, component_id: u8, module_id: u16, content_location: &str) -> Option<ModuleFile> {
        self.module(component_id, module_id)?
            .file(content_location)
            .cloned()
    }

    /// Whether the cached entry for the module already holds this version.
    pub fn is_current(&self, component_id: u8, module_id: u16, module_version: u8, data_event_id: u8) -> bool {
        self.module(component_id, module_id)
            .map(|m| m.is_same_version(module_version, data_event_id))
            .unwrap_or(false)
    }

    /// Replace the cached entry for a module, returning the previous one.
    pub fn insert(&self, component_id: u8, module: CachedModule) -> Option<Arc<CachedModule>> {
        self.components
            .write()
            .entry(component_id)
            .or_default()
            .insert(module.module_id, Arc::new(module))
    }

    /// Drop every cached module of a component.
    pub fn clear_component(&self, component_id: u8) {
        if let Some(modules) = self.components.write().get_mut(&component_id) {
            modules.clear();
        }
    }

    /// Number of cached modules of a component.
    pub fn module_count(&self, component_id: u8) -> usize {
        self.components
            .read()
            .get(&component_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}
