//! Content loading interface.
//!
//! Script text lives outside the engine (asset packs, files, network). The
//! script manager asks a [`ContentSource`] for raw text by logical name.
//! Sources that have the content on hand return it immediately; streaming
//! sources return `None` from [`ContentSource::request`] and the host later
//! hands the loaded text to the manager's delivery entry point.

use std::collections::HashMap;

/// Supplies raw script source text by logical asset name.
pub trait ContentSource {
    /// Begin loading the named asset.
    ///
    /// Returns the text right away when it is already available, or `None`
    /// when the load completes later through the owning manager.
    fn request(&mut self, name: &str) -> Option<String>;
}

/// A content source backed by an in-memory map. Every asset is available
/// immediately; useful for tests and embedded script bundles.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    assets: HashMap<String, String>,
}

impl MemorySource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an asset under a logical name.
    pub fn add_asset(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.assets.insert(name.into(), text.into());
    }
}

impl ContentSource for MemorySource {
    fn request(&mut self, name: &str) -> Option<String> {
        self.assets.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_round_trip() {
        let mut source = MemorySource::new();
        source.add_asset("intro", "Line One");
        assert_eq!(source.request("intro").as_deref(), Some("Line One"));
        assert_eq!(source.request("missing"), None);
    }
}
