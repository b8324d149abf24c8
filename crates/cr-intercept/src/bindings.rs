//! Tab to container bindings
//!
//! Remembers which container each live tab belongs to, so a closed tab can be
//! attributed after the host has forgotten it. Uncontained tabs have no
//! binding.

use dashmap::DashMap;

use cr_core::types::is_container;
use cr_core::TabId;

#[derive(Debug, Default)]
pub struct TabBindings {
    map: DashMap<TabId, String>,
}

impl TabBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `tab` to `container`, or unbind it when `container` is
    /// uncontained. Returns the previous binding.
    pub fn bind(&self, tab: TabId, container: Option<&str>) -> Option<String> {
        match container.filter(|id| is_container(id)) {
            Some(id) => self.map.insert(tab, id.to_string()),
            None => self.remove(tab),
        }
    }

    pub fn get(&self, tab: TabId) -> Option<String> {
        self.map.get(&tab).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, tab: TabId) -> Option<String> {
        self.map.remove(&tab).map(|(_, container)| container)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
