//! Host collaborators
//!
//! The interceptor never touches a browser directly. Tab lookups, tab
//! creation and removal, and user notifications go through [`TabHost`];
//! temporary container housekeeping goes through [`ContainerLifecycle`].

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use cr_core::types::is_uncontained;
use cr_core::TabId;

use crate::error::HostError;

/// A tab as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    /// `None` for an uncontained tab
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

/// Request to open a tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTab {
    pub url: String,
    /// `None` opens the tab uncontained
    pub container_id: Option<String>,
    pub index: Option<u32>,
}

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub title: String,
    pub message: String,
}

#[async_trait]
pub trait TabHost: Send + Sync {
    /// Container of `tab`, or `None` when the tab is uncontained.
    async fn tab_container(&self, tab: TabId) -> Result<Option<String>, HostError>;

    async fn create_tab(&self, request: CreateTab) -> Result<TabInfo, HostError>;

    async fn remove_tab(&self, tab: TabId) -> Result<(), HostError>;

    async fn notify(&self, notice: Notice) -> Result<(), HostError>;
}

#[async_trait]
pub trait ContainerLifecycle: Send + Sync {
    /// Remove temporary containers that no longer hold tabs. Returns how many
    /// were removed.
    async fn cleanup_empty_temporary_containers(&self) -> Result<usize, HostError>;
}

/// Lifecycle for hosts without temporary containers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLifecycle;

#[async_trait]
impl ContainerLifecycle for NoopLifecycle {
    async fn cleanup_empty_temporary_containers(&self) -> Result<usize, HostError> {
        Ok(0)
    }
}

// =============================================================================
// Memory Host
// =============================================================================

/// Host operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOp {
    TabContainer,
    CreateTab,
    RemoveTab,
    Notify,
}

impl HostOp {
    pub fn as_str(self) -> &'static str {
        match self {
            HostOp::TabContainer => "tab_container",
            HostOp::CreateTab => "create_tab",
            HostOp::RemoveTab => "remove_tab",
            HostOp::Notify => "notify",
        }
    }
}

struct HostState {
    tabs: BTreeMap<TabId, TabInfo>,
    next_id: TabId,
    notices: Vec<Notice>,
    failing: HashSet<HostOp>,
}

/// In-process tab host used by tests and simulations.
pub struct MemoryTabHost {
    state: Mutex<HostState>,
}

impl Default for MemoryTabHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTabHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostState {
                tabs: BTreeMap::new(),
                next_id: 1,
                notices: Vec::new(),
                failing: HashSet::new(),
            }),
        }
    }

    /// Register an existing tab. Later generated ids never collide with it.
    pub fn insert_tab(&self, tab: TabInfo) {
        let mut state = self.lock();
        state.next_id = state.next_id.max(tab.id + 1);
        state.tabs.insert(tab.id, normalize(tab));
    }

    /// Open a tab directly, bypassing interception.
    pub fn open_tab(&self, url: &str, container_id: Option<&str>) -> TabInfo {
        let mut state = self.lock();
        let tab = TabInfo {
            id: state.next_id,
            container_id: container_id.map(str::to_string),
            url: Some(url.to_string()),
            index: None,
        };
        state.next_id += 1;
        let tab = normalize(tab);
        state.tabs.insert(tab.id, tab.clone());
        tab
    }

    pub fn tab(&self, id: TabId) -> Option<TabInfo> {
        self.lock().tabs.get(&id).cloned()
    }

    /// Open tabs ordered by id.
    pub fn tabs(&self) -> Vec<TabInfo> {
        self.lock().tabs.values().cloned().collect()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.lock().notices.clone()
    }

    pub fn fail(&self, op: HostOp) {
        self.lock().failing.insert(op);
    }

    pub fn recover(&self, op: HostOp) {
        self.lock().failing.remove(&op);
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock()
    }

    fn check(state: &HostState, op: HostOp) -> Result<(), HostError> {
        if state.failing.contains(&op) {
            return Err(HostError::Rejected {
                operation: op.as_str(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

fn normalize(mut tab: TabInfo) -> TabInfo {
    if is_uncontained(tab.container_id.as_deref()) {
        tab.container_id = None;
    }
    tab
}

#[async_trait]
impl TabHost for MemoryTabHost {
    async fn tab_container(&self, tab: TabId) -> Result<Option<String>, HostError> {
        let state = self.lock();
        Self::check(&state, HostOp::TabContainer)?;
        state
            .tabs
            .get(&tab)
            .map(|info| info.container_id.clone())
            .ok_or(HostError::TabNotFound(tab))
    }

    async fn create_tab(&self, request: CreateTab) -> Result<TabInfo, HostError> {
        let mut state = self.lock();
        Self::check(&state, HostOp::CreateTab)?;

        let tab = normalize(TabInfo {
            id: state.next_id,
            container_id: request.container_id,
            url: Some(request.url),
            index: request.index,
        });
        state.next_id += 1;
        state.tabs.insert(tab.id, tab.clone());
        Ok(tab)
    }

    async fn remove_tab(&self, tab: TabId) -> Result<(), HostError> {
        let mut state = self.lock();
        Self::check(&state, HostOp::RemoveTab)?;
        state
            .tabs
            .remove(&tab)
            .map(|_| ())
            .ok_or(HostError::TabNotFound(tab))
    }

    async fn notify(&self, notice: Notice) -> Result<(), HostError> {
        let mut state = self.lock();
        Self::check(&state, HostOp::Notify)?;
        state.notices.push(notice);
        Ok(())
    }
}
