//! Named broadcast groups.
//!
//! Groups are keyed by a stable server-assigned id with a secondary index by
//! human name. Creation is lazy; empty groups persist (destruction is not a
//! gateway concern).

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{DashMap, DashSet};

use portico_core::error::{GatewayError, Result};

struct GroupEntry {
    name: String,
    creator_node_id: String,
    description: Option<String>,
    members: DashSet<String>,
}

#[derive(Default)]
pub struct GroupRegistry {
    groups: DashMap<String, GroupEntry>,
    by_name: DashMap<String, String>,
    seq: AtomicU64,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create-or-return by name; the id is stable for the group's lifetime.
    pub fn get_or_create(
        &self,
        name: &str,
        creator_node_id: &str,
        description: Option<String>,
    ) -> String {
        if let Some(id) = self.by_name.get(name) {
            return id.value().clone();
        }
        let id = format!("group-{}", self.seq.fetch_add(1, Ordering::Relaxed) + 1);
        self.groups.insert(
            id.clone(),
            GroupEntry {
                name: name.to_string(),
                creator_node_id: creator_node_id.to_string(),
                description,
                members: DashSet::new(),
            },
        );
        self.by_name.insert(name.to_string(), id.clone());
        id
    }

    /// Resolve a group reference: id first, then name.
    pub fn resolve(&self, group_ref: &str) -> Option<String> {
        if self.groups.contains_key(group_ref) {
            return Some(group_ref.to_string());
        }
        self.by_name.get(group_ref).map(|r| r.value().clone())
    }

    pub fn add_node(&self, group_id: &str, node_id: &str) -> Result<()> {
        let entry = self
            .groups
            .get(group_id)
            .ok_or_else(|| GatewayError::GroupNotFound(group_id.to_string()))?;
        entry.members.insert(node_id.to_string());
        Ok(())
    }

    pub fn remove_node(&self, group_id: &str, node_id: &str) -> Result<()> {
        let entry = self
            .groups
            .get(group_id)
            .ok_or_else(|| GatewayError::GroupNotFound(group_id.to_string()))?;
        entry.members.remove(node_id);
        Ok(())
    }

    pub fn remove_node_from_all(&self, node_id: &str) {
        for entry in self.groups.iter() {
            entry.members.remove(node_id);
        }
    }

    pub fn members(&self, group_id: &str) -> Result<Vec<String>> {
        let entry = self
            .groups
            .get(group_id)
            .ok_or_else(|| GatewayError::GroupNotFound(group_id.to_string()))?;
        Ok(entry.members.iter().map(|m| m.clone()).collect())
    }

    pub fn name_of(&self, group_id: &str) -> Option<String> {
        self.groups.get(group_id).map(|e| e.name.clone())
    }

    pub fn description_of(&self, group_id: &str) -> Option<String> {
        self.groups.get(group_id).and_then(|e| e.description.clone())
    }

    pub fn creator_of(&self, group_id: &str) -> Option<String> {
        self.groups.get(group_id).map(|e| e.creator_node_id.clone())
    }

    pub fn contains_node(&self, group_id: &str, node_id: &str) -> bool {
        self.groups
            .get(group_id)
            .map(|e| e.members.contains(node_id))
            .unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.groups.len()
    }
}
