use crate::error::{RelinkError, Result};
use crate::types::{EntityType, Identifier};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Entity type whose identifiers form the page-tree (pid) namespace.
pub const PAGE_ENTITY: &str = "pages";

/// Entity type that file links and embedded-file markers point at.
pub const FILE_ENTITY: &str = "sys_file";

/// entity type -> (old identifier -> new identifier)
pub type Mapping = BTreeMap<EntityType, BTreeMap<Identifier, Identifier>>;

/// Old -> new identifier lookup, populated by the import that ran before the
/// rewrite pass. The rewriter has no fallback of its own: whatever a resolver
/// answers on a miss is what ends up in the data.
pub trait MappingResolver {
    fn new_from_old(&self, old_id: Identifier, entity_type: &str) -> Result<Identifier>;

    /// Same contract as `new_from_old`, for the page-tree namespace.
    fn new_pid_from_old_pid(&self, old_pid: Identifier) -> Result<Identifier>;

    /// Drives the outer iteration of a pass.
    fn mapping(&self) -> &Mapping;
}

/// What `MappingTable` answers for an identifier it has no entry for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissPolicy {
    /// Substitute the old identifier unchanged and log a warning.
    #[default]
    KeepOld,
    /// Abort the pass with `RelinkError::UnmappedIdentifier`.
    Fail,
}

/// In-memory mapping table.
#[derive(Clone, Debug, Default)]
pub struct MappingTable {
    entries: Mapping,
    policy: MissPolicy,
}

impl MappingTable {
    pub fn new(policy: MissPolicy) -> Self {
        Self {
            entries: Mapping::new(),
            policy,
        }
    }

    pub fn from_mapping(entries: Mapping, policy: MissPolicy) -> Self {
        Self { entries, policy }
    }

    /// Parse `{"pages": {"1": 11, "2": 12}, "sys_file": {"3": 33}}`.
    pub fn from_json(json: &str, policy: MissPolicy) -> Result<Self> {
        let entries: Mapping = serde_json::from_str(json)?;
        Ok(Self::from_mapping(entries, policy))
    }

    pub fn load(path: &Path, policy: MissPolicy) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json, policy)
    }

    pub fn insert(&mut self, entity_type: &str, old_id: Identifier, new_id: Identifier) {
        self.entries
            .entry(EntityType::from(entity_type))
            .or_default()
            .insert(old_id, new_id);
    }

    pub fn policy(&self) -> MissPolicy {
        self.policy
    }

    /// Number of mapped identifiers across all entity types.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, old_id: Identifier, entity_type: &str) -> Option<Identifier> {
        self.entries.get(entity_type)?.get(&old_id).copied()
    }
}

impl MappingResolver for MappingTable {
    fn new_from_old(&self, old_id: Identifier, entity_type: &str) -> Result<Identifier> {
        if let Some(new_id) = self.lookup(old_id, entity_type) {
            return Ok(new_id);
        }
        match self.policy {
            MissPolicy::KeepOld => {
                tracing::warn!(
                    "No mapping for {}:{}, keeping the old identifier",
                    entity_type,
                    old_id
                );
                Ok(old_id)
            }
            MissPolicy::Fail => Err(RelinkError::UnmappedIdentifier {
                entity_type: EntityType::from(entity_type),
                old_id,
            }),
        }
    }

    fn new_pid_from_old_pid(&self, old_pid: Identifier) -> Result<Identifier> {
        self.new_from_old(old_pid, PAGE_ENTITY)
    }

    fn mapping(&self) -> &Mapping {
        &self.entries
    }
}
