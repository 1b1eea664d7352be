// crates/machina-tools/src/registry.rs
// ============================================================================
// Module: Tool Registry
// Description: AID-keyed registry of descriptors and invokers.
// Purpose: Resolve what a menu offers and what dispatch executes.
// Dependencies: machina-core, thiserror
// ============================================================================

//! ## Overview
//! [`ToolRegistry`] maps AIDs to [`RegisteredTool`] records. Registration
//! happens statically at startup or dynamically through the plugin manager,
//! so reads go through a read-preferring lock: the goal loop reads menus
//! while a post-step plugin scan may register new tools. Duplicate AIDs are
//! rejected unless override is explicitly allowed. Tag queries preserve
//! registration order, which keeps SID assignment stable across identical
//! registries.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use machina_core::Aid;
use machina_core::RegistrarError;
use machina_core::ReplayToolSource;
use machina_core::ToolDesc;
use machina_core::ToolInvoker;
use machina_core::ToolRegistrar;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by registry operations.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// AID already registered and override was not allowed.
    #[error("duplicate tool registration: {0}")]
    Duplicate(String),
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// One registered tool: its descriptor and invoker.
///
/// # Invariants
/// - `desc.aid` is the registry key; the two never diverge.
#[derive(Clone)]
pub struct RegisteredTool {
    /// Registry descriptor.
    pub desc: ToolDesc,
    /// Tool body.
    pub invoker: Arc<dyn ToolInvoker>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool").field("desc", &self.desc).finish_non_exhaustive()
    }
}

/// Mutable registry state owned by the lock.
#[derive(Debug, Default)]
struct RegistryInner {
    /// Tools in registration order.
    tools: Vec<RegisteredTool>,
    /// AID → position lookup.
    by_aid: HashMap<String, usize>,
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Read-mostly registry of executable tools.
///
/// # Invariants
/// - Lookups are O(1) by AID; iteration follows registration order.
/// - Overridden registrations keep their original position, so menu SIDs
///   stay stable across an override.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    /// Locked registry state.
    inner: RwLock<RegistryInner>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] when the AID is taken and
    /// `allow_override` is false.
    pub fn register(
        &self,
        desc: ToolDesc,
        invoker: Arc<dyn ToolInvoker>,
        allow_override: bool,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let key = desc.aid.as_str().to_string();
        if let Some(position) = inner.by_aid.get(&key).copied() {
            if !allow_override {
                return Err(RegistryError::Duplicate(key));
            }
            inner.tools[position] = RegisteredTool {
                desc,
                invoker,
            };
            return Ok(());
        }
        let position = inner.tools.len();
        inner.tools.push(RegisteredTool {
            desc,
            invoker,
        });
        inner.by_aid.insert(key, position);
        Ok(())
    }

    /// Looks up a tool by AID.
    #[must_use]
    pub fn lookup(&self, aid: &Aid) -> Option<RegisteredTool> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_aid.get(aid.as_str()).map(|position| inner.tools[*position].clone())
    }

    /// Returns descriptors whose tag lists intersect the query set,
    /// preserving registration order.
    #[must_use]
    pub fn by_tags(&self, query: &[String]) -> Vec<ToolDesc> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .tools
            .iter()
            .filter(|tool| tool.desc.tags_intersect(query))
            .map(|tool| tool.desc.clone())
            .collect()
    }

    /// Returns all descriptors in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<ToolDesc> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.tools.iter().map(|tool| tool.desc.clone()).collect()
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).tools.len()
    }

    /// Returns whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ToolRegistrar for ToolRegistry {
    fn register_tool(
        &self,
        desc: ToolDesc,
        invoker: Arc<dyn ToolInvoker>,
        allow_override: bool,
    ) -> Result<(), RegistrarError> {
        self.register(desc, invoker, allow_override)
            .map_err(|RegistryError::Duplicate(aid)| RegistrarError::Duplicate(aid))
    }
}

impl ReplayToolSource for ToolRegistry {
    fn replay_tool(&self, aid: &Aid) -> Option<(ToolDesc, Arc<dyn ToolInvoker>)> {
        self.lookup(aid).map(|tool| (tool.desc, tool.invoker))
    }
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use machina_core::ToolOutcome;
    use machina_core::Tx;

    use super::*;

    /// Invoker stub for registry tests.
    struct Stub;

    impl ToolInvoker for Stub {
        fn invoke(&self, _input_json: &str, _tx: &mut Tx) -> ToolOutcome {
            ToolOutcome::ok("{}")
        }
    }

    /// Registers a stub tool with the given AID and tags.
    fn add(registry: &ToolRegistry, aid: &str, tags: &[&str]) {
        let desc = ToolDesc::new(aid, aid)
            .tags(tags.iter().map(ToString::to_string).collect());
        registry.register(desc, Arc::new(Stub), false).unwrap();
    }

    #[test]
    fn duplicate_registration_is_rejected_without_override() {
        let registry = ToolRegistry::new();
        add(&registry, "AID.X.v1", &[]);
        let err = registry
            .register(ToolDesc::new("AID.X.v1", "X2"), Arc::new(Stub), false)
            .unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("AID.X.v1".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn override_replaces_in_place() {
        let registry = ToolRegistry::new();
        add(&registry, "AID.A.v1", &[]);
        add(&registry, "AID.B.v1", &[]);
        registry
            .register(ToolDesc::new("AID.A.v1", "A-next"), Arc::new(Stub), true)
            .unwrap();

        let order: Vec<String> =
            registry.list().into_iter().map(|desc| desc.aid.as_str().to_string()).collect();
        assert_eq!(order, vec!["AID.A.v1", "AID.B.v1"]);
        assert_eq!(registry.lookup(&Aid::new("AID.A.v1")).unwrap().desc.name, "A-next");
    }

    #[test]
    fn tag_query_preserves_registration_order() {
        let registry = ToolRegistry::new();
        add(&registry, "AID.C.v1", &["scan"]);
        add(&registry, "AID.A.v1", &["scan", "table"]);
        add(&registry, "AID.B.v1", &["net"]);

        let hits: Vec<String> = registry
            .by_tags(&["scan".to_string()])
            .into_iter()
            .map(|desc| desc.aid.as_str().to_string())
            .collect();
        assert_eq!(hits, vec!["AID.C.v1", "AID.A.v1"]);
    }

    #[test]
    fn empty_tag_query_matches_nothing() {
        let registry = ToolRegistry::new();
        add(&registry, "AID.A.v1", &["scan"]);
        assert!(registry.by_tags(&[]).is_empty());
    }

    #[test]
    fn replay_source_exposes_registered_tools() {
        let registry = ToolRegistry::new();
        add(&registry, "AID.A.v1", &[]);
        assert!(registry.replay_tool(&Aid::new("AID.A.v1")).is_some());
        assert!(registry.replay_tool(&Aid::new("AID.MISSING.v1")).is_none());
    }
}
