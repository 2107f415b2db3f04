//! Module catalogue built at startup.
//!
//! Combines the modules the store reports with the built-in protocol
//! modules, tracks enabled features, registers one handler per top-level
//! operation and derives the capabilities advertised in the hello.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::WithDefaultsConfig;
use crate::operations::handlers::{
    CloseSession, Commit, CopyConfig, DeleteConfig, DiscardChanges, EditConfig, Get, GetConfig, Lock,
    ModuleRpc, Unlock, Validate,
};
use crate::operations::OperationRegistry;
use crate::store::SchemaInfo;

pub const BASE_MODULE: &str = "ietf-netconf";

const BASE_CAPABILITIES: [&str; 2] = ["urn:ietf:params:netconf:base:1.0", "urn:ietf:params:netconf:base:1.1"];

/// Built-in modules: name, revision.
const BUILTIN_MODULES: [(&str, &str); 4] = [
    (BASE_MODULE, "2011-06-01"),
    ("ietf-netconf-acm", "2018-02-14"),
    ("ietf-netconf-monitoring", "2010-10-04"),
    ("ietf-netconf-with-defaults", "2011-06-01"),
];

/// Base module features: feature, capability it turns on.
const BASE_FEATURES: [(&str, &str); 4] = [
    ("writable-running", "urn:ietf:params:netconf:capability:writable-running:1.0"),
    ("startup", "urn:ietf:params:netconf:capability:startup:1.0"),
    ("candidate", "urn:ietf:params:netconf:capability:candidate:1.0"),
    ("validate", "urn:ietf:params:netconf:capability:validate:1.1"),
];

/// One loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry {
    pub name: String,
    pub revision: Option<String>,
    pub features: BTreeSet<String>,
    pub rpcs: Vec<String>,
    pub builtin: bool,
}

impl ModuleEntry {
    fn capability(&self) -> String {
        let mut uri = format!("urn:ietf:params:xml:ns:yang:{}?module={}", self.name, self.name);
        if let Some(revision) = &self.revision {
            uri.push_str("&revision=");
            uri.push_str(revision);
        }
        if !self.features.is_empty() {
            uri.push_str("&features=");
            uri.push_str(&self.features.iter().cloned().collect::<Vec<_>>().join(","));
        }
        uri
    }
}

/// Loaded modules, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct SchemaContext {
    modules: BTreeMap<String, ModuleEntry>,
}

impl SchemaContext {
    /// Load the built-in modules and then `store_modules`.
    ///
    /// A module that is already loaded is skipped.
    pub fn load(store_modules: Vec<SchemaInfo>) -> Self {
        let mut ctx = Self::default();

        for (name, revision) in BUILTIN_MODULES {
            let features = if name == BASE_MODULE {
                BASE_FEATURES.iter().map(|(f, _)| f.to_string()).collect()
            } else {
                BTreeSet::new()
            };
            ctx.modules.insert(
                name.to_string(),
                ModuleEntry {
                    name: name.to_string(),
                    revision: Some(revision.to_string()),
                    features,
                    rpcs: Vec::new(),
                    builtin: true,
                },
            );
        }

        for info in store_modules {
            if ctx.modules.contains_key(&info.name) {
                tracing::debug!(module = %info.name, "Module already loaded");
                continue;
            }
            tracing::debug!(module = %info.name, rpcs = info.rpcs.len(), "Module loaded");
            ctx.modules.insert(
                info.name.clone(),
                ModuleEntry {
                    name: info.name,
                    revision: info.revision,
                    features: BTreeSet::new(),
                    rpcs: info.rpcs,
                    builtin: false,
                },
            );
        }

        ctx
    }

    pub fn module(&self, name: &str) -> Option<&ModuleEntry> {
        self.modules.get(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleEntry> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn has_feature(&self, module: &str, feature: &str) -> bool {
        self.modules.get(module).is_some_and(|m| m.features.contains(feature))
    }

    /// Capabilities advertised in the server hello.
    pub fn capabilities(&self, with_defaults: &WithDefaultsConfig) -> Vec<String> {
        let mut caps: Vec<String> = BASE_CAPABILITIES.iter().map(|c| c.to_string()).collect();

        for (feature, capability) in BASE_FEATURES {
            if self.has_feature(BASE_MODULE, feature) {
                caps.push(capability.to_string());
            }
        }

        let mut wd = format!(
            "urn:ietf:params:netconf:capability:with-defaults:1.0?basic-mode={}",
            with_defaults.basic_mode
        );
        if !with_defaults.also_supported.is_empty() {
            wd.push_str("&also-supported=");
            wd.push_str(&with_defaults.also_supported.join(","));
        }
        caps.push(wd);

        caps.extend(self.modules.values().map(ModuleEntry::capability));
        caps
    }

    /// Register a handler for every base operation and every module RPC.
    pub fn register_operations(&self, registry: &mut OperationRegistry) {
        registry.register("get", Arc::new(Get));
        registry.register("get-config", Arc::new(GetConfig));
        registry.register("edit-config", Arc::new(EditConfig));
        registry.register("copy-config", Arc::new(CopyConfig));
        registry.register("delete-config", Arc::new(DeleteConfig));
        registry.register("lock", Arc::new(Lock));
        registry.register("unlock", Arc::new(Unlock));
        registry.register("commit", Arc::new(Commit));
        registry.register("discard-changes", Arc::new(DiscardChanges));
        registry.register("validate", Arc::new(Validate));
        registry.register("close-session", Arc::new(CloseSession));

        for module in self.modules.values().filter(|m| !m.builtin) {
            for rpc in &module.rpcs {
                if registry.contains(rpc) {
                    tracing::warn!(module = %module.name, rpc = %rpc, "RPC name already registered, skipping");
                    continue;
                }
                registry.register(rpc.clone(), Arc::new(ModuleRpc::new(rpc.clone())));
            }
        }

        tracing::info!(modules = self.modules.len(), operations = registry.len(), "Operations registered");
    }
}
