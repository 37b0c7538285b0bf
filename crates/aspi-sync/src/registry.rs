//! Adapter lookup: built-in descriptors plus the workspace `providers.yaml`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use aspi_adapters::{adapter_for_provider, builtin_descriptors, DescriptorAdapter, ProviderAdapter, ProviderDescriptor};
use serde::Deserialize;
use strsim::jaro_winkler;
use tokio::fs;
use tracing::{debug, info};

pub const PROVIDERS_FILE: &str = "providers.yaml";

/// Minimum Jaro-Winkler similarity for a fuzzy provider-name match.
const FUZZY_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderOverrides {
    #[serde(default)]
    pub providers: Vec<ProviderDescriptor>,
}

/// Keyed adapters. Descriptors from `providers.yaml` replace built-ins with the same key.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    overrides: BTreeMap<String, Arc<dyn ProviderAdapter>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn builtin() -> Self {
        Self::default()
    }

    pub fn with_descriptors(descriptors: impl IntoIterator<Item = ProviderDescriptor>) -> Result<Self> {
        let mut registry = Self::builtin();
        for descriptor in descriptors {
            descriptor
                .validate()
                .with_context(|| format!("invalid provider descriptor `{}`", descriptor.key))?;
            registry
                .overrides
                .insert(descriptor.key.clone(), Arc::new(DescriptorAdapter::new(descriptor)));
        }
        Ok(registry)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let parsed: ProviderOverrides = serde_yaml::from_str(text).context("parsing provider overrides")?;
        Self::with_descriptors(parsed.providers)
    }

    /// Built-ins, extended by `<workspace_root>/providers.yaml` when the file exists.
    pub async fn load(workspace_root: &Path) -> Result<Self> {
        let path = workspace_root.join(PROVIDERS_FILE);
        if !fs::try_exists(&path)
            .await
            .with_context(|| format!("checking {}", path.display()))?
        {
            debug!(path = %path.display(), "no provider overrides");
            return Ok(Self::builtin());
        }
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let registry = Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        info!(path = %path.display(), overrides = registry.overrides.len(), "loaded provider overrides");
        Ok(registry)
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn ProviderAdapter>> {
        if let Some(adapter) = self.overrides.get(key) {
            return Some(Arc::clone(adapter));
        }
        adapter_for_provider(key).map(Arc::from)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Every registered descriptor, sorted by key.
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        let mut all: BTreeMap<String, ProviderDescriptor> = builtin_descriptors()
            .into_iter()
            .map(|d| (d.key.clone(), d))
            .collect();
        for (key, adapter) in &self.overrides {
            all.insert(key.clone(), adapter.descriptor().clone());
        }
        all.into_values().collect()
    }

    /// Finds the adapter for a human-entered provider name: exact key, then the
    /// descriptor's own name patterns, then the closest fuzzy match.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        if let Some(adapter) = self.get(&needle) {
            return Some(adapter);
        }
        let descriptors = self.descriptors();
        if let Some(found) = descriptors.iter().find(|d| self.matches(d, name)) {
            return self.get(&found.key);
        }

        let (score, key) = descriptors
            .iter()
            .map(|d| {
                let score = jaro_winkler(&needle, &d.key).max(jaro_winkler(&needle, &d.display_name.to_lowercase()));
                (score, d.key.as_str())
            })
            .fold((0.0_f64, ""), |best, candidate| if candidate.0 > best.0 { candidate } else { best });
        if score >= FUZZY_THRESHOLD {
            debug!(name, key, score, "fuzzy provider match");
            return self.get(key);
        }
        None
    }

    fn matches(&self, descriptor: &ProviderDescriptor, name: &str) -> bool {
        self.get(&descriptor.key)
            .map(|adapter| adapter.matches_name(name))
            .unwrap_or(false)
    }
}
