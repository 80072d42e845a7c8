//! Layered JSON configuration loading (search order + deep merge +
//! canonical-hash) and the feature-flag registry, generalizing the
//! deep-merge/canonicalize/hash idiom this codebase otherwise applies to
//! YAML config files.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
    pub source_path: Option<PathBuf>,
}

/// Returns the first path among `explicit` then `candidates` (resolved
/// relative to the current directory) that exists on disk.
pub fn resolve_search_path(explicit: Option<&Path>, candidates: &[&str]) -> Option<PathBuf> {
    if let Some(p) = explicit {
        if p.exists() {
            return Some(p.to_path_buf());
        }
    }
    for c in candidates {
        let p = PathBuf::from(c);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

/// Loads `path` (if `Some`) as JSON and deep-merges it over `defaults`.
/// Returns `defaults` unmodified, canonicalized and hashed, when no file
/// is found — callers treat a missing config file as "use defaults".
pub fn load_over_defaults(path: Option<&Path>, defaults: Value) -> Result<LoadedConfig> {
    let mut merged = defaults;
    let source_path = path.map(|p| p.to_path_buf());

    if let Some(p) = path {
        let raw = fs::read_to_string(p).with_context(|| format!("read config: {}", p.display()))?;
        let overlay: Value =
            serde_json::from_str(&raw).with_context(|| format!("parse json: {}", p.display()))?;
        deep_merge(&mut merged, overlay);
    }

    let canonical = canonicalize_json(&merged);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json re-parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
        source_path,
    })
}

/// Objects merge recursively; arrays and scalars are overwritten wholesale
/// by the overlay. Because only the keys present in a partial config file
/// are touched, this behaves as a shallow merge at the keys the caller
/// cares about (`profiles.*`, `queue`, `risk`, `origin_overrides`) while
/// still allowing deeper overrides when a file supplies them.
pub fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

pub fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("canonical json serialization cannot fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// One feature flag's resolved state.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagState {
    pub enabled: bool,
    pub mode: Option<String>,
}

/// Defaults → `CONVERGE_FF_<NAME>` / `CONVERGE_FF_<NAME>_MODE` env
/// overrides → JSON overrides (applied in that priority order, last wins).
#[derive(Debug, Clone, Default)]
pub struct FeatureFlagRegistry {
    defaults: HashMap<String, FlagState>,
    json_overrides: HashMap<String, FlagState>,
}

impl FeatureFlagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, name: impl Into<String>, enabled: bool, mode: Option<&str>) -> Self {
        self.defaults.insert(
            name.into(),
            FlagState {
                enabled,
                mode: mode.map(str::to_string),
            },
        );
        self
    }

    /// Merge a JSON object of `{name: {enabled, mode}}` overrides.
    pub fn apply_json_overrides(&mut self, overrides: &Value) {
        if let Some(obj) = overrides.as_object() {
            for (name, v) in obj {
                let enabled = v.get("enabled").and_then(Value::as_bool);
                let mode = v.get("mode").and_then(Value::as_str).map(str::to_string);
                let base = self
                    .json_overrides
                    .get(name)
                    .cloned()
                    .or_else(|| self.defaults.get(name).cloned())
                    .unwrap_or(FlagState {
                        enabled: false,
                        mode: None,
                    });
                self.json_overrides.insert(
                    name.clone(),
                    FlagState {
                        enabled: enabled.unwrap_or(base.enabled),
                        mode: mode.or(base.mode),
                    },
                );
            }
        }
    }

    /// Resolves one flag, checking env vars last (highest priority) so
    /// operators can override a config-baked default at deploy time.
    pub fn resolve(&self, name: &str) -> FlagState {
        let base = self
            .json_overrides
            .get(name)
            .cloned()
            .or_else(|| self.defaults.get(name).cloned())
            .unwrap_or(FlagState {
                enabled: false,
                mode: None,
            });

        let env_name = format!("CONVERGE_FF_{}", name.to_uppercase());
        let mode_env_name = format!("{env_name}_MODE");

        let enabled = match env::var(&env_name).ok().as_deref() {
            Some("1") => true,
            Some("0") => false,
            _ => base.enabled,
        };
        let mode = env::var(&mode_env_name).ok().or(base.mode);

        FlagState { enabled, mode }
    }

    /// Programmatic override; returns `true` if the resolved state changed
    /// (callers use this to decide whether to emit `feature_flag.changed`).
    pub fn set(&mut self, name: &str, enabled: bool, mode: Option<String>) -> bool {
        let before = self.resolve(name);
        self.json_overrides.insert(
            name.to_string(),
            FlagState {
                enabled,
                mode: mode.clone(),
            },
        );
        let after = self.resolve(name);
        before != after
    }
}

pub const POLICY_CONFIG_SEARCH: [&str; 3] = [
    ".converge/policy.json",
    "policy.json",
    "policy.default.json",
];

pub const COHERENCE_HARNESS_CONFIG_PATH: &str = ".converge/coherence_harness.json";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_merge_overrides_only_supplied_keys() {
        let mut base = serde_json::json!({"profiles": {"low": {"entropy_budget": 10}, "high": {"entropy_budget": 50}}});
        let overlay = serde_json::json!({"profiles": {"low": {"entropy_budget": 20}}});
        deep_merge(&mut base, overlay);
        assert_eq!(base["profiles"]["low"]["entropy_budget"], 20);
        assert_eq!(base["profiles"]["high"]["entropy_budget"], 50);
    }

    #[test]
    fn canonicalization_is_deterministic_regardless_of_key_order() {
        let a = serde_json::json!({"b": 1, "a": {"z": 1, "y": 2}});
        let b = serde_json::json!({"a": {"y": 2, "z": 1}, "b": 1});
        assert_eq!(canonicalize_json(&a), canonicalize_json(&b));
    }

    #[test]
    fn missing_file_uses_defaults_untouched() {
        let defaults = serde_json::json!({"queue": {"limit": 20}});
        let loaded = load_over_defaults(None, defaults.clone()).unwrap();
        assert_eq!(loaded.config_json, defaults);
    }

    #[test]
    fn feature_flag_env_override_takes_priority() {
        let registry = FeatureFlagRegistry::new().with_default("risk_gate", false, None);
        env::set_var("CONVERGE_FF_RISK_GATE", "1");
        assert!(registry.resolve("risk_gate").enabled);
        env::remove_var("CONVERGE_FF_RISK_GATE");
        assert!(!registry.resolve("risk_gate").enabled);
    }

    #[test]
    fn feature_flag_set_reports_change() {
        let mut registry = FeatureFlagRegistry::new().with_default("coherence", true, None);
        assert!(!registry.set("coherence", true, None));
        assert!(registry.set("coherence", false, None));
    }
}
