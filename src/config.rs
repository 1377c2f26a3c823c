//! Runtime configuration.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::scope::{ScopeDescriptor, ScopeSet};

/// Configuration read once when a `Runtime` is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub scopes: Vec<ScopeDescriptor>,
    /// Compile the platform library (collections, math, relations) at startup.
    pub load_platform: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { scopes: Vec::new(), load_platform: true }
    }
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_scope(mut self, scope: ScopeDescriptor) -> Self {
        self.scopes.push(scope);
        self
    }

    pub fn scope_set(&self) -> Result<ScopeSet> {
        ScopeSet::new(&self.scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_load_platform() {
        let config = RuntimeConfig::from_json("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert!(config.load_platform);
    }

    #[test]
    fn test_scopes_from_json() {
        let config = RuntimeConfig::from_json(
            r#"{"scopes":[{"name":"core","pattern":"core(::.*)?"},{"name":"app","pattern":"app(::.*)?","dependencies":["core"]}],"load_platform":false}"#,
        )
        .unwrap();
        assert!(!config.load_platform);
        assert_eq!(config.scopes[1].dependencies, vec!["core".to_string()]);
        let scopes = config.scope_set().unwrap();
        assert!(scopes.is_visible("app::x", "core::y"));
        let back = RuntimeConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(matches!(RuntimeConfig::from_json("{\"scopes\": 3}"), Err(crate::Error::Json(_))));
    }
}
