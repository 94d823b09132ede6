//! Runtime settings read from `FEDTYPES_*` environment variables.

use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_WATCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MEMORY_WATCH_CAP: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Kubeconfig context of the federation API server; `None` uses the current context.
    pub federation_context: Option<String>,
    pub namespace: String,
    pub watch_timeout: Duration,
    pub memory_watch_cap: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            federation_context: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            watch_timeout: Duration::from_secs(DEFAULT_WATCH_TIMEOUT_SECS),
            memory_watch_cap: DEFAULT_MEMORY_WATCH_CAP,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self { Self::from_lookup(|key| std::env::var(key).ok()) }

    /// Unset, empty or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            federation_context: get("FEDTYPES_FEDERATION_CONTEXT"),
            namespace: get("FEDTYPES_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            watch_timeout: Duration::from_secs(
                get("FEDTYPES_WATCH_TIMEOUT_SECS").and_then(|s| s.parse::<u64>().ok()).filter(|s| *s > 0).unwrap_or(DEFAULT_WATCH_TIMEOUT_SECS),
            ),
            memory_watch_cap: get("FEDTYPES_MEMORY_WATCH_CAP").and_then(|s| s.parse::<usize>().ok()).filter(|c| *c > 0).unwrap_or(DEFAULT_MEMORY_WATCH_CAP),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Settings {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(from(&[]), Settings::default());
    }

    #[test]
    fn reads_all_keys() {
        let s = from(&[
            ("FEDTYPES_FEDERATION_CONTEXT", "fed"),
            ("FEDTYPES_NAMESPACE", "team-a"),
            ("FEDTYPES_WATCH_TIMEOUT_SECS", "5"),
            ("FEDTYPES_MEMORY_WATCH_CAP", "16"),
        ]);
        assert_eq!(s.federation_context.as_deref(), Some("fed"));
        assert_eq!(s.namespace, "team-a");
        assert_eq!(s.watch_timeout, Duration::from_secs(5));
        assert_eq!(s.memory_watch_cap, 16);
    }

    #[test]
    fn bad_values_fall_back() {
        let s = from(&[
            ("FEDTYPES_FEDERATION_CONTEXT", "  "),
            ("FEDTYPES_WATCH_TIMEOUT_SECS", "soon"),
            ("FEDTYPES_MEMORY_WATCH_CAP", "0"),
        ]);
        assert_eq!(s, Settings::default());
    }
}
