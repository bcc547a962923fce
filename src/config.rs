use std::path::PathBuf;

pub const LOG_ENV: &str = "COMPETENCYD_LOG";
pub const LOG_JSON_ENV: &str = "COMPETENCYD_LOG_JSON";
pub const WORKSPACE_ENV: &str = "COMPETENCYD_WORKSPACE";

const DEFAULT_LOG_FILTER: &str = "competencyd=warn";

/// Process-level settings read from the environment at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub log_filter: String,
    pub log_json: bool,
    pub workspace: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_json: false,
            workspace: None,
        }
    }
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let log_filter = non_empty(LOG_ENV)
            .map(|level| {
                // A bare level applies to this crate only.
                if level.contains('=') || level.contains(',') {
                    level
                } else {
                    format!("competencyd={}", level)
                }
            })
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let log_json = non_empty(LOG_JSON_ENV)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self {
            log_filter,
            log_json,
            workspace: non_empty(WORKSPACE_ENV).map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(vars: &[(&str, &str)]) -> DaemonConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DaemonConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(cfg(&[]), DaemonConfig::default());
    }

    #[test]
    fn bare_level_is_scoped_to_crate() {
        assert_eq!(cfg(&[(LOG_ENV, "debug")]).log_filter, "competencyd=debug");
        assert_eq!(
            cfg(&[(LOG_ENV, "info,rusqlite=warn")]).log_filter,
            "info,rusqlite=warn"
        );
    }

    #[test]
    fn json_flag_and_workspace() {
        let c = cfg(&[(LOG_JSON_ENV, "TRUE"), (WORKSPACE_ENV, " /tmp/ws ")]);
        assert!(c.log_json);
        assert_eq!(c.workspace, Some(PathBuf::from("/tmp/ws")));
        assert!(!cfg(&[(LOG_JSON_ENV, "0")]).log_json);
        assert_eq!(cfg(&[(WORKSPACE_ENV, "  ")]).workspace, None);
    }
}
