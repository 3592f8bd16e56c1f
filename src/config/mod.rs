pub mod generate;
pub mod parse;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub use parse::{load_config, load_config_from_str, ConfigError};
pub use types::Config;

/// Matches `$env{VAR_NAME}` references
pub(crate) static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is a valid regex")
});

/// Expands `$env{VAR_NAME}` references. Unset variables are left in place so
/// the loader can report them.
pub fn expand_env_vars(text: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(text, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string()
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Resolves the config file path. Returns the first existing path from:
/// 1. Explicit path (if provided, with tilde expansion)
/// 2. ~/.config/pubsub/config.yml
/// 3. /etc/pubsub/config.yml
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(".config/pubsub/config.yml");
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from("/etc/pubsub/config.yml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars_in_storage_path() {
        std::env::set_var("PUBSUB_TEST_DATA_ROOT", "/srv/pubsub");
        let result = expand_env_vars("path: $env{PUBSUB_TEST_DATA_ROOT}/objects");
        assert_eq!(result, "path: /srv/pubsub/objects");
        std::env::remove_var("PUBSUB_TEST_DATA_ROOT");
    }

    #[test]
    fn test_expand_env_vars_leaves_unset_alone() {
        let result = expand_env_vars("$env{PUBSUB_TEST_NEVER_SET}/x");
        assert_eq!(result, "$env{PUBSUB_TEST_NEVER_SET}/x");
    }

    #[test]
    fn test_prefix_placeholders_are_not_env_vars() {
        let result = expand_env_vars("{key:source}/date={yyyy}-{MM}-{dd}/");
        assert_eq!(result, "{key:source}/date={yyyy}-{MM}-{dd}/");
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/pubsub/data")), home.join("pubsub/data"));
            assert_eq!(expand_tilde(Path::new("~")), home);
        }
        assert_eq!(expand_tilde(Path::new("/var/lib/pubsub")), Path::new("/var/lib/pubsub"));
        assert_eq!(expand_tilde(Path::new("relative/dir")), Path::new("relative/dir"));
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let resolved = resolve_config_path(Some(Path::new("/opt/pubsub.yml")));
        assert_eq!(resolved, Some(PathBuf::from("/opt/pubsub.yml")));
    }
}
