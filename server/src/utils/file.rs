//! Path helpers

use std::path::PathBuf;

/// Expand `~` and make relative paths absolute against the working directory.
/// The path is not canonicalized.
pub fn expand_path(path: &str) -> PathBuf {
    let path = path.trim();
    if path.is_empty() {
        return std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    }

    let expanded = match path.strip_prefix('~') {
        Some("") => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        Some(rest) if rest.starts_with('/') || rest.starts_with('\\') => dirs::home_dir()
            .map(|home| home.join(&rest[1..]))
            .unwrap_or_else(|| PathBuf::from(path)),
        _ => PathBuf::from(path),
    };

    if expanded.is_relative() {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    } else {
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_unchanged() {
        assert_eq!(
            expand_path("  /etc/precalc.json "),
            PathBuf::from("/etc/precalc.json")
        );
    }

    #[test]
    fn test_relative_joined_to_cwd() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(expand_path("conf/precalc.json"), cwd.join("conf/precalc.json"));
        assert_eq!(expand_path(""), cwd);
    }

    #[test]
    fn test_tilde_expanded() {
        let result = expand_path("~/.precalc/precalc.json");
        assert!(!result.to_string_lossy().contains('~'));
        assert!(result.ends_with(".precalc/precalc.json"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~"), home);
        }
    }

    #[test]
    fn test_tilde_inside_name_kept() {
        let result = expand_path("~backup/precalc.json");
        assert!(result.ends_with("~backup/precalc.json"));
    }
}
