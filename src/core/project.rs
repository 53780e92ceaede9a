//! Project resolution from the hosting page's hostname
//!
//! The first dot-delimited label of the hostname names the project. A small
//! alias table maps known labels onto canonical project ids; anything else is
//! passed through unchanged.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Built-in label aliases
static DEFAULT_ALIASES: Lazy<HashMap<String, String>> = Lazy::new(|| {
    [("jlm", "jlm-app"), ("www", "jlm-app")]
        .into_iter()
        .map(|(label, project)| (label.to_string(), project.to_string()))
        .collect()
});

/// Built-in alias table (label → project id)
pub fn default_aliases() -> &'static HashMap<String, String> {
    &DEFAULT_ALIASES
}

/// Resolve a hostname to a project id using the built-in alias table
///
/// `"jlm-app.robinswood.io"` resolves to `"jlm-app"`; `"localhost"` has no
/// dot-delimited label and resolves to `None`.
pub fn resolve_project(hostname: &str) -> Option<String> {
    resolve_project_with(hostname, default_aliases())
}

/// Resolve a hostname to a project id using an explicit alias table
pub fn resolve_project_with(hostname: &str, aliases: &HashMap<String, String>) -> Option<String> {
    let (label, _rest) = hostname.trim().split_once('.')?;
    if label.is_empty() {
        return None;
    }

    // Aliases match case-insensitively; anything else is returned as written
    Some(
        aliases
            .get(&label.to_lowercase())
            .cloned()
            .unwrap_or_else(|| label.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_label_passes_through() {
        assert_eq!(
            resolve_project("jlm-app.robinswood.io"),
            Some("jlm-app".to_string())
        );
        assert_eq!(
            resolve_project("dashboard.example.com"),
            Some("dashboard".to_string())
        );
    }

    #[test]
    fn test_aliases_map_to_canonical_id() {
        assert_eq!(resolve_project("jlm.robinswood.io"), Some("jlm-app".to_string()));
        assert_eq!(resolve_project("www.robinswood.io"), Some("jlm-app".to_string()));
    }

    #[test]
    fn test_hosts_without_label_resolve_to_none() {
        assert_eq!(resolve_project("localhost"), None);
        assert_eq!(resolve_project(""), None);
        assert_eq!(resolve_project(".hidden"), None);
    }

    #[test]
    fn test_custom_alias_table() {
        let mut aliases = HashMap::new();
        aliases.insert("staging".to_string(), "shop".to_string());
        assert_eq!(
            resolve_project_with("staging.shop.io", &aliases),
            Some("shop".to_string())
        );
        assert_eq!(
            resolve_project_with("jlm.robinswood.io", &aliases),
            Some("jlm".to_string())
        );
    }

    #[test]
    fn test_label_is_case_insensitive() {
        assert_eq!(resolve_project("JLM.Robinswood.io"), Some("jlm-app".to_string()));
    }

    #[test]
    fn test_unknown_label_keeps_its_case() {
        assert_eq!(
            resolve_project("Dashboard.example.com"),
            Some("Dashboard".to_string())
        );
    }
}
