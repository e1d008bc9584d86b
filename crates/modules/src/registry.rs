//! Role-to-endpoint resolution.
//!
//! Precedence, highest first:
//! 1. the game-project manifest binding, when it is an absolute
//!    http(s) URL;
//! 2. the `MODULE_<ROLE>_URL` override captured in [`ModulesConfig`];
//! 3. the fixed localhost default for the role.
//!
//! Resolution is a pure function of its inputs; nothing here touches
//! the network.

use loom_domain::config::ModulesConfig;
use loom_domain::modules::ModuleRole;

/// Whether a manifest binding counts as a usable absolute URL.
fn is_absolute_http(binding: &str) -> bool {
    binding.starts_with("http://") || binding.starts_with("https://")
}

/// Resolve the base URL for a module role.
///
/// Non-URL bindings (module names, relative paths) are not errors;
/// they simply fall through to the environment override and default.
pub fn resolve(role: ModuleRole, binding: Option<&str>, modules: &ModulesConfig) -> String {
    if let Some(binding) = binding {
        if is_absolute_http(binding) {
            return binding.trim_end_matches('/').to_owned();
        }
    }
    if let Some(url) = modules.override_for(role) {
        return url.trim_end_matches('/').to_owned();
    }
    role.default_base_url().to_owned()
}
