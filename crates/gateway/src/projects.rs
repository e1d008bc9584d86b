//! Game-project manifest loading.
//!
//! A game project is a directory under the configured root. Its
//! `manifest.json` is returned to clients verbatim; the router itself
//! only reads the `modules` map (role → endpoint binding) out of it.
//! A project without a manifest file still loads with a minimal
//! synthesized manifest, since only the directory is authoritative.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use loom_domain::error::{Error, Result};

/// A loaded game project.
#[derive(Debug, Clone)]
pub struct GameProject {
    pub id: String,
    /// The manifest JSON, verbatim.
    pub manifest: Value,
    /// Module endpoint bindings from `manifest.modules`.
    pub module_bindings: HashMap<String, String>,
}

/// Load a game project by ID. Fails with `GameProjectNotFound` when
/// the directory does not exist.
pub fn load_game_project(projects_root: &Path, id: &str) -> Result<GameProject> {
    let project_dir = projects_root.join(id);
    if !project_dir.is_dir() {
        return Err(Error::GameProjectNotFound(id.to_owned()));
    }

    let manifest_path = project_dir.join("manifest.json");
    let manifest: Value = if manifest_path.is_file() {
        let raw = std::fs::read_to_string(&manifest_path)?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Other(format!("manifest for {id} is not valid JSON: {e}")))?
    } else {
        serde_json::json!({ "id": id })
    };

    let module_bindings = manifest
        .get("modules")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(role, binding)| {
                    binding.as_str().map(|b| (role.clone(), b.to_owned()))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(GameProject {
        id: id.to_owned(),
        manifest,
        module_bindings,
    })
}
