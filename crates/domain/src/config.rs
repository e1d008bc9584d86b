//! Environment-driven configuration.
//!
//! The router consumes no config file and no secrets: everything is an
//! environment variable with a usable default, read once at process
//! start by [`Config::from_env`]. `validate()` reports issues with a
//! severity so the binary can log warnings and refuse to start on
//! errors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::modules::ModuleRole;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub game_projects: GameProjectsConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            game_projects: GameProjectsConfig::default(),
            modules: ModulesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameProjectsConfig {
    /// Root directory holding one subdirectory per game project.
    #[serde(default = "d_projects_root")]
    pub root: PathBuf,
    /// Game project used by `POST /run/start`.
    #[serde(default = "d_default_project")]
    pub default_project: String,
}

impl Default for GameProjectsConfig {
    fn default() -> Self {
        Self {
            root: d_projects_root(),
            default_project: d_default_project(),
        }
    }
}

/// Module endpoint overrides, captured from `MODULE_<ROLE>_URL` at
/// process start. `None` means "no override"; the registry then falls
/// through to the fixed localhost default for the role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModulesConfig {
    #[serde(default)]
    pub intent_url: Option<String>,
    #[serde(default)]
    pub loremaster_url: Option<String>,
    #[serde(default)]
    pub default_simulator_url: Option<String>,
    #[serde(default)]
    pub arbiter_url: Option<String>,
    #[serde(default)]
    pub proser_url: Option<String>,
    /// Per-request timeout for module RPC, in milliseconds.
    #[serde(default = "d_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ModulesConfig {
    /// The env-provided base URL override for a role, if any.
    pub fn override_for(&self, role: ModuleRole) -> Option<&str> {
        match role {
            ModuleRole::IntentExtractor => self.intent_url.as_deref(),
            ModuleRole::Loremaster => self.loremaster_url.as_deref(),
            ModuleRole::DefaultSimulator => self.default_simulator_url.as_deref(),
            ModuleRole::Arbiter => self.arbiter_url.as_deref(),
            ModuleRole::Proser => self.proser_url.as_deref(),
        }
    }
}

// ── defaults ─────────────────────────────────────────────────────────

fn d_host() -> String {
    "127.0.0.1".to_owned()
}

fn d_port() -> u16 {
    8040
}

fn d_projects_root() -> PathBuf {
    PathBuf::from("./game_projects")
}

fn d_default_project() -> String {
    "default".to_owned()
}

fn d_timeout_ms() -> u64 {
    20_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests inject a map here).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match lookup("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("PORT is not a valid port number: {raw}")))?,
            None => d_port(),
        };
        let request_timeout_ms = match lookup("MODULE_REQUEST_TIMEOUT_MS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                Error::Config(format!("MODULE_REQUEST_TIMEOUT_MS is not an integer: {raw}"))
            })?,
            None => d_timeout_ms(),
        };

        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            server: ServerConfig {
                host: non_empty("HOST").unwrap_or_else(d_host),
                port,
            },
            game_projects: GameProjectsConfig {
                root: non_empty("GAME_PROJECTS_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(d_projects_root),
                default_project: non_empty("GAME_PROJECT_ID").unwrap_or_else(d_default_project),
            },
            modules: ModulesConfig {
                intent_url: non_empty(ModuleRole::IntentExtractor.env_var()),
                loremaster_url: non_empty(ModuleRole::Loremaster.env_var()),
                default_simulator_url: non_empty(ModuleRole::DefaultSimulator.env_var()),
                arbiter_url: non_empty(ModuleRole::Arbiter.env_var()),
                proser_url: non_empty(ModuleRole::Proser.env_var()),
                request_timeout_ms,
            },
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Config {
    /// Sanity-check the loaded configuration.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.modules.request_timeout_ms == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "MODULE_REQUEST_TIMEOUT_MS must be greater than zero".to_owned(),
            });
        } else if self.modules.request_timeout_ms < 1_000 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "MODULE_REQUEST_TIMEOUT_MS of {} ms is unusually low for LLM-backed modules",
                    self.modules.request_timeout_ms
                ),
            });
        }

        if !self.game_projects.root.exists() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "game projects root {} does not exist yet",
                    self.game_projects.root.display()
                ),
            });
        }

        for role in [
            ModuleRole::IntentExtractor,
            ModuleRole::Loremaster,
            ModuleRole::DefaultSimulator,
            ModuleRole::Arbiter,
            ModuleRole::Proser,
        ] {
            if let Some(url) = self.modules.override_for(role) {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    issues.push(ConfigIssue {
                        severity: ConfigSeverity::Error,
                        message: format!(
                            "{} must be an absolute http(s) URL, got {url:?}",
                            role.env_var()
                        ),
                    });
                }
            }
        }

        issues
    }
}
