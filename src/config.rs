use std::path::Path;

use facet::Facet;

use crate::error::GceError;
use crate::vm::VmRef;

// ── YAML model ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
struct RawConfig {
    #[facet(rename = "default-project")]
    default_project: String,
    #[facet(rename = "default-zone")]
    default_zone: String,
    vm: Vec<RawVm>,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
struct RawVm {
    name: String,
    project: String,
    zone: String,
}

// ── Config ────────────────────────────────────────────────

/// Resolved configuration: every VM carries a concrete project and zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub default_project: String,
    pub default_zone: String,
    /// VMs in file order.
    pub vms: Vec<VmRef>,
}

impl Config {
    pub fn vm(&self, name: &str) -> Option<&VmRef> {
        self.vms.iter().find(|vm| vm.name == name)
    }

    /// Look up every name, failing on the first one that is not configured.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<VmRef>, GceError> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.vm(name).cloned().ok_or_else(|| GceError::UnknownVm {
                    name: name.to_string(),
                })
            })
            .collect()
    }
}

fn resolve_config(raw: RawConfig) -> Result<Config, GceError> {
    let mut vms = Vec::with_capacity(raw.vm.len());

    for (idx, entry) in raw.vm.into_iter().enumerate() {
        if entry.name.is_empty() {
            return Err(GceError::Validation {
                message: format!("vm[{idx}]: name must not be empty"),
            });
        }

        let project = if entry.project.is_empty() {
            raw.default_project.clone()
        } else {
            entry.project
        };
        let zone = if entry.zone.is_empty() {
            raw.default_zone.clone()
        } else {
            entry.zone
        };

        if project.is_empty() {
            return Err(GceError::Validation {
                message: format!(
                    "VM {}: no project (set `project` or `default-project`)",
                    entry.name
                ),
            });
        }
        if zone.is_empty() {
            return Err(GceError::Validation {
                message: format!("VM {}: no zone (set `zone` or `default-zone`)", entry.name),
            });
        }

        vms.push(VmRef {
            name: entry.name,
            project,
            zone,
        });
    }

    Ok(Config {
        default_project: raw.default_project,
        default_zone: raw.default_zone,
        vms,
    })
}

// ── public API ────────────────────────────────────────────

/// Parse config text; `path` is only used in error messages.
pub fn parse_config(contents: &str, path: &Path) -> Result<Config, GceError> {
    let raw: RawConfig = facet_yaml::from_str(contents).map_err(|e| GceError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    resolve_config(raw)
}

pub fn load_config(path: &Path) -> Result<Config, GceError> {
    let contents = std::fs::read_to_string(path).map_err(|source| GceError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;
    let config = parse_config(&contents, path)?;
    tracing::debug!(path = %path.display(), vms = config.vms.len(), "config loaded");
    Ok(config)
}
