use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Values used when the CLI is invoked without explicit run parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default = "default_org")]
    pub org: String,
    #[serde(default = "default_stack")]
    pub stack: String,
    #[serde(default = "default_flow_spec")]
    pub flow_spec: String,
    #[serde(default = "default_run_name")]
    pub run_name: String,
}

fn default_org() -> String {
    "aitomatic".to_string()
}

fn default_stack() -> String {
    "stack".to_string()
}

fn default_flow_spec() -> String {
    "test.yml".to_string()
}

fn default_run_name() -> String {
    "test01".to_string()
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            org: default_org(),
            stack: default_stack(),
            flow_spec: default_flow_spec(),
            run_name: default_run_name(),
        }
    }
}

// ---------------------------------------------------------------------------
// PulumiConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulumiConfig {
    /// Binary name or path of the Pulumi CLI.
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Exported as `PULUMI_BACKEND_URL` (e.g. `file://~`, `s3://bucket`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<String>,
    /// Refresh stack state before every operation.
    #[serde(default = "default_refresh")]
    pub refresh: bool,
    /// Extra environment passed to every pulumi subprocess.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

fn default_binary() -> String {
    "pulumi".to_string()
}

fn default_refresh() -> bool {
    true
}

impl Default for PulumiConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            backend_url: None,
            refresh: default_refresh(),
            env: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stack config values
// ---------------------------------------------------------------------------

/// A single stack config value; plain strings are non-secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Plain(String),
    Detailed {
        value: String,
        #[serde(default)]
        secret: bool,
    },
}

impl ConfigValue {
    pub fn value(&self) -> &str {
        match self {
            ConfigValue::Plain(v) => v,
            ConfigValue::Detailed { value, .. } => value,
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, ConfigValue::Detailed { secret: true, .. })
    }
}

/// Stack config keyed by Pulumi config key (e.g. `aws:region`).
pub type ConfigMap = BTreeMap<String, ConfigValue>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub config: ConfigMap,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub pulumi: PulumiConfig,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub projects: HashMap<String, ProjectConfig>,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            defaults: Defaults::default(),
            pulumi: PulumiConfig::default(),
            projects: HashMap::new(),
        }
    }
}

impl Config {
    /// Load `melody.yaml` from `root`, or the built-in defaults if absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Stack config for `project`, if any is configured.
    pub fn config_for(&self, project: &str) -> Option<&ConfigMap> {
        self.projects
            .get(project)
            .map(|p| &p.config)
            .filter(|c| !c.is_empty())
    }

    /// Copy of the config with secret values replaced, safe to print.
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        for project in cfg.projects.values_mut() {
            for value in project.config.values_mut() {
                if value.is_secret() {
                    *value = ConfigValue::Detailed {
                        value: "[secret]".to_string(),
                        secret: true,
                    };
                }
            }
        }
        cfg
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for (field, value) in [
            ("defaults.org", &self.defaults.org),
            ("defaults.stack", &self.defaults.stack),
        ] {
            if crate::stack::validate_component(value).is_err() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "{field} '{value}' cannot be used in a stack name (no '.' or '/')"
                    ),
                });
            }
        }

        if self.pulumi.binary.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "pulumi.binary is empty".to_string(),
            });
        }

        let mut names: Vec<&String> = self.projects.keys().collect();
        names.sort();
        for name in names {
            if !paths::is_valid_project(name) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("projects.{name} is not a valid project identifier"),
                });
            }
            for (key, value) in &self.projects[name].config {
                if value.value().is_empty() {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!("projects.{name}.config.{key} has an empty value"),
                    });
                }
            }
        }

        if self.pulumi.env.contains_key("PULUMI_BACKEND_URL") && self.pulumi.backend_url.is_some()
        {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "PULUMI_BACKEND_URL set in both pulumi.env and pulumi.backend_url; \
                          backend_url wins"
                    .to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
