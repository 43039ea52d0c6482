//! Configuration types for Lattice.
//!
//! Configuration comes from an optional YAML file and is then overlaid with
//! environment controls, so a bare environment is enough to run a session.

use crate::kernel::EventKind;
use lattice_proto::ExecutionStrategy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatticeConfig {
    /// The primary CLI, driven through the escalation chain.
    #[serde(default)]
    pub primary: PrimaryCliConfig,

    /// The secondary CLI, driven with a simple argument/stdin retry.
    #[serde(default)]
    pub secondary: SecondaryCliConfig,

    /// Which provider each role speaks through.
    #[serde(default)]
    pub roles: RolesConfig,

    /// Defaults for mediated sessions.
    #[serde(default)]
    pub session: SessionDefaults,
}

impl LatticeConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path_ref)?;
        let config: Self = serde_yaml::from_str(&content)?;
        debug!(
            primary = %config.primary.command,
            secondary = %config.secondary.command,
            role_a = %config.roles.role_a,
            role_b = %config.roles.role_b,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlays environment controls onto this configuration.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Overlays environment controls, resolving variables through `lookup`.
    ///
    /// Recognized variables:
    /// - `S1_PROVIDER`, `S2_PROVIDER`: per-role provider ids
    /// - `CODEX_CMD`: primary executable
    /// - `FORCE_PTY`: start the chain at the injecting embedded pty
    /// - `DISABLE_EMBEDDED_PTY`: never use the embedded pty
    /// - `LATTICE_TIMEOUT_SECS`: per-attempt deadline for both CLIs
    /// - `GEMINI_MOCK`, `GEMINI_CMD`, `GEMINI_ARGS`, `GEMINI_STDIN`: secondary CLI
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(provider) = non_empty("S1_PROVIDER") {
            debug!(from = "S1_PROVIDER", value = %provider, "Applying env override");
            self.roles.role_a = provider;
        }
        if let Some(provider) = non_empty("S2_PROVIDER") {
            debug!(from = "S2_PROVIDER", value = %provider, "Applying env override");
            self.roles.role_b = provider;
        }
        if let Some(cmd) = non_empty("CODEX_CMD") {
            self.primary.command = cmd;
        }
        if let Some(flag) = lookup("FORCE_PTY") {
            self.primary.force_pty = flag_enabled(&flag);
        }
        if let Some(flag) = lookup("DISABLE_EMBEDDED_PTY") {
            self.primary.disable_embedded_pty = flag_enabled(&flag);
        }
        if let Some(secs) = non_empty("LATTICE_TIMEOUT_SECS").and_then(|s| s.trim().parse().ok())
        {
            self.primary.timeout_secs = secs;
            self.secondary.timeout_secs = secs;
        }

        if let Some(flag) = lookup("GEMINI_MOCK") {
            self.secondary.mock = flag.trim() == "1";
        }
        if let Some(cmd) = non_empty("GEMINI_CMD") {
            self.secondary.command = cmd;
        }
        if let Some(args) = lookup("GEMINI_ARGS") {
            self.secondary.args = shlex::split(args.trim()).unwrap_or_else(|| {
                args.split_whitespace().map(str::to_string).collect()
            });
        }
        if let Some(flag) = lookup("GEMINI_STDIN") {
            self.secondary.stdin_mode = flag_enabled(&flag);
        }
    }

    /// Checks for values that will run but probably not as intended.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if !(0.0..=1.0).contains(&self.session.strain_threshold) {
            warnings.push(ConfigWarning::InvalidValue {
                field: "session.strain_threshold".to_string(),
                message: format!(
                    "{} is outside [0, 1]; strain never leaves that range",
                    self.session.strain_threshold
                ),
            });
        }
        if self.session.turns == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "session.turns".to_string(),
                message: "0 turns still runs the opening proposal".to_string(),
            });
        }
        if self.primary.force_pty && self.primary.disable_embedded_pty {
            warnings.push(ConfigWarning::Conflict {
                fields: "primary.force_pty, primary.disable_embedded_pty".to_string(),
                message: "only the external wrapper will be tried".to_string(),
            });
        }
        if self.primary.timeout_secs == 0 || self.secondary.timeout_secs == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "timeout_secs".to_string(),
                message: "a zero deadline times out every attempt".to_string(),
            });
        }

        warnings
    }
}

/// Interprets an environment flag. Empty, `0`, `false`, `no` and `off` are off.
fn flag_enabled(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

/// Primary CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryCliConfig {
    /// Executable name or path.
    #[serde(default = "default_primary_command")]
    pub command: String,

    /// Arguments placed before the prompt.
    #[serde(default)]
    pub args: Vec<String>,

    /// Human-readable name used in tagged error text.
    #[serde(default = "default_primary_label")]
    pub label: String,

    /// Per-attempt deadline in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Start the chain at the most permissive embedded strategy.
    #[serde(default)]
    pub force_pty: bool,

    /// Restrict escalation to strategies that do not allocate a pty in-process.
    #[serde(default)]
    pub disable_embedded_pty: bool,

    /// External pty wrapper executable.
    #[serde(default = "default_wrapper_command")]
    pub wrapper_command: String,

    /// Extra error markers, matched case-insensitively.
    #[serde(default)]
    pub error_markers: Vec<String>,
}

fn default_primary_command() -> String {
    "codex".to_string()
}

fn default_primary_label() -> String {
    "Codex".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_wrapper_command() -> String {
    "script".to_string()
}

impl Default for PrimaryCliConfig {
    fn default() -> Self {
        Self {
            command: default_primary_command(),
            args: Vec::new(),
            label: default_primary_label(),
            timeout_secs: default_timeout_secs(),
            force_pty: false,
            disable_embedded_pty: false,
            wrapper_command: default_wrapper_command(),
            error_markers: Vec::new(),
        }
    }
}

impl PrimaryCliConfig {
    /// The ordered escalation chain these settings select.
    pub fn strategy_chain(&self) -> Vec<ExecutionStrategy> {
        match (self.force_pty, self.disable_embedded_pty) {
            (true, true) => vec![ExecutionStrategy::ExternalPtyWrapper { inject: true }],
            (true, false) => vec![
                ExecutionStrategy::EmbeddedPty { inject: true },
                ExecutionStrategy::ExternalPtyWrapper { inject: true },
            ],
            (false, true) => vec![
                ExecutionStrategy::Direct,
                ExecutionStrategy::ExternalPtyWrapper { inject: false },
                ExecutionStrategy::ExternalPtyWrapper { inject: true },
            ],
            (false, false) => ExecutionStrategy::default_chain(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Secondary CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryCliConfig {
    #[serde(default = "default_secondary_command")]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_secondary_label")]
    pub label: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Try the input-stream (stdin) mode first instead of argument mode.
    #[serde(default)]
    pub stdin_mode: bool,

    /// Answer with a deterministic echo instead of running anything.
    #[serde(default)]
    pub mock: bool,
}

fn default_secondary_command() -> String {
    "gemini".to_string()
}

fn default_secondary_label() -> String {
    "Gemini".to_string()
}

impl Default for SecondaryCliConfig {
    fn default() -> Self {
        Self {
            command: default_secondary_command(),
            args: Vec::new(),
            label: default_secondary_label(),
            timeout_secs: default_timeout_secs(),
            stdin_mode: false,
            mock: false,
        }
    }
}

impl SecondaryCliConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Provider id per role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolesConfig {
    #[serde(default = "default_provider")]
    pub role_a: String,

    #[serde(default = "default_provider")]
    pub role_b: String,
}

fn default_provider() -> String {
    "codex".to_string()
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            role_a: default_provider(),
            role_b: default_provider(),
        }
    }
}

/// Defaults applied when a session request leaves a field unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefaults {
    #[serde(default = "default_modal")]
    pub modal: String,

    #[serde(default = "default_event")]
    pub event: String,

    #[serde(default)]
    pub event_kind: EventKind,

    #[serde(default = "default_turns")]
    pub turns: u32,

    #[serde(default = "default_strain_threshold")]
    pub strain_threshold: f64,

    /// Kernel document consulted for signals and resonance.
    #[serde(default = "default_kernel_path")]
    pub kernel_path: String,
}

fn default_modal() -> String {
    "visual".to_string()
}

fn default_event() -> String {
    "amplify_brand_colours".to_string()
}

fn default_turns() -> u32 {
    6
}

fn default_strain_threshold() -> f64 {
    0.25
}

fn default_kernel_path() -> String {
    "memory/brand_identity_kernel.json".to_string()
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            modal: default_modal(),
            event: default_event(),
            event_kind: EventKind::default(),
            turns: default_turns(),
            strain_threshold: default_strain_threshold(),
            kernel_path: default_kernel_path(),
        }
    }
}

/// Configuration warnings emitted during validation.
#[derive(Debug, Clone)]
pub enum ConfigWarning {
    /// Field has an invalid value.
    InvalidValue { field: String, message: String },
    /// Two settings cancel each other out.
    Conflict { fields: String, message: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::InvalidValue { field, message } => {
                write!(f, "Warning [{}]: {}", field, message)
            }
            ConfigWarning::Conflict { fields, message } => {
                write!(f, "Warning [{}]: {}", fields, message)
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = LatticeConfig::default();
        assert_eq!(config.primary.command, "codex");
        assert_eq!(config.primary.timeout_secs, 120);
        assert_eq!(config.secondary.command, "gemini");
        assert_eq!(config.roles.role_a, "codex");
        assert_eq!(config.roles.role_b, "codex");
        assert_eq!(config.session.turns, 6);
        assert!((config.session.strain_threshold - 0.25).abs() < f64::EPSILON);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
primary:
  command: "/opt/bin/codex"
  args: ["exec"]
  timeout_secs: 30
secondary:
  stdin_mode: true
roles:
  role_b: "gemini"
session:
  event_kind: "inputs"
  turns: 4
"#;
        let config: LatticeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.primary.command, "/opt/bin/codex");
        assert_eq!(config.primary.args, vec!["exec"]);
        assert_eq!(config.primary.timeout(), Duration::from_secs(30));
        assert_eq!(config.primary.label, "Codex");
        assert!(config.secondary.stdin_mode);
        assert_eq!(config.roles.role_a, "codex");
        assert_eq!(config.roles.role_b, "gemini");
        assert_eq!(config.session.event_kind, EventKind::Inputs);
        assert_eq!(config.session.turns, 4);
        assert_eq!(config.session.modal, "visual");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lattice.yml");
        std::fs::write(&path, "roles:\n  role_a: mock\n").unwrap();
        let config = LatticeConfig::from_file(&path).unwrap();
        assert_eq!(config.roles.role_a, "mock");

        let missing = LatticeConfig::from_file(dir.path().join("nope.yml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_env_overlay() {
        let mut config = LatticeConfig::default();
        config.apply_env_with(env(&[
            ("S1_PROVIDER", "mock"),
            ("S2_PROVIDER", "gemini"),
            ("GEMINI_MOCK", "1"),
            ("GEMINI_CMD", "gemini-cli"),
            ("GEMINI_ARGS", "--model \"gemini 2\""),
            ("GEMINI_STDIN", "true"),
            ("FORCE_PTY", "1"),
            ("LATTICE_TIMEOUT_SECS", "9"),
        ]));

        assert_eq!(config.roles.role_a, "mock");
        assert_eq!(config.roles.role_b, "gemini");
        assert!(config.secondary.mock);
        assert_eq!(config.secondary.command, "gemini-cli");
        assert_eq!(config.secondary.args, vec!["--model", "gemini 2"]);
        assert!(config.secondary.stdin_mode);
        assert!(config.primary.force_pty);
        assert_eq!(config.primary.timeout_secs, 9);
        assert_eq!(config.secondary.timeout_secs, 9);
    }

    #[test]
    fn test_env_ignores_empty_provider_and_off_flags() {
        let mut config = LatticeConfig::default();
        config.apply_env_with(env(&[
            ("S1_PROVIDER", "  "),
            ("FORCE_PTY", "0"),
            ("DISABLE_EMBEDDED_PTY", "false"),
            ("GEMINI_MOCK", "yes"),
        ]));
        assert_eq!(config.roles.role_a, "codex");
        assert!(!config.primary.force_pty);
        assert!(!config.primary.disable_embedded_pty);
        // Only the literal "1" enables the secondary mock.
        assert!(!config.secondary.mock);
    }

    #[test]
    fn test_strategy_chain_variants() {
        let mut primary = PrimaryCliConfig::default();
        assert_eq!(primary.strategy_chain(), ExecutionStrategy::default_chain());

        primary.force_pty = true;
        assert_eq!(
            primary.strategy_chain(),
            vec![
                ExecutionStrategy::EmbeddedPty { inject: true },
                ExecutionStrategy::ExternalPtyWrapper { inject: true },
            ]
        );

        primary.force_pty = false;
        primary.disable_embedded_pty = true;
        let chain = primary.strategy_chain();
        assert_eq!(chain[0], ExecutionStrategy::Direct);
        assert!(
            chain
                .iter()
                .all(|s| !matches!(s, ExecutionStrategy::EmbeddedPty { .. }))
        );
    }

    #[test]
    fn test_validate_flags_problems() {
        let mut config = LatticeConfig::default();
        config.session.strain_threshold = 1.5;
        config.session.turns = 0;
        config.primary.force_pty = true;
        config.primary.disable_embedded_pty = true;

        let warnings = config.validate();
        assert_eq!(warnings.len(), 3);
        assert!(
            warnings
                .iter()
                .any(|w| w.to_string().contains("session.strain_threshold"))
        );
    }
}
