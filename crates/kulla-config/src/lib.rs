use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "kulla.json";
pub const DEFAULT_PROMPT: &str = "kulla> ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSetting {
    Off,
    Concise,
    #[default]
    Normal,
    Verbose,
}

impl FeedbackSetting {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "off" | "silent" => Some(Self::Off),
            "concise" => Some(Self::Concise),
            "normal" | "default" => Some(Self::Normal),
            "verbose" => Some(Self::Verbose),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Concise => "concise",
            Self::Normal => "normal",
            Self::Verbose => "verbose",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub feedback: Option<FeedbackSetting>,
    /// Script evaluated before the session accepts input.
    pub startup: Option<PathBuf>,
    pub no_startup: Option<bool>,
    pub class_path: Option<Vec<PathBuf>>,
    pub prompt: Option<String>,
    pub prefs_dir: Option<PathBuf>,
    pub verbose: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvConfig {
    pub feedback: Option<FeedbackSetting>,
    pub startup: Option<PathBuf>,
    pub no_startup: Option<bool>,
    pub class_path: Option<Vec<PathBuf>>,
    pub prompt: Option<String>,
    pub prefs_dir: Option<PathBuf>,
    pub verbose: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliRunOverrides {
    pub feedback: Option<FeedbackSetting>,
    pub startup: Option<PathBuf>,
    pub no_startup: Option<bool>,
    /// Replaces configured entries when not empty.
    pub class_path: Vec<PathBuf>,
    pub prompt: Option<String>,
    pub verbose: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDefaults {
    pub feedback: FeedbackSetting,
    pub startup: Option<PathBuf>,
    pub no_startup: bool,
    pub class_path: Vec<PathBuf>,
    pub prompt: String,
    pub prefs_dir: PathBuf,
    pub verbose: bool,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            feedback: FeedbackSetting::Normal,
            startup: None,
            no_startup: false,
            class_path: Vec::new(),
            prompt: DEFAULT_PROMPT.to_string(),
            prefs_dir: default_prefs_dir(),
            verbose: false,
        }
    }
}

/// `~/.kulla`, or `.kulla` in the working directory without a home.
pub fn default_prefs_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".kulla"))
        .unwrap_or_else(|| PathBuf::from(".kulla"))
}

pub fn load_file_config(explicit_path: Option<&Path>, cwd: &Path) -> Result<Option<FileConfig>> {
    let path = match explicit_path {
        Some(p) => p.to_path_buf(),
        None => {
            let candidate = cwd.join(CONFIG_FILE_NAME);
            if !candidate.exists() {
                return Ok(None);
            }
            candidate
        }
    };

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed reading config file {}", path.display()))?;
    let parsed: FileConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing config file {}", path.display()))?;
    Ok(Some(parsed))
}

impl EnvConfig {
    pub fn from_current_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads `KULLA_*` settings through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            feedback: lookup("KULLA_FEEDBACK").and_then(|v| FeedbackSetting::parse(&v)),
            startup: lookup("KULLA_STARTUP").map(PathBuf::from),
            no_startup: lookup("KULLA_NO_STARTUP").and_then(|v| parse_bool(&v)),
            class_path: lookup("KULLA_CLASS_PATH")
                .map(|v| env::split_paths(&v).filter(|p| !p.as_os_str().is_empty()).collect()),
            prompt: lookup("KULLA_PROMPT"),
            prefs_dir: lookup("KULLA_PREFS_DIR").map(PathBuf::from),
            verbose: lookup("KULLA_VERBOSE").and_then(|v| parse_bool(&v)),
        }
    }
}

pub fn resolve_run_defaults(
    cli: &CliRunOverrides,
    env_cfg: &EnvConfig,
    file_cfg: Option<&FileConfig>,
) -> RunDefaults {
    let base = RunDefaults::default();

    let feedback = cli
        .feedback
        .or(env_cfg.feedback)
        .or(file_cfg.and_then(|c| c.feedback))
        .unwrap_or(base.feedback);

    let startup = cli
        .startup
        .clone()
        .or_else(|| env_cfg.startup.clone())
        .or_else(|| file_cfg.and_then(|c| c.startup.clone()))
        .or(base.startup);

    let no_startup = cli
        .no_startup
        .or(env_cfg.no_startup)
        .or(file_cfg.and_then(|c| c.no_startup))
        .unwrap_or(base.no_startup);

    let class_path = if cli.class_path.is_empty() {
        env_cfg
            .class_path
            .clone()
            .or_else(|| file_cfg.and_then(|c| c.class_path.clone()))
            .unwrap_or(base.class_path)
    } else {
        cli.class_path.clone()
    };

    let prompt = cli
        .prompt
        .clone()
        .or_else(|| env_cfg.prompt.clone())
        .or_else(|| file_cfg.and_then(|c| c.prompt.clone()))
        .unwrap_or(base.prompt);

    let prefs_dir = env_cfg
        .prefs_dir
        .clone()
        .or_else(|| file_cfg.and_then(|c| c.prefs_dir.clone()))
        .unwrap_or(base.prefs_dir);

    let verbose = cli
        .verbose
        .or(env_cfg.verbose)
        .or(file_cfg.and_then(|c| c.verbose))
        .unwrap_or(base.verbose);

    RunDefaults {
        feedback,
        startup,
        no_startup,
        class_path,
        prompt,
        prefs_dir,
        verbose,
    }
}

fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CliRunOverrides, EnvConfig, FeedbackSetting, FileConfig, load_file_config,
        resolve_run_defaults,
    };
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn valid_config_parses() {
        let dir = tempdir().expect("tempdir should work");
        let path = dir.path().join("kulla.json");
        fs::write(
            &path,
            r#"{"feedback":"concise","class_path":["lib","classes"],"no_startup":true}"#,
        )
        .expect("write should work");

        let parsed = load_file_config(None, dir.path())
            .expect("parse should work")
            .expect("file should exist");
        assert_eq!(parsed.feedback, Some(FeedbackSetting::Concise));
        assert_eq!(
            parsed.class_path,
            Some(vec![PathBuf::from("lib"), PathBuf::from("classes")])
        );
        assert_eq!(parsed.no_startup, Some(true));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempdir().expect("tempdir should work");
        assert_eq!(load_file_config(None, dir.path()).expect("lookup should work"), None);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let dir = tempdir().expect("tempdir should work");
        let path = dir.path().join("kulla.json");
        fs::write(&path, r#"{"unknown":1}"#).expect("write should work");

        let err = load_file_config(None, dir.path()).expect_err("parse should fail");
        assert!(format!("{err:#}").contains("unknown field"));
    }

    #[test]
    fn malformed_json_has_location() {
        let dir = tempdir().expect("tempdir should work");
        let path = dir.path().join("kulla.json");
        fs::write(&path, "{\n  \"feedback\":\n").expect("write should work");

        let err = load_file_config(None, dir.path()).expect_err("parse should fail");
        assert!(
            format!("{err:#}").contains("line") || format!("{err:#}").contains("column"),
            "expected location details, got: {err}"
        );
    }

    #[test]
    fn environment_settings_parse() {
        let vars = HashMap::from([
            ("KULLA_FEEDBACK", "verbose"),
            ("KULLA_NO_STARTUP", "yes"),
            ("KULLA_CLASS_PATH", "a:b"),
            ("KULLA_VERBOSE", "maybe"),
        ]);
        let env_cfg = EnvConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(env_cfg.feedback, Some(FeedbackSetting::Verbose));
        assert_eq!(env_cfg.no_startup, Some(true));
        assert_eq!(
            env_cfg.class_path,
            Some(vec![PathBuf::from("a"), PathBuf::from("b")])
        );
        assert_eq!(env_cfg.verbose, None);
    }

    #[test]
    fn precedence_cli_env_file_defaults() {
        let file = FileConfig {
            feedback: Some(FeedbackSetting::Off),
            prompt: Some("file> ".to_string()),
            class_path: Some(vec![PathBuf::from("from-file")]),
            verbose: Some(true),
            ..FileConfig::default()
        };

        let env_cfg = EnvConfig {
            feedback: Some(FeedbackSetting::Concise),
            class_path: Some(vec![PathBuf::from("from-env")]),
            ..EnvConfig::default()
        };

        let cli = CliRunOverrides {
            feedback: Some(FeedbackSetting::Verbose),
            ..CliRunOverrides::default()
        };

        let resolved = resolve_run_defaults(&cli, &env_cfg, Some(&file));
        assert_eq!(resolved.feedback, FeedbackSetting::Verbose);
        assert_eq!(resolved.class_path, [PathBuf::from("from-env")]);
        assert_eq!(resolved.prompt, "file> ");
        assert!(resolved.verbose);
        assert!(!resolved.no_startup);
    }

    #[test]
    fn cli_class_path_replaces_configured_entries() {
        let env_cfg = EnvConfig {
            class_path: Some(vec![PathBuf::from("from-env")]),
            ..EnvConfig::default()
        };
        let cli = CliRunOverrides {
            class_path: vec![PathBuf::from("from-cli")],
            ..CliRunOverrides::default()
        };
        let resolved = resolve_run_defaults(&cli, &env_cfg, None);
        assert_eq!(resolved.class_path, [PathBuf::from("from-cli")]);
        assert_eq!(resolved.prompt, super::DEFAULT_PROMPT);
    }
}
