use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::synth::catalog::ActionCatalog;
use crate::synth::errors::SynthError;
use crate::synth::loader::CompileOptions;
use crate::synth::report::{FailOn, ReportFormat};
use crate::synth::types::IntentContext;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub catalog: Catalog,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub report: Report,
    #[serde(default)]
    pub trust: Trust,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Catalog {
    /// Optional KDL catalog layered over the built-in one
    pub path: Option<PathBuf>,
}

/// Context used when intent files do not set one.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Defaults {
    pub partition: Option<String>,
    pub region: Option<String>,
    pub account: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    /// Directory for policy documents and the manifest. Default: out
    pub dir: PathBuf,
    #[serde(default = "default_pretty")]
    pub pretty: bool,
}

fn default_pretty() -> bool {
    true
}

impl Default for Output {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("out"),
            pretty: default_pretty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Report {
    #[serde(default)]
    pub format: ReportFormat,
    #[serde(default)]
    pub fail_on: FailOn,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Trust {
    /// OIDC providers whose token claims are operator-controlled
    #[serde(default)]
    pub internal_providers: Vec<String>,
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default(
                "output.dir",
                Output::default().dir.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default("output.pretty", default_pretty())
            .into_diagnostic()?
            .set_default("report.format", "text")
            .into_diagnostic()?
            .set_default("report.fail_on", "block")
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: IAMSYNTH__DEFAULTS__ACCOUNT=123456789012, etc.
        builder = builder.add_source(config::Environment::with_prefix("IAMSYNTH").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let mut s: Settings = cfg.try_deserialize().into_diagnostic()?;

        // Normalize catalog path to be relative to current dir
        if let Some(catalog) = &s.catalog.path {
            if catalog.is_relative() {
                s.catalog.path = Some(std::env::current_dir().into_diagnostic()?.join(catalog));
            }
        }

        Ok(s)
    }

    /// Built-in catalog, with the configured catalog file layered on top.
    pub fn load_catalog(&self) -> Result<ActionCatalog, SynthError> {
        let catalog = ActionCatalog::builtin()?;
        match &self.catalog.path {
            Some(path) => catalog.with_overlay_file(path),
            None => Ok(catalog),
        }
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            defaults: IntentContext {
                partition: self.defaults.partition.clone(),
                region: self.defaults.region.clone(),
                account: self.defaults.account.clone(),
            },
            internal_providers: self.trust.internal_providers.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_settings_load_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nonexistent.toml");

        // Load settings with nonexistent file - should use defaults
        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.output.dir, PathBuf::from("out"));
        assert!(settings.output.pretty);
        assert_eq!(settings.report.format, ReportFormat::Text);
        assert_eq!(settings.report.fail_on, FailOn::Block);
        assert!(settings.catalog.path.is_none());
        assert!(settings.trust.internal_providers.is_empty());
    }

    #[test]
    fn test_settings_load_from_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("iamsynth.toml");

        let config_content = r#"
[defaults]
region = "us-east-2"
account = "123456789012"

[output]
dir = "policies"
pretty = false

[report]
format = "json"
fail_on = "warn"

[trust]
internal_providers = ["oidc.internal.example.com"]
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.defaults.region.as_deref(), Some("us-east-2"));
        assert_eq!(settings.defaults.account.as_deref(), Some("123456789012"));
        assert_eq!(settings.output.dir, PathBuf::from("policies"));
        assert!(!settings.output.pretty);
        assert_eq!(settings.report.format, ReportFormat::Json);
        assert_eq!(settings.report.fail_on, FailOn::Warn);

        let options = settings.compile_options();
        assert_eq!(options.defaults.region.as_deref(), Some("us-east-2"));
        assert_eq!(options.internal_providers, vec!["oidc.internal.example.com"]);
    }

    #[test]
    fn test_settings_env_override() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("iamsynth.toml");

        let config_content = r#"
[defaults]
partition = "aws"
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        // Set environment variable
        env::set_var("IAMSYNTH__DEFAULTS__PARTITION", "aws-us-gov");

        // Load settings - env should override file
        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.defaults.partition.as_deref(), Some("aws-us-gov"));

        // Cleanup
        env::remove_var("IAMSYNTH__DEFAULTS__PARTITION");
    }

    #[test]
    fn test_settings_catalog_overlay() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let catalog_path = temp_dir.path().join("extra.kdl");
        fs::write(
            &catalog_path,
            r#"
release "2025-07"
service "sns" {
    resource "topic" arn="arn:${Partition}:sns:${Region}:${Account}:${TopicName}" {
        aliases {
            - "topic"
        }
    }
    action "Publish" access="write" {
        resources {
            - "topic"
        }
    }
}
"#,
        )
        .expect("Failed to write catalog");

        let config_path = temp_dir.path().join("iamsynth.toml");
        fs::write(
            &config_path,
            format!("[catalog]\npath = {:?}\n", catalog_path.to_string_lossy()),
        )
        .expect("Failed to write config");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");
        assert!(settings.catalog.path.as_ref().unwrap().is_absolute());

        let catalog = settings.load_catalog().expect("Failed to load catalog");
        assert_eq!(catalog.release(), "2025-07");
        assert!(catalog.lookup("sns:Publish").is_some());
        assert!(catalog.lookup("ecr:PutImage").is_some());
    }

    #[test]
    fn test_settings_path_normalization() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("iamsynth.toml");

        fs::write(&config_path, "[catalog]\npath = \"relative/catalog.kdl\"\n")
            .expect("Failed to write config");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        let path = settings.catalog.path.expect("catalog path");
        assert!(path.is_absolute());
        assert!(path.ends_with("relative/catalog.kdl"));
    }
}
