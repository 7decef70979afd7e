//! Findings report for operator review.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::synth::checker::{Finding, Severity};
use crate::synth::errors::SynthError;
use crate::synth::CompiledArtifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Lowest finding severity that makes the CLI exit non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailOn {
    Never,
    Warn,
    #[default]
    Block,
}

impl FailOn {
    fn threshold(self) -> Option<Severity> {
        match self {
            FailOn::Never => None,
            FailOn::Warn => Some(Severity::Warn),
            FailOn::Block => Some(Severity::Block),
        }
    }
}

pub fn should_fail(artifact: &CompiledArtifact, fail_on: FailOn) -> bool {
    match (fail_on.threshold(), artifact.max_severity()) {
        (Some(threshold), Some(max)) => max >= threshold,
        _ => false,
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    block: usize,
    warn: usize,
    info: usize,
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    input_hash: &'a str,
    catalog_release: &'a str,
    summary: Summary,
    findings: &'a [Finding],
}

fn summary(artifact: &CompiledArtifact) -> Summary {
    Summary {
        block: artifact.count(Severity::Block),
        warn: artifact.count(Severity::Warn),
        info: artifact.count(Severity::Info),
    }
}

pub fn render_json(artifact: &CompiledArtifact) -> Result<String, SynthError> {
    let mut out = serde_json::to_string_pretty(&JsonReport {
        input_hash: &artifact.input_hash,
        catalog_release: &artifact.catalog_release,
        summary: summary(artifact),
        findings: &artifact.findings,
    })?;
    out.push('\n');
    Ok(out)
}

/// Plain-text report, most severe findings first.
pub fn render_text(artifact: &CompiledArtifact) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "input {} (catalog {})",
        artifact.input_hash, artifact.catalog_release
    );

    let mut findings: Vec<&Finding> = artifact.findings.iter().collect();
    // Stable sort keeps statement order within a severity.
    findings.sort_by(|a, b| b.severity.cmp(&a.severity));

    for f in findings {
        let _ = writeln!(
            out,
            "{:<5}  {}  {}",
            f.severity.to_string().to_uppercase(),
            f.kind,
            f.target
        );
        let _ = writeln!(out, "       {}", f.message);
    }

    let s = summary(artifact);
    let _ = writeln!(
        out,
        "{} block, {} warn, {} info across {} policy and {} trust document(s)",
        s.block,
        s.warn,
        s.info,
        artifact.policies.len(),
        artifact.trust_policies.len()
    );
    out
}

pub fn render(artifact: &CompiledArtifact, format: ReportFormat) -> Result<String, SynthError> {
    match format {
        ReportFormat::Text => Ok(render_text(artifact)),
        ReportFormat::Json => render_json(artifact),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::checker::{FindingKind, FindingTarget};
    use crate::synth::types::IntentContext;
    use std::collections::BTreeMap;

    fn artifact(severities: &[Severity]) -> CompiledArtifact {
        CompiledArtifact {
            input_hash: "abc".into(),
            catalog_release: "2025-06".into(),
            context: IntentContext::default(),
            statements: vec![],
            policies: BTreeMap::new(),
            trusts: vec![],
            trust_policies: BTreeMap::new(),
            findings: severities
                .iter()
                .enumerate()
                .map(|(i, s)| Finding {
                    severity: *s,
                    kind: FindingKind::UnrestrictedWrite,
                    target: FindingTarget::Statement {
                        actor: "ci".into(),
                        index: i,
                        sid: format!("S{i}"),
                    },
                    message: format!("finding {i}"),
                })
                .collect(),
        }
    }

    #[test]
    fn test_should_fail_thresholds() {
        let warn_only = artifact(&[Severity::Info, Severity::Warn]);
        assert!(!should_fail(&warn_only, FailOn::Block));
        assert!(should_fail(&warn_only, FailOn::Warn));
        assert!(!should_fail(&warn_only, FailOn::Never));

        let blocked = artifact(&[Severity::Block]);
        assert!(should_fail(&blocked, FailOn::Block));
        assert!(!should_fail(&artifact(&[]), FailOn::Warn));
    }

    #[test]
    fn test_text_report_orders_by_severity() {
        let text = render_text(&artifact(&[Severity::Info, Severity::Block]));
        let block = text.find("BLOCK").unwrap();
        let info = text.find("INFO").unwrap();
        assert!(block < info);
        assert!(text.contains("ci statement #1 (S1)"));
        assert!(text.contains("1 block, 0 warn, 1 info"));
    }

    #[test]
    fn test_json_report_shape() {
        let json = render_json(&artifact(&[Severity::Warn])).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["summary"]["warn"], 1);
        assert_eq!(value["findings"][0]["severity"], "warn");
        assert_eq!(value["findings"][0]["kind"], "UnrestrictedWrite");
        assert_eq!(value["findings"][0]["target"]["type"], "statement");
        assert_eq!(value["findings"][0]["target"]["sid"], "S0");
    }
}
