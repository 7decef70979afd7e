pub mod builder;
pub mod catalog;
pub mod checker;
pub mod condition;
pub mod document;
pub mod errors;
pub mod intent;
pub mod loader;
pub mod output;
pub mod report;
pub mod resource;
pub mod trust;
pub mod types;
pub mod wildcard;

use std::collections::BTreeMap;

use builder::Statement;
use checker::{Finding, Severity};
use document::PolicyDocument;
use trust::TrustRelationship;
use types::IntentContext;

/// Everything one compilation produced, keyed by the hash of its inputs.
/// Immutable: recompiling yields a new artifact.
#[derive(Debug, Clone)]
pub struct CompiledArtifact {
    /// SHA-256 (base64url) over the parsed intents, defaults and catalog release.
    pub input_hash: String,
    pub catalog_release: String,
    /// Merged intent context with defaults applied
    pub context: IntentContext,
    /// All statements, in document order per actor
    pub statements: Vec<Statement>,
    /// actor -> permission policy
    pub policies: BTreeMap<String, PolicyDocument>,
    pub trusts: Vec<TrustRelationship>,
    /// actor -> trust policy
    pub trust_policies: BTreeMap<String, PolicyDocument>,
    pub findings: Vec<Finding>,
}

impl CompiledArtifact {
    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}
