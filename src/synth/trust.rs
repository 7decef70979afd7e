//! Federated (OIDC) trust relationships: scoping checks and trust policy
//! rendering.

use miette::Diagnostic;
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

use crate::synth::builder::{sid_from_name, unique_sid};
use crate::synth::checker::{Finding, FindingKind, FindingTarget, Severity};
use crate::synth::condition::{ConditionOperator, ConditionSet};
use crate::synth::document::{PolicyDocument, Principal, StatementDocument};
use crate::synth::errors::SynthError;
use crate::synth::types::{Effect, IntentContext, TrustDecl};
use crate::synth::wildcard;

pub const GITHUB_ACTIONS: &str = "token.actions.githubusercontent.com";
pub const GITLAB: &str = "gitlab.com";
pub const TERRAFORM_CLOUD: &str = "app.terraform.io";

const ASSUME_ACTION: &str = "sts:AssumeRoleWithWebIdentity";

/// How a known CI provider spells the identity owner in its `sub` claim.
#[derive(Debug, Clone, Copy)]
struct ProviderProfile {
    host: &'static str,
    /// Claim prefix up to the owner, e.g. `repo:`.
    subject_prefix: &'static str,
    /// Minimum `/`-separated segments in the owner (`org/repo` is 2).
    owner_segments: usize,
    /// Maximum segments, when the owner has a fixed shape.
    max_owner_segments: Option<usize>,
    default_audience: Option<&'static str>,
}

const KNOWN_PROVIDERS: &[ProviderProfile] = &[
    ProviderProfile {
        host: GITHUB_ACTIONS,
        subject_prefix: "repo:",
        owner_segments: 2,
        max_owner_segments: Some(2),
        default_audience: Some("sts.amazonaws.com"),
    },
    ProviderProfile {
        host: GITLAB,
        subject_prefix: "project_path:",
        owner_segments: 2,
        max_owner_segments: None,
        default_audience: None,
    },
    ProviderProfile {
        host: TERRAFORM_CLOUD,
        subject_prefix: "organization:",
        owner_segments: 1,
        max_owner_segments: Some(1),
        default_audience: Some("aws.workload.identity"),
    },
];

fn profile(host: &str) -> Option<&'static ProviderProfile> {
    KNOWN_PROVIDERS.iter().find(|p| p.host == host)
}

/// Strip scheme and trailing slash: `https://gitlab.com/` -> `gitlab.com`.
pub fn normalize_provider(provider: &str) -> String {
    let p = provider.trim();
    let p = p
        .strip_prefix("https://")
        .or_else(|| p.strip_prefix("http://"))
        .unwrap_or(p);
    p.trim_end_matches('/').to_string()
}

/// Which external identities may assume a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustRelationship {
    pub name: String,
    pub actor: String,
    /// Provider host, normalized.
    pub provider: String,
    pub audience: Option<String>,
    pub subjects: BTreeSet<String>,
}

impl TrustRelationship {
    pub fn from_decl(decl: &TrustDecl) -> Result<Self, SynthError> {
        let provider = normalize_provider(&decl.provider);
        if provider.is_empty() || wildcard::has_wildcard(&provider) {
            return Err(SynthError::InvalidIntent(format!(
                "trust `{}` has invalid provider `{}`",
                decl.name, decl.provider
            )));
        }
        Ok(Self {
            name: decl.name.clone(),
            actor: decl.actor.clone(),
            provider,
            audience: decl.audience.clone(),
            subjects: decl.subjects.iter().map(|s| s.trim().to_string()).collect(),
        })
    }

    /// Declared audience, falling back to the provider's well-known one.
    pub fn effective_audience(&self) -> Option<String> {
        self.audience.clone().or_else(|| {
            profile(&self.provider)
                .and_then(|p| p.default_audience)
                .map(str::to_string)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum TrustFinding {
    #[error("Trust `{trust}` subject `{subject}` is not scoped to a single identity owner: {reason}")]
    #[diagnostic(
        code(iamsynth::unscoped_federated_trust),
        help("Pin the subject to one repository, e.g. `repo:org/exact-repo:*`")
    )]
    UnscopedFederatedTrust {
        trust: String,
        subject: String,
        reason: String,
    },

    #[error("Trust `{trust}` audience `{found}` does not match the provider audience `{expected}`")]
    #[diagnostic(code(iamsynth::audience_mismatch))]
    AudienceMismatch {
        trust: String,
        expected: String,
        found: String,
    },

    #[error("Trust `{trust}` declares no audience for provider `{provider}`")]
    #[diagnostic(
        code(iamsynth::missing_audience),
        help("Add an `audience` so tokens minted for other consumers are rejected")
    )]
    MissingAudience { trust: String, provider: String },

    #[error("Trust `{trust}` declares no subject; any identity of the provider could assume the role")]
    #[diagnostic(code(iamsynth::missing_subject))]
    MissingSubject { trust: String },

    #[error("Trust `{trust}` subject `{subject}` is malformed: {reason}")]
    #[diagnostic(code(iamsynth::malformed_subject))]
    MalformedSubject {
        trust: String,
        subject: String,
        reason: String,
    },
}

impl TrustFinding {
    pub fn kind(&self) -> FindingKind {
        match self {
            TrustFinding::UnscopedFederatedTrust { .. } => FindingKind::UnscopedFederatedTrust,
            TrustFinding::AudienceMismatch { .. } => FindingKind::AudienceMismatch,
            TrustFinding::MissingAudience { .. } => FindingKind::MissingAudience,
            TrustFinding::MissingSubject { .. } => FindingKind::MissingSubject,
            TrustFinding::MalformedSubject { .. } => FindingKind::MalformedSubject,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            TrustFinding::UnscopedFederatedTrust { .. } | TrustFinding::MissingSubject { .. } => {
                Severity::Block
            }
            TrustFinding::AudienceMismatch { .. }
            | TrustFinding::MissingAudience { .. }
            | TrustFinding::MalformedSubject { .. } => Severity::Warn,
        }
    }

    pub fn into_finding(self, actor: &str) -> Finding {
        let name = match &self {
            TrustFinding::UnscopedFederatedTrust { trust, .. }
            | TrustFinding::AudienceMismatch { trust, .. }
            | TrustFinding::MissingAudience { trust, .. }
            | TrustFinding::MissingSubject { trust }
            | TrustFinding::MalformedSubject { trust, .. } => trust.clone(),
        };
        Finding {
            severity: self.severity(),
            kind: self.kind(),
            target: FindingTarget::Trust {
                actor: actor.to_string(),
                name,
            },
            message: self.to_string(),
        }
    }
}

/// Validates trusts. Providers listed as internal issue tokens whose claims
/// the operator controls, so their subjects are not checked for scope.
#[derive(Debug, Clone, Default)]
pub struct TrustValidator {
    internal_providers: BTreeSet<String>,
}

impl TrustValidator {
    pub fn new<I, S>(internal_providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            internal_providers: internal_providers
                .into_iter()
                .map(|p| normalize_provider(p.as_ref()))
                .collect(),
        }
    }

    /// First problem with `trust`, if any. Scoping problems are reported
    /// before audience problems.
    pub fn validate(&self, trust: &TrustRelationship) -> Result<(), TrustFinding> {
        match self.validate_all(trust).into_iter().next() {
            Some(finding) => Err(finding),
            None => Ok(()),
        }
    }

    pub fn validate_all(&self, trust: &TrustRelationship) -> Vec<TrustFinding> {
        let mut findings = Vec::new();
        let internal = self.internal_providers.contains(&trust.provider);
        let known = profile(&trust.provider);

        if trust.subjects.is_empty() {
            if !internal {
                findings.push(TrustFinding::MissingSubject {
                    trust: trust.name.clone(),
                });
            }
        } else if !internal {
            for subject in &trust.subjects {
                if let Err(f) = check_subject(&trust.name, subject, known) {
                    findings.push(f);
                }
            }
        }

        match (known, trust.audience.as_deref()) {
            (Some(ProviderProfile {
                default_audience: Some(expected),
                ..
            }), Some(found)) if found != *expected => {
                findings.push(TrustFinding::AudienceMismatch {
                    trust: trust.name.clone(),
                    expected: expected.to_string(),
                    found: found.to_string(),
                });
            }
            (_, None) if trust.effective_audience().is_none() => {
                findings.push(TrustFinding::MissingAudience {
                    trust: trust.name.clone(),
                    provider: trust.provider.clone(),
                });
            }
            _ => {}
        }

        findings
    }
}

/// Validate with no internal providers: every provider is treated as
/// externally influenced.
pub fn validate(trust: &TrustRelationship) -> Result<(), TrustFinding> {
    TrustValidator::default().validate(trust)
}

fn check_subject(
    trust: &str,
    subject: &str,
    known: Option<&ProviderProfile>,
) -> Result<(), TrustFinding> {
    let unscoped = |reason: &str| TrustFinding::UnscopedFederatedTrust {
        trust: trust.to_string(),
        subject: subject.to_string(),
        reason: reason.to_string(),
    };

    if subject.is_empty() || subject.chars().all(|c| c == '*' || c == '?') {
        return Err(unscoped("matches every identity the provider issues"));
    }

    let Some(p) = known else {
        // Unknown provider: the claim name and at least one fully literal
        // segment after it must come before any wildcard.
        if !wildcard::has_wildcard(subject) {
            return Ok(());
        }
        let literal = subject
            .split(':')
            .take_while(|seg| !seg.is_empty() && !wildcard::has_wildcard(seg))
            .count();
        if literal < 2 {
            return Err(unscoped(
                "a literal claim name and a literal segment after it must precede any wildcard",
            ));
        }
        return Ok(());
    };

    let Some(rest) = subject.strip_prefix(p.subject_prefix) else {
        // A wildcard before the claim prefix is complete can expand to the
        // prefix followed by any owner.
        let literal = subject.find(['*', '?']).map(|at| &subject[..at]);
        if literal.is_some_and(|lit| p.subject_prefix.starts_with(lit)) {
            return Err(unscoped(&format!(
                "a wildcard before `{}` can match any owner",
                p.subject_prefix
            )));
        }
        return Err(TrustFinding::MalformedSubject {
            trust: trust.to_string(),
            subject: subject.to_string(),
            reason: format!("{} subjects start with `{}`", p.host, p.subject_prefix),
        });
    };

    let owner = rest.split(':').next().unwrap_or_default();
    if wildcard::has_wildcard(owner) {
        return Err(unscoped(&format!(
            "owner `{owner}` contains a wildcard and can match identities of other owners"
        )));
    }
    let segments: Vec<&str> = owner.split('/').collect();
    if segments.iter().any(|s| s.is_empty())
        || segments.len() < p.owner_segments
        || p.max_owner_segments.is_some_and(|max| segments.len() > max)
    {
        return Err(TrustFinding::MalformedSubject {
            trust: trust.to_string(),
            subject: subject.to_string(),
            reason: format!(
                "expected `{}` followed by a {}-segment owner",
                p.subject_prefix, p.owner_segments
            ),
        });
    }
    Ok(())
}

/// Render the trust policy for one actor. Each relationship becomes one
/// statement; the federated principal ARN needs the context account.
pub fn render(
    trusts: &[&TrustRelationship],
    context: &IntentContext,
) -> Result<PolicyDocument, SynthError> {
    let mut taken = HashSet::new();
    let mut statements = Vec::with_capacity(trusts.len());

    for trust in trusts {
        let account = context.account.as_deref().ok_or_else(|| {
            SynthError::InvalidIntent(format!(
                "trust `{}` needs an account in `context` or defaults to build the federated principal ARN",
                trust.name
            ))
        })?;

        let mut conditions = ConditionSet::new();
        if let Some(aud) = trust.effective_audience() {
            conditions.insert(
                ConditionOperator::StringEquals,
                &format!("{}:aud", trust.provider),
                [aud],
            )?;
        }
        if !trust.subjects.is_empty() {
            let op = if trust.subjects.iter().any(|s| wildcard::has_wildcard(s)) {
                ConditionOperator::StringLike
            } else {
                ConditionOperator::StringEquals
            };
            conditions.insert(
                op,
                &format!("{}:sub", trust.provider),
                trust.subjects.iter().cloned(),
            )?;
        }

        statements.push(StatementDocument {
            sid: unique_sid(&sid_from_name(&trust.name), &mut taken),
            effect: Effect::Allow,
            principal: Some(Principal {
                federated: format!(
                    "arn:{}:iam::{account}:oidc-provider/{}",
                    context.partition(),
                    trust.provider
                ),
            }),
            action: vec![ASSUME_ACTION.to_string()],
            resource: Vec::new(),
            condition: conditions.to_document(),
        });
    }

    Ok(PolicyDocument::new(statements))
}
