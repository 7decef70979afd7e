//! Advisory least-privilege analysis over compiled statements.
//!
//! The checker only reads statements. Every problem it finds becomes a
//! [`Finding`]; compilation itself never fails here.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::synth::builder::{statements_for, Statement};
use crate::synth::catalog::ActionCatalog;
use crate::synth::resource::ResourcePattern;
use crate::synth::types::Effect;
use crate::synth::wildcard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Block,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Block => "block",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum FindingKind {
    UnrestrictedWrite,
    ShadowedGrant,
    ContradictoryDeny,
    UnmatchedDeny,
    WidenedByMerge,
    StaleAction,
    UnscopedFederatedTrust,
    AudienceMismatch,
    MissingAudience,
    MissingSubject,
    MalformedSubject,
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FindingTarget {
    Statement {
        actor: String,
        index: usize,
        sid: String,
    },
    Trust {
        actor: String,
        name: String,
    },
}

impl FindingTarget {
    pub fn actor(&self) -> &str {
        match self {
            FindingTarget::Statement { actor, .. } | FindingTarget::Trust { actor, .. } => actor,
        }
    }
}

impl std::fmt::Display for FindingTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FindingTarget::Statement { actor, index, sid } => {
                write!(f, "{actor} statement #{index} ({sid})")
            }
            FindingTarget::Trust { actor, name } => write!(f, "{actor} trust `{name}`"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub kind: FindingKind,
    pub target: FindingTarget,
    pub message: String,
}

/// Run every rule over `statements` and return findings in statement order.
pub fn check(statements: &[Statement], catalog: &ActionCatalog) -> Vec<Finding> {
    let mut actors: Vec<&str> = Vec::new();
    for s in statements {
        if !actors.contains(&s.actor.as_str()) {
            actors.push(&s.actor);
        }
    }

    let mut findings = Vec::new();
    for actor in actors {
        let doc: Vec<(usize, &Statement)> = statements_for(statements, actor).collect();
        let ctx = DocumentContext {
            catalog,
            statements: &doc,
        };
        for &(index, stmt) in &doc {
            let target = FindingTarget::Statement {
                actor: actor.to_string(),
                index,
                sid: stmt.sid.clone(),
            };
            let mut push = |severity, kind, message: String| {
                findings.push(Finding {
                    severity,
                    kind,
                    target: target.clone(),
                    message,
                });
            };

            for (severity, kind, message) in ctx.stale_actions(stmt) {
                push(severity, kind, message);
            }
            if let Some((severity, message)) = ctx.unrestricted_write(stmt) {
                push(severity, FindingKind::UnrestrictedWrite, message);
            }
            if let Some(message) = ctx.shadowed(index, stmt) {
                push(Severity::Block, FindingKind::ShadowedGrant, message);
            }
            if let Some((severity, kind, message)) = ctx.deny_findings(stmt) {
                push(severity, kind, message);
            }
            if let Some(message) = ctx.widened_by_merge(stmt) {
                push(Severity::Warn, FindingKind::WidenedByMerge, message);
            }
        }
    }

    tracing::debug!(
        statements = statements.len(),
        findings = findings.len(),
        "Checked policy statements"
    );

    findings
}

/// One actor's document: the statements the rules compare against each other.
struct DocumentContext<'a> {
    catalog: &'a ActionCatalog,
    statements: &'a [(usize, &'a Statement)],
}

impl<'a> DocumentContext<'a> {
    /// Lowercase catalog names an action pattern stands for.
    fn expand(&self, pattern: &str) -> BTreeSet<String> {
        self.catalog
            .expand(pattern)
            .into_iter()
            .map(|d| d.name.to_ascii_lowercase())
            .collect()
    }

    fn expand_all<'b>(&self, patterns: impl IntoIterator<Item = &'b String>) -> BTreeSet<String> {
        patterns.into_iter().flat_map(|p| self.expand(p)).collect()
    }

    fn stale_actions(&self, stmt: &Statement) -> Vec<(Severity, FindingKind, String)> {
        stmt.actions
            .iter()
            .filter(|a| !wildcard::has_wildcard(a))
            .filter_map(|a| self.catalog.lookup(a))
            .filter_map(|d| {
                d.deprecated.as_ref().map(|note| {
                    (
                        Severity::Warn,
                        FindingKind::StaleAction,
                        format!(
                            "`{}` is deprecated in catalog release {}: {note}",
                            d.name,
                            self.catalog.release()
                        ),
                    )
                })
            })
            .collect()
    }

    fn unrestricted_write(&self, stmt: &Statement) -> Option<(Severity, String)> {
        if stmt.effect != Effect::Allow || !stmt.has_unrestricted_resource() {
            return None;
        }
        let scopable_writes: BTreeSet<&str> = stmt
            .actions
            .iter()
            .flat_map(|a| self.catalog.expand(a))
            .filter(|d| d.is_write() && !d.unrestrictable)
            .map(|d| d.name.as_str())
            .collect();
        if scopable_writes.is_empty() {
            return None;
        }

        let wide: Vec<_> = stmt
            .provenance
            .iter()
            .filter(|o| o.resources.iter().any(|r| r.is_unrestricted()))
            .collect();
        let justified = !wide.is_empty() && wide.iter().all(|o| o.justification.is_some());
        let list = scopable_writes.into_iter().collect::<Vec<_>>().join(", ");
        if justified {
            Some((
                Severity::Info,
                format!("write actions on `*` with documented justification: {list}"),
            ))
        } else {
            Some((
                Severity::Warn,
                format!(
                    "write actions on `*` without justification: {list}; scope them to specific resources or add a justification"
                ),
            ))
        }
    }

    /// Every action+resource pair of `stmt` is granted by broader Allows whose
    /// conditions are a strict subset of its own, so its conditions never
    /// narrow anything.
    fn shadowed(&self, index: usize, stmt: &Statement) -> Option<String> {
        if stmt.effect != Effect::Allow || stmt.conditions.is_empty() {
            return None;
        }
        let shadowers: Vec<&Statement> = self
            .statements
            .iter()
            .filter(|&&(i, other)| {
                i != index
                    && other.effect == Effect::Allow
                    && other.conditions.is_strict_subset_of(&stmt.conditions)
            })
            .map(|&(_, other)| other)
            .collect();
        if shadowers.is_empty() {
            return None;
        }

        let covered = stmt.actions.iter().all(|action| {
            let wanted = self.expand(action);
            stmt.resources.iter().all(|resource| {
                // Each catalog action behind the pattern must be granted on
                // this resource by some shadower.
                wanted.iter().all(|name| {
                    shadowers.iter().any(|b| {
                        self.expand_all(&b.actions).contains(name)
                            && b.resources.iter().any(|r| r.covers(resource))
                    })
                })
            })
        });
        if !covered {
            return None;
        }

        let by: Vec<&str> = shadowers
            .iter()
            .filter(|b| overlaps(self, b, stmt))
            .map(|b| b.sid.as_str())
            .collect();
        Some(format!(
            "conditions [{}] never narrow access: the same actions and resources are already allowed by {}",
            stmt.conditions,
            by.join(", ")
        ))
    }

    fn deny_findings(&self, stmt: &Statement) -> Option<(Severity, FindingKind, String)> {
        if stmt.effect != Effect::Deny {
            return None;
        }
        if !stmt.conditions.is_satisfiable() {
            return Some((
                Severity::Warn,
                FindingKind::ContradictoryDeny,
                format!(
                    "deny conditions [{}] contradict each other and can never match",
                    stmt.conditions
                ),
            ));
        }

        let allows: Vec<&Statement> = self
            .statements
            .iter()
            .map(|&(_, s)| s)
            .filter(|s| s.effect == Effect::Allow && overlaps(self, s, stmt))
            .collect();
        if allows.is_empty() {
            return Some((
                Severity::Info,
                FindingKind::UnmatchedDeny,
                "deny overlaps no allowed action and resource in this document".to_string(),
            ));
        }
        if allows
            .iter()
            .all(|a| !stmt.conditions.compatible_with(&a.conditions))
        {
            let sids: Vec<&str> = allows.iter().map(|a| a.sid.as_str()).collect();
            return Some((
                Severity::Warn,
                FindingKind::ContradictoryDeny,
                format!(
                    "deny conditions [{}] can never hold together with the conditions of {}; the deny is dead",
                    stmt.conditions,
                    sids.join(", ")
                ),
            ));
        }
        None
    }

    /// A merged statement grants a pair no contributing grant asked for.
    fn widened_by_merge(&self, stmt: &Statement) -> Option<String> {
        if stmt.provenance.len() < 2 {
            return None;
        }
        let origins: Vec<(BTreeSet<String>, &BTreeSet<ResourcePattern>)> = stmt
            .provenance
            .iter()
            .map(|o| (self.expand_all(&o.actions), &o.resources))
            .collect();

        let mut widened = Vec::new();
        for action in &stmt.actions {
            let wanted = self.expand(action);
            for resource in &stmt.resources {
                let requested = origins.iter().any(|(actions, resources)| {
                    wanted.is_subset(actions) && resources.iter().any(|r| r.covers(resource))
                });
                if !requested {
                    widened.push(format!("{action} on {resource}"));
                }
            }
        }
        if widened.is_empty() {
            return None;
        }
        Some(format!(
            "merging grants {} also grants pairs none of them requested: {}",
            stmt.grant_names().join(", "),
            widened.join("; ")
        ))
    }
}

/// Some action and some resource are matched by both statements.
fn overlaps(ctx: &DocumentContext<'_>, a: &Statement, b: &Statement) -> bool {
    let a_actions = ctx.expand_all(&a.actions);
    let b_actions = ctx.expand_all(&b.actions);
    !a_actions.is_disjoint(&b_actions)
        && a
            .resources
            .iter()
            .any(|ra| b.resources.iter().any(|rb| ra.overlaps(rb)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::builder::build;
    use crate::synth::condition::{ConditionOperator, ConditionSet};
    use crate::synth::resource::Arn;
    use crate::synth::types::Grant;

    fn catalog() -> ActionCatalog {
        ActionCatalog::builtin().unwrap()
    }

    fn arn(s: &str) -> ResourcePattern {
        ResourcePattern::Arn(Arn::parse(s).unwrap())
    }

    const BACKEND: &str = "arn:aws:ecr:us-east-2:123456789012:repository/backend";

    fn grant(name: &str, actions: &[&str], resources: &[ResourcePattern]) -> Grant {
        Grant {
            name: name.into(),
            actor: "ci".into(),
            effect: Effect::Allow,
            actions: actions.iter().map(|s| s.to_string()).collect(),
            resources: resources.iter().cloned().collect(),
            conditions: ConditionSet::new(),
            justification: None,
        }
    }

    fn cond(op: ConditionOperator, key: &str, value: &str) -> ConditionSet {
        let mut c = ConditionSet::new();
        c.insert(op, key, [value.to_string()]).unwrap();
        c
    }

    fn of_kind(findings: &[Finding], kind: FindingKind) -> Vec<&Finding> {
        findings.iter().filter(|f| f.kind == kind).collect()
    }

    #[test]
    fn test_shadowed_conditioned_allow_is_blocked_once() {
        let plain = grant("Push", &["ecr:PutImage"], &[arn(BACKEND)]);
        let mut office = grant("PushFromOffice", &["ecr:PutImage"], &[arn(BACKEND)]);
        office.conditions = cond(ConditionOperator::IpAddress, "aws:SourceIp", "1.2.3.0/24");

        let stmts = build(&[plain, office]);
        let findings = check(&stmts, &catalog());
        let blocks: Vec<_> = findings
            .iter()
            .filter(|f| f.severity == Severity::Block)
            .collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, FindingKind::ShadowedGrant);
        assert_eq!(
            blocks[0].target,
            FindingTarget::Statement {
                actor: "ci".into(),
                index: 1,
                sid: "PushFromOffice".into()
            }
        );
        assert!(blocks[0].message.contains("Push"));
    }

    #[test]
    fn test_partially_covered_allow_is_not_shadowed() {
        let other = arn("arn:aws:ecr:us-east-2:123456789012:repository/frontend");
        let plain = grant("Push", &["ecr:PutImage"], &[arn(BACKEND)]);
        let mut office = grant("PushFromOffice", &["ecr:PutImage"], &[arn(BACKEND), other]);
        office.conditions = cond(ConditionOperator::IpAddress, "aws:SourceIp", "1.2.3.0/24");

        let findings = check(&build(&[plain, office]), &catalog());
        assert!(of_kind(&findings, FindingKind::ShadowedGrant).is_empty());
    }

    #[test]
    fn test_wildcard_action_shadowing() {
        let broad = grant("AllEcr", &["ecr:*"], &[arn("arn:aws:ecr:*:*:repository/*")]);
        let mut narrow = grant("PushFromOffice", &["ecr:PutImage"], &[arn(BACKEND)]);
        narrow.conditions = cond(ConditionOperator::IpAddress, "aws:SourceIp", "1.2.3.0/24");

        let findings = check(&build(&[broad, narrow]), &catalog());
        assert_eq!(of_kind(&findings, FindingKind::ShadowedGrant).len(), 1);
    }

    #[test]
    fn test_narrower_unconditioned_allow_does_not_shadow() {
        let one_char = grant("OneCharKeys", &["s3:GetObject"], &[arn("arn:aws:s3:::site/?")]);
        let mut office = grant("ReadFromOffice", &["s3:GetObject"], &[arn("arn:aws:s3:::site/*")]);
        office.conditions = cond(ConditionOperator::IpAddress, "aws:SourceIp", "1.2.3.0/24");

        let findings = check(&build(&[one_char, office]), &catalog());
        assert!(of_kind(&findings, FindingKind::ShadowedGrant).is_empty());
    }

    #[test]
    fn test_unrestricted_write_rules() {
        let cat = catalog();
        let token = grant("Login", &["ecr:GetAuthorizationToken"], &[ResourcePattern::Any]);
        let findings = check(&build(&[token]), &cat);
        assert!(of_kind(&findings, FindingKind::UnrestrictedWrite).is_empty());

        let push = grant("PushAnywhere", &["ecr:PutImage"], &[ResourcePattern::Any]);
        let findings = check(&build(&[push.clone()]), &cat);
        let f = of_kind(&findings, FindingKind::UnrestrictedWrite);
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].severity, Severity::Warn);

        let mut justified = push;
        justified.justification = Some("registry mirror job".into());
        let findings = check(&build(&[justified]), &cat);
        let f = of_kind(&findings, FindingKind::UnrestrictedWrite);
        assert_eq!(f[0].severity, Severity::Info);

        let reads = grant("ReadAll", &["ecr:BatchGetImage"], &[ResourcePattern::Any]);
        assert!(of_kind(&check(&build(&[reads]), &cat), FindingKind::UnrestrictedWrite).is_empty());
    }

    #[test]
    fn test_self_contradictory_deny() {
        let allow = grant("Push", &["ecr:PutImage"], &[arn(BACKEND)]);
        let mut deny = grant("Never", &["ecr:PutImage"], &[arn(BACKEND)]);
        deny.effect = Effect::Deny;
        let mut c = ConditionSet::new();
        c.insert(ConditionOperator::NumericLessThan, "aws:MultiFactorAuthAge", ["10".to_string()])
            .unwrap();
        c.insert(ConditionOperator::NumericGreaterThan, "aws:MultiFactorAuthAge", ["20".to_string()])
            .unwrap();
        deny.conditions = c;

        let findings = check(&build(&[allow, deny]), &catalog());
        let f = of_kind(&findings, FindingKind::ContradictoryDeny);
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].severity, Severity::Warn);
    }

    #[test]
    fn test_deny_contradicting_every_allow() {
        let mut allow = grant("PushFromOffice", &["ecr:PutImage"], &[arn(BACKEND)]);
        allow.conditions = cond(ConditionOperator::IpAddress, "aws:SourceIp", "1.2.3.0/24");
        let mut deny = grant("BlockOtherNet", &["ecr:PutImage"], &[arn(BACKEND)]);
        deny.effect = Effect::Deny;
        deny.conditions = cond(ConditionOperator::IpAddress, "aws:SourceIp", "10.0.0.0/8");

        let findings = check(&build(&[allow, deny]), &catalog());
        assert_eq!(of_kind(&findings, FindingKind::ContradictoryDeny).len(), 1);
    }

    #[test]
    fn test_live_and_unmatched_deny() {
        let allow = grant("Push", &["ecr:PutImage"], &[arn(BACKEND)]);
        let mut deny = grant("NoPlainHttp", &["ecr:*"], &[ResourcePattern::Any]);
        deny.effect = Effect::Deny;
        deny.conditions = cond(ConditionOperator::Bool, "aws:SecureTransport", "false");
        let findings = check(&build(&[allow, deny.clone()]), &catalog());
        assert!(of_kind(&findings, FindingKind::ContradictoryDeny).is_empty());
        assert!(of_kind(&findings, FindingKind::UnmatchedDeny).is_empty());

        let findings = check(&build(&[deny]), &catalog());
        let f = of_kind(&findings, FindingKind::UnmatchedDeny);
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].severity, Severity::Info);
    }

    #[test]
    fn test_deny_intersecting_allow_pattern_is_live() {
        let allow = grant("ReadIndex", &["s3:GetObject"], &[arn("arn:aws:s3:::site/index*")]);
        let mut deny = grant("NoHtml", &["s3:GetObject"], &[arn("arn:aws:s3:::site/*.html")]);
        deny.effect = Effect::Deny;

        let findings = check(&build(&[allow, deny]), &catalog());
        assert!(of_kind(&findings, FindingKind::UnmatchedDeny).is_empty());
        assert!(of_kind(&findings, FindingKind::ContradictoryDeny).is_empty());
    }

    #[test]
    fn test_widened_by_merge() {
        let bucket = arn("arn:aws:s3:::site/*");
        let logs = arn("arn:aws:s3:::logs/*");
        let read_site = grant("ReadSite", &["s3:GetObject"], &[bucket.clone()]);
        let write_logs = grant("WriteLogs", &["s3:PutObject"], &[logs]);
        let findings = check(&build(&[read_site, write_logs]), &catalog());
        let f = of_kind(&findings, FindingKind::WidenedByMerge);
        assert_eq!(f.len(), 1);
        assert!(f[0].message.contains("s3:PutObject on arn:aws:s3:::site/*"));

        let a = grant("A", &["s3:GetObject"], &[bucket.clone()]);
        let b = grant("B", &["s3:GetObject", "s3:PutObject"], &[bucket]);
        let findings = check(&build(&[a, b]), &catalog());
        assert!(of_kind(&findings, FindingKind::WidenedByMerge).is_empty());
    }

    #[test]
    fn test_stale_action() {
        let cat = catalog()
            .with_overlay(
                r#"
service "ecr" {
    action "PutImage" access="write" {
        resources {
            - "repository"
        }
        deprecated "use ecr:PutImageV2"
    }
}
"#,
            )
            .unwrap();
        let push = grant("Push", &["ecr:PutImage"], &[arn(BACKEND)]);
        let findings = check(&build(&[push]), &cat);
        let f = of_kind(&findings, FindingKind::StaleAction);
        assert_eq!(f.len(), 1);
        assert!(f[0].message.contains("PutImageV2"));
    }
}
