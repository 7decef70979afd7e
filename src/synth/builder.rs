//! Grants -> statements.
//!
//! Grants sharing actor, effect and condition set collapse into one
//! statement whose actions and resources are the union of the inputs.
//! Grants whose conditions differ are never merged, so no condition is ever
//! dropped from the output.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::synth::condition::ConditionSet;
use crate::synth::resource::ResourcePattern;
use crate::synth::types::{Effect, Grant};

/// What one grant asked for, kept alongside the merged statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantOrigin {
    pub grant: String,
    pub actions: BTreeSet<String>,
    pub resources: BTreeSet<ResourcePattern>,
    pub justification: Option<String>,
}

impl GrantOrigin {
    fn from_grant(grant: &Grant) -> Self {
        Self {
            grant: grant.name.clone(),
            actions: grant.actions.clone(),
            resources: grant.resources.clone(),
            justification: grant.justification.clone(),
        }
    }
}

/// A compiled rule for one actor's policy document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub actor: String,
    pub sid: String,
    pub effect: Effect,
    pub actions: BTreeSet<String>,
    pub resources: BTreeSet<ResourcePattern>,
    pub conditions: ConditionSet,
    /// Contributing grants in declaration order. Never rendered.
    pub provenance: Vec<GrantOrigin>,
}

impl Statement {
    pub fn grant_names(&self) -> Vec<&str> {
        self.provenance.iter().map(|o| o.grant.as_str()).collect()
    }

    pub fn has_unrestricted_resource(&self) -> bool {
        self.resources.iter().any(|r| r.is_unrestricted())
    }
}

type GroupKey = (String, Effect, ConditionSet);

/// Merge grants into statements. Groups keep first-declared order; the sets
/// inside each statement are sorted.
pub fn build(grants: &[Grant]) -> Vec<Statement> {
    let mut statements: Vec<Statement> = Vec::new();
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut sids: HashMap<String, HashSet<String>> = HashMap::new();

    for grant in grants {
        let key = (grant.actor.clone(), grant.effect, grant.conditions.clone());
        if let Some(&i) = index.get(&key) {
            let stmt = &mut statements[i];
            stmt.actions.extend(grant.actions.iter().cloned());
            stmt.resources.extend(grant.resources.iter().cloned());
            stmt.provenance.push(GrantOrigin::from_grant(grant));
            continue;
        }

        let taken = sids.entry(grant.actor.clone()).or_default();
        let sid = unique_sid(&sid_from_name(&grant.name), taken);

        index.insert(key, statements.len());
        statements.push(Statement {
            actor: grant.actor.clone(),
            sid,
            effect: grant.effect,
            actions: grant.actions.clone(),
            resources: grant.resources.clone(),
            conditions: grant.conditions.clone(),
            provenance: vec![GrantOrigin::from_grant(grant)],
        });
    }

    tracing::debug!(
        grants = grants.len(),
        statements = statements.len(),
        "Built policy statements"
    );

    statements
}

/// Statements belonging to `actor`, paired with their position in that
/// actor's document.
pub fn statements_for<'a>(
    statements: &'a [Statement],
    actor: &'a str,
) -> impl Iterator<Item = (usize, &'a Statement)> + 'a {
    statements
        .iter()
        .filter(move |s| s.actor == actor)
        .enumerate()
}

/// `push-backend image` -> `PushBackendImage`. Sids only allow ASCII
/// alphanumerics.
pub(crate) fn sid_from_name(name: &str) -> String {
    let sid: String = name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    if sid.is_empty() {
        "Statement".to_string()
    } else {
        sid
    }
}

pub(crate) fn unique_sid(base: &str, taken: &mut HashSet<String>) -> String {
    let mut candidate = base.to_string();
    let mut n = 2;
    while taken.contains(&candidate) {
        candidate = format!("{base}{n}");
        n += 1;
    }
    taken.insert(candidate.clone());
    candidate
}
