use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::synth::condition::{ConditionOperator, ConditionSet};
use crate::synth::errors::SynthError;
use crate::synth::resource::ResourcePattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Effect {
    #[serde(alias = "allow")]
    Allow,
    #[serde(alias = "deny")]
    Deny,
}

impl Effect {
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("allow") {
            Some(Effect::Allow)
        } else if s.eq_ignore_ascii_case("deny") {
            Some(Effect::Deny)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        }
    }
}

impl Default for Effect {
    fn default() -> Self {
        Effect::Allow
    }
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values substituted into ARN templates and federated principal ARNs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

impl IntentContext {
    /// Merge `other` into `self`. Two files declaring different values for
    /// the same field is an error.
    pub fn merge(&mut self, other: &IntentContext) -> Result<(), SynthError> {
        merge_field("partition", &mut self.partition, &other.partition)?;
        merge_field("region", &mut self.region, &other.region)?;
        merge_field("account", &mut self.account, &other.account)?;
        Ok(())
    }

    /// Fill unset fields from `defaults`.
    pub fn with_defaults(mut self, defaults: &IntentContext) -> Self {
        if self.partition.is_none() {
            self.partition = defaults.partition.clone();
        }
        if self.region.is_none() {
            self.region = defaults.region.clone();
        }
        if self.account.is_none() {
            self.account = defaults.account.clone();
        }
        self
    }

    pub fn partition(&self) -> &str {
        self.partition.as_deref().unwrap_or("aws")
    }
}

fn merge_field(
    name: &str,
    current: &mut Option<String>,
    incoming: &Option<String>,
) -> Result<(), SynthError> {
    match (current.as_deref(), incoming.as_deref()) {
        (Some(a), Some(b)) if a != b => Err(SynthError::InvalidIntent(format!(
            "conflicting context {name}: `{a}` and `{b}`"
        ))),
        (None, Some(b)) => {
            *current = Some(b.to_string());
            Ok(())
        }
        _ => Ok(()),
    }
}

// ---------- Declared intent (as written in intent files) ----------

/// A condition as declared: one key, one operator, one or more values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDecl {
    pub key: String,
    pub operator: String,
    pub values: Vec<String>,
}

/// JSON shorthand for a condition matcher: a single value, a list of values
/// (both `StringEquals`), or an explicit operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatcherDecl {
    Value(String),
    Values(Vec<String>),
    Full {
        #[serde(default = "default_operator")]
        operator: String,
        values: Vec<String>,
    },
}

pub fn default_operator() -> String {
    ConditionOperator::StringEquals.as_str().to_string()
}

fn deserialize_conditions<'de, D>(deserializer: D) -> Result<Vec<ConditionDecl>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let map: BTreeMap<String, MatcherDecl> = BTreeMap::deserialize(deserializer)?;
    Ok(map
        .into_iter()
        .map(|(key, matcher)| match matcher {
            MatcherDecl::Value(v) => ConditionDecl {
                key,
                operator: default_operator(),
                values: vec![v],
            },
            MatcherDecl::Values(values) => ConditionDecl {
                key,
                operator: default_operator(),
                values,
            },
            MatcherDecl::Full { operator, values } => ConditionDecl {
                key,
                operator,
                values,
            },
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantDecl {
    pub name: String,
    pub actor: String,
    #[serde(default)]
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_conditions")]
    pub conditions: Vec<ConditionDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustDecl {
    pub name: String,
    pub actor: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
}

/// Intermediate result from parsing a single intent file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedIntent {
    #[serde(default)]
    pub context: IntentContext,
    #[serde(default)]
    pub grants: Vec<GrantDecl>,
    #[serde(default)]
    pub trusts: Vec<TrustDecl>,
}

// ---------- Validated intent ----------

/// A grant whose actions exist in the catalog, whose resources have a valid
/// shape for those actions and whose conditions are well-formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub name: String,
    pub actor: String,
    pub effect: Effect,
    pub actions: BTreeSet<String>,
    pub resources: BTreeSet<ResourcePattern>,
    pub conditions: ConditionSet,
    pub justification: Option<String>,
}
