//! Provider policy document schema and canonical serialization.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::synth::builder::Statement;
use crate::synth::errors::SynthError;
use crate::synth::types::Effect;

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<StatementDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatementDocument {
    pub sid: String,
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    pub action: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Principal {
    pub federated: String,
}

impl PolicyDocument {
    pub fn new(statement: Vec<StatementDocument>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement,
        }
    }

    /// Render compiled statements. Provenance stays behind.
    pub fn from_statements<'a>(statements: impl IntoIterator<Item = &'a Statement>) -> Self {
        Self::new(
            statements
                .into_iter()
                .map(|s| StatementDocument {
                    sid: s.sid.clone(),
                    effect: s.effect,
                    principal: None,
                    action: s.actions.iter().cloned().collect(),
                    resource: s.resources.iter().map(|r| r.to_string()).collect(),
                    condition: s.conditions.to_document(),
                })
                .collect(),
        )
    }

    /// Serialized form written to disk. Field and key order is fixed, so the
    /// same document always yields the same bytes.
    pub fn to_canonical_json(&self, pretty: bool) -> Result<String, SynthError> {
        let mut out = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        out.push('\n');
        Ok(out)
    }
}

/// SHA-256 over `bytes`, base64url without padding.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    Base64UrlUnpadded::encode_string(&digest)
}
