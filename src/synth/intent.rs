use crate::synth::errors::SynthError;
use crate::synth::types::*;
use kdl::{KdlDocument, KdlNode};

/// Parse a KDL intent document into declared grants and trusts.
pub fn parse_kdl_intent(source: &str) -> Result<ParsedIntent, SynthError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| SynthError::KdlParse(e.to_string()))?;

    let mut intent = ParsedIntent::default();

    for node in doc.nodes() {
        match node.name().value() {
            "context" => {
                intent.context.merge(&IntentContext {
                    partition: string_prop(node, "partition"),
                    region: string_prop(node, "region"),
                    account: string_prop(node, "account"),
                })?;
            }
            "grant" => intent.grants.push(parse_grant(node)?),
            "trust" => intent.trusts.push(parse_trust(node)?),
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(intent)
}

/// Parse a JSON intent document. Same shape as the KDL form:
/// `{"context": {...}, "grants": [...], "trusts": [...]}`.
pub fn parse_json_intent(source: &str) -> Result<ParsedIntent, SynthError> {
    Ok(serde_json::from_str(source)?)
}

fn parse_grant(node: &KdlNode) -> Result<GrantDecl, SynthError> {
    let name = first_string_arg(node).ok_or_else(|| {
        SynthError::InvalidIntent(
            "grant node requires a name argument (e.g. grant \"PushImages\" actor=\"ci\")".into(),
        )
    })?;

    let actor = string_prop(node, "actor").ok_or_else(|| {
        SynthError::InvalidIntent(format!(
            "grant `{name}` missing `actor` property (e.g. actor=\"github-ci\")"
        ))
    })?;

    let effect = match string_prop(node, "effect") {
        None => Effect::Allow,
        Some(e) => Effect::parse(&e).ok_or_else(|| {
            SynthError::InvalidIntent(format!(
                "grant `{name}` has invalid effect `{e}` (expected \"allow\" or \"deny\")"
            ))
        })?,
    };

    let mut actions = Vec::new();
    let mut resources = Vec::new();
    let mut conditions = Vec::new();
    let mut justification = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "actions" => {
                    actions = dash_list(child);
                }
                "resources" => {
                    resources = dash_list(child);
                }
                "condition" => {
                    let key = first_string_arg(child).ok_or_else(|| {
                        SynthError::InvalidCondition(format!(
                            "condition in grant `{name}` requires a key argument (e.g. condition \"aws:SourceIp\" op=\"IpAddress\")"
                        ))
                    })?;
                    let operator = string_prop(child, "op").unwrap_or_else(default_operator);
                    let mut values: Vec<String> = string_args(child).into_iter().skip(1).collect();
                    values.extend(dash_list(child));
                    conditions.push(ConditionDecl {
                        key,
                        operator,
                        values,
                    });
                }
                "justification" => {
                    justification = first_string_arg(child);
                }
                other => {
                    return Err(SynthError::InvalidIntent(format!(
                        "unexpected child `{other}` in grant `{name}` (expected `actions`, `resources`, `condition` or `justification`)"
                    )));
                }
            }
        }
    }

    Ok(GrantDecl {
        name,
        actor,
        effect,
        actions,
        resources,
        conditions,
        justification,
    })
}

fn parse_trust(node: &KdlNode) -> Result<TrustDecl, SynthError> {
    let name = first_string_arg(node).ok_or_else(|| {
        SynthError::InvalidIntent(
            "trust node requires a name argument (e.g. trust \"GitHubDeploy\" actor=\"ci\")".into(),
        )
    })?;

    let actor = string_prop(node, "actor").ok_or_else(|| {
        SynthError::InvalidIntent(format!("trust `{name}` missing `actor` property"))
    })?;

    let provider = string_prop(node, "provider").ok_or_else(|| {
        SynthError::InvalidIntent(format!(
            "trust `{name}` missing `provider` property (e.g. provider=\"token.actions.githubusercontent.com\")"
        ))
    })?;

    let mut audience = None;
    let mut subjects = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "audience" => {
                    audience = first_string_arg(child);
                }
                "subject" => {
                    subjects.extend(string_args(child));
                }
                "subjects" => {
                    subjects.extend(dash_list(child));
                }
                other => {
                    return Err(SynthError::InvalidIntent(format!(
                        "unexpected child `{other}` in trust `{name}` (expected `audience`, `subject` or `subjects`)"
                    )));
                }
            }
        }
    }

    Ok(TrustDecl {
        name,
        actor,
        provider,
        audience,
        subjects,
    })
}

/// Extract the first string argument from a KDL node.
pub(crate) fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// All positional string arguments of a node, in order.
pub(crate) fn string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn string_prop(node: &KdlNode, key: &str) -> Option<String> {
    node.get(key)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
/// Example KDL:
/// ```kdl
/// actions {
///     - "ecr:PutImage"
///     - "ecr:InitiateLayerUpload"
/// }
/// ```
pub(crate) fn dash_list(node: &KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(|n| first_string_arg(n))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_context() {
        let kdl = r#"context partition="aws" region="us-east-2" account="123456789012""#;
        let intent = parse_kdl_intent(kdl).unwrap();
        assert_eq!(intent.context.region.as_deref(), Some("us-east-2"));
        assert_eq!(intent.context.account.as_deref(), Some("123456789012"));
    }

    #[test]
    fn test_parse_grant_with_condition() {
        let kdl = r#"
grant "PushFromOffice" actor="ci" {
    actions {
        - "ecr:PutImage"
        - "ecr:InitiateLayerUpload"
    }
    resources {
        - "repo/backend"
    }
    condition "aws:SourceIp" op="IpAddress" {
        - "1.2.3.0/24"
    }
    condition "aws:RequestedRegion" "us-east-2"
}
"#;
        let intent = parse_kdl_intent(kdl).unwrap();
        assert_eq!(intent.grants.len(), 1);
        let g = &intent.grants[0];
        assert_eq!(g.name, "PushFromOffice");
        assert_eq!(g.actor, "ci");
        assert_eq!(g.effect, Effect::Allow);
        assert_eq!(g.actions, vec!["ecr:PutImage", "ecr:InitiateLayerUpload"]);
        assert_eq!(g.resources, vec!["repo/backend"]);
        assert_eq!(g.conditions.len(), 2);
        assert_eq!(g.conditions[0].operator, "IpAddress");
        assert_eq!(g.conditions[0].values, vec!["1.2.3.0/24"]);
        assert_eq!(g.conditions[1].operator, "StringEquals");
        assert_eq!(g.conditions[1].values, vec!["us-east-2"]);
    }

    #[test]
    fn test_parse_deny_with_justification() {
        let kdl = r#"
grant "NoPlainHttp" actor="ci" effect="deny" {
    actions {
        - "s3:*"
    }
    resources {
        - "*"
    }
    condition "aws:SecureTransport" op="Bool" "false"
    justification "TLS only"
}
"#;
        let intent = parse_kdl_intent(kdl).unwrap();
        let g = &intent.grants[0];
        assert_eq!(g.effect, Effect::Deny);
        assert_eq!(g.justification.as_deref(), Some("TLS only"));
    }

    #[test]
    fn test_parse_trust() {
        let kdl = r#"
trust "GitHubDeploy" actor="ci" provider="token.actions.githubusercontent.com" {
    audience "sts.amazonaws.com"
    subject "repo:org/app:ref:refs/heads/main"
    subjects {
        - "repo:org/app:environment:production"
    }
}
"#;
        let intent = parse_kdl_intent(kdl).unwrap();
        assert_eq!(intent.trusts.len(), 1);
        let t = &intent.trusts[0];
        assert_eq!(t.provider, "token.actions.githubusercontent.com");
        assert_eq!(t.audience.as_deref(), Some("sts.amazonaws.com"));
        assert_eq!(
            t.subjects,
            vec![
                "repo:org/app:ref:refs/heads/main",
                "repo:org/app:environment:production"
            ]
        );
    }

    #[test]
    fn test_parse_missing_actor() {
        let kdl = r#"grant "x" { actions { - "s3:GetObject" } }"#;
        let err = parse_kdl_intent(kdl).unwrap_err();
        assert!(matches!(err, SynthError::InvalidIntent(_)));
    }

    #[test]
    fn test_parse_invalid_effect() {
        let kdl = r#"grant "x" actor="ci" effect="maybe""#;
        let err = parse_kdl_intent(kdl).unwrap_err();
        assert!(matches!(err, SynthError::InvalidIntent(_)));
    }

    #[test]
    fn test_parse_unexpected_child() {
        let kdl = r#"
grant "x" actor="ci" {
    principals {
        - "user/alice"
    }
}
"#;
        let err = parse_kdl_intent(kdl).unwrap_err();
        assert!(matches!(err, SynthError::InvalidIntent(_)));
    }

    #[test]
    fn test_parse_trust_missing_provider() {
        let kdl = r#"trust "t" actor="ci""#;
        let err = parse_kdl_intent(kdl).unwrap_err();
        assert!(matches!(err, SynthError::InvalidIntent(_)));
    }

    #[test]
    fn test_parse_kdl_syntax_error() {
        let err = parse_kdl_intent(r#"grant "x" actor="#).unwrap_err();
        assert!(matches!(err, SynthError::KdlParse(_)));
    }

    #[test]
    fn test_parse_json_intent() {
        let json = r#"{
            "context": { "account": "123456789012" },
            "grants": [
                {
                    "name": "ReadConfig",
                    "actor": "app",
                    "actions": ["ssm:GetParameter"],
                    "resources": ["parameter/app/*"]
                }
            ],
            "trusts": [
                {
                    "name": "Deploy",
                    "actor": "ci",
                    "provider": "token.actions.githubusercontent.com",
                    "subjects": ["repo:org/app:*"]
                }
            ]
        }"#;
        let intent = parse_json_intent(json).unwrap();
        assert_eq!(intent.context.account.as_deref(), Some("123456789012"));
        assert_eq!(intent.grants[0].effect, Effect::Allow);
        assert!(intent.grants[0].conditions.is_empty());
        assert_eq!(intent.trusts[0].subjects, vec!["repo:org/app:*"]);
    }
}
