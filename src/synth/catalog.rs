//! Registry of provider actions and the resource types they target.
//!
//! The catalog is loaded once at startup (built-in, optionally layered with an
//! external KDL file) and only read afterwards.

use kdl::{KdlDocument, KdlNode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::synth::errors::SynthError;
use crate::synth::intent::{dash_list, first_string_arg, string_prop};
use crate::synth::resource::{Arn, ArnTemplate};
use crate::synth::wildcard;

const BUILTIN_CATALOG: &str = include_str!("../../catalog/aws.kdl");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
    List,
}

impl AccessLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Some(AccessLevel::Read),
            "write" => Some(AccessLevel::Write),
            "list" => Some(AccessLevel::List),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::List => "list",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResourceType {
    pub service: String,
    pub name: String,
    pub arn: ArnTemplate,
    pub aliases: Vec<String>,
}

impl ResourceType {
    /// `service:name`, the form used in action `resources` lists.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.service, self.name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionDescriptor {
    /// Canonical `service:ActionName`.
    pub name: String,
    pub access_level: AccessLevel,
    /// Qualified resource type names (`service:type`).
    pub resource_types: Vec<String>,
    /// The provider only accepts `Resource: "*"` for this action.
    pub unrestrictable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<String>,
}

impl ActionDescriptor {
    pub fn service(&self) -> &str {
        self.name.split(':').next().unwrap_or_default()
    }

    pub fn is_write(&self) -> bool {
        self.access_level == AccessLevel::Write
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    release: String,
    /// lowercase `service:action` -> descriptor
    actions: BTreeMap<String, ActionDescriptor>,
    /// `service:type` -> resource type
    resource_types: BTreeMap<String, ResourceType>,
}

impl ActionCatalog {
    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self, SynthError> {
        Self::from_kdl(BUILTIN_CATALOG)
    }

    pub fn from_kdl(source: &str) -> Result<Self, SynthError> {
        let catalog = parse_catalog(source)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Layer another catalog document on top of this one. Entries in the
    /// overlay replace entries with the same name.
    pub fn with_overlay(mut self, source: &str) -> Result<Self, SynthError> {
        let overlay = parse_catalog(source)?;
        if !overlay.release.is_empty() {
            self.release = overlay.release;
        }
        self.actions.extend(overlay.actions);
        self.resource_types.extend(overlay.resource_types);
        self.validate()?;
        Ok(self)
    }

    pub fn with_overlay_file(self, path: &Path) -> Result<Self, SynthError> {
        let source =
            std::fs::read_to_string(path).map_err(|source| SynthError::IntentLoadError {
                path: path.display().to_string(),
                source,
            })?;
        let catalog = self.with_overlay(&source)?;
        tracing::info!(
            path = %path.display(),
            release = %catalog.release,
            actions = catalog.len(),
            "Layered external action catalog"
        );
        Ok(catalog)
    }

    pub fn release(&self) -> &str {
        &self.release
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionDescriptor> {
        self.actions.values()
    }

    /// Exact, case-insensitive lookup of `service:Action`.
    pub fn lookup(&self, action_name: &str) -> Option<&ActionDescriptor> {
        self.actions.get(&action_name.to_ascii_lowercase())
    }

    /// All descriptors matched by an action pattern such as `s3:Get*`.
    pub fn expand(&self, pattern: &str) -> Vec<&ActionDescriptor> {
        if !wildcard::has_wildcard(pattern) {
            return self.lookup(pattern).into_iter().collect();
        }
        self.actions
            .values()
            .filter(|d| wildcard::matches_ignore_case(pattern, &d.name))
            .collect()
    }

    pub fn resource_type(&self, qualified: &str) -> Option<&ResourceType> {
        self.resource_types.get(qualified)
    }

    pub fn resource_types_for(&self, action: &ActionDescriptor) -> Vec<&ResourceType> {
        action
            .resource_types
            .iter()
            .filter_map(|q| self.resource_types.get(q))
            .collect()
    }

    /// Find the resource type a short form like `repo/backend` refers to,
    /// among the types the given actions target.
    pub fn resource_type_by_alias(
        &self,
        actions: &[&ActionDescriptor],
        alias: &str,
    ) -> Option<&ResourceType> {
        actions
            .iter()
            .flat_map(|a| self.resource_types_for(a))
            .find(|rt| {
                rt.name.eq_ignore_ascii_case(alias)
                    || rt.aliases.iter().any(|a| a.eq_ignore_ascii_case(alias))
            })
    }

    /// Whether `arn` has the shape of some resource type targeted by `action`.
    pub fn accepts_arn(&self, action: &ActionDescriptor, arn: &Arn) -> bool {
        self.resource_types_for(action)
            .iter()
            .any(|rt| rt.arn.accepts(arn))
    }

    fn validate(&self) -> Result<(), SynthError> {
        for action in self.actions.values() {
            if action.unrestrictable && !action.resource_types.is_empty() {
                return Err(SynthError::InvalidCatalog(format!(
                    "action `{}` is unrestrictable but lists resource types",
                    action.name
                )));
            }
            if !action.unrestrictable && action.resource_types.is_empty() {
                return Err(SynthError::InvalidCatalog(format!(
                    "action `{}` lists no resource types (mark it `unrestrictable` if the provider only accepts `*`)",
                    action.name
                )));
            }
            for q in &action.resource_types {
                if !self.resource_types.contains_key(q) {
                    return Err(SynthError::InvalidCatalog(format!(
                        "action `{}` references undefined resource type `{q}`",
                        action.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse_catalog(source: &str) -> Result<ActionCatalog, SynthError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| SynthError::KdlParse(e.to_string()))?;

    let mut catalog = ActionCatalog::default();

    for node in doc.nodes() {
        match node.name().value() {
            "release" => {
                catalog.release = first_string_arg(node).ok_or_else(|| {
                    SynthError::InvalidCatalog(
                        "release node requires a string argument (e.g. release \"2025-06\")"
                            .into(),
                    )
                })?;
            }
            "service" => parse_service(node, &mut catalog)?,
            other => {
                tracing::warn!("ignoring unknown top-level catalog node `{other}`");
            }
        }
    }

    Ok(catalog)
}

fn parse_service(node: &KdlNode, catalog: &mut ActionCatalog) -> Result<(), SynthError> {
    let service = first_string_arg(node)
        .ok_or_else(|| {
            SynthError::InvalidCatalog(
                "service node requires a string argument (e.g. service \"ecr\")".into(),
            )
        })?
        .to_ascii_lowercase();

    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        match child.name().value() {
            "resource" => {
                let name = first_string_arg(child).ok_or_else(|| {
                    SynthError::InvalidCatalog(format!(
                        "resource in service `{service}` requires a name argument"
                    ))
                })?;
                let template = string_prop(child, "arn").ok_or_else(|| {
                    SynthError::InvalidCatalog(format!(
                        "resource `{service}:{name}` missing `arn` property"
                    ))
                })?;
                let arn = ArnTemplate::parse(&template)?;
                if arn.service != service {
                    return Err(SynthError::InvalidCatalog(format!(
                        "resource `{service}:{name}` has an ARN template for service `{}`",
                        arn.service
                    )));
                }
                let mut aliases = Vec::new();
                if let Some(grandchildren) = child.children() {
                    for gc in grandchildren.nodes() {
                        if gc.name().value() == "aliases" {
                            aliases = dash_list(gc);
                        }
                    }
                }
                let rt = ResourceType {
                    service: service.clone(),
                    name,
                    arn,
                    aliases,
                };
                catalog.resource_types.insert(rt.qualified_name(), rt);
            }
            "action" => {
                let name = first_string_arg(child).ok_or_else(|| {
                    SynthError::InvalidCatalog(format!(
                        "action in service `{service}` requires a name argument"
                    ))
                })?;
                let access = string_prop(child, "access").unwrap_or_default();
                let access_level = AccessLevel::parse(&access).ok_or_else(|| {
                    SynthError::InvalidCatalog(format!(
                        "action `{service}:{name}` has invalid access `{access}` (expected read, write or list)"
                    ))
                })?;

                let mut resource_types = Vec::new();
                let mut unrestrictable = false;
                let mut deprecated = None;
                if let Some(grandchildren) = child.children() {
                    for gc in grandchildren.nodes() {
                        match gc.name().value() {
                            "resources" => {
                                resource_types = dash_list(gc)
                                    .into_iter()
                                    .map(|r| {
                                        if r.contains(':') {
                                            r
                                        } else {
                                            format!("{service}:{r}")
                                        }
                                    })
                                    .collect();
                            }
                            "unrestrictable" => unrestrictable = true,
                            "deprecated" => {
                                deprecated = Some(
                                    first_string_arg(gc)
                                        .unwrap_or_else(|| "deprecated".to_string()),
                                );
                            }
                            other => {
                                return Err(SynthError::InvalidCatalog(format!(
                                    "unexpected child `{other}` in action `{service}:{name}`"
                                )));
                            }
                        }
                    }
                }

                let full = format!("{service}:{name}");
                catalog.actions.insert(
                    full.to_ascii_lowercase(),
                    ActionDescriptor {
                        name: full,
                        access_level,
                        resource_types,
                        unrestrictable,
                        deprecated,
                    },
                );
            }
            other => {
                return Err(SynthError::InvalidCatalog(format!(
                    "unexpected child `{other}` in service `{service}` (expected `resource` or `action`)"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = ActionCatalog::builtin().unwrap();
        assert_eq!(catalog.release(), "2025-06");
        assert!(catalog.len() > 50);

        let put = catalog.lookup("ecr:PutImage").unwrap();
        assert_eq!(put.access_level, AccessLevel::Write);
        assert_eq!(put.resource_types, vec!["ecr:repository"]);
        assert!(!put.unrestrictable);

        let token = catalog.lookup("ecr:GetAuthorizationToken").unwrap();
        assert!(token.unrestrictable);

        let send = catalog.lookup("ssm:SendCommand").unwrap();
        assert!(send.resource_types.contains(&"ec2:instance".to_string()));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let catalog = ActionCatalog::builtin().unwrap();
        let d = catalog.lookup("S3:getobject").unwrap();
        assert_eq!(d.name, "s3:GetObject");
        assert!(catalog.lookup("s3:NotARealAction").is_none());
    }

    #[test]
    fn test_expand_wildcards() {
        let catalog = ActionCatalog::builtin().unwrap();
        let names: Vec<&str> = catalog
            .expand("ecr:Batch*")
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "ecr:BatchCheckLayerAvailability",
                "ecr:BatchDeleteImage",
                "ecr:BatchGetImage"
            ]
        );
        assert!(catalog.expand("ecr:Nothing*").is_empty());
        assert_eq!(catalog.expand("*").len(), catalog.len());
    }

    #[test]
    fn test_alias_resolution() {
        let catalog = ActionCatalog::builtin().unwrap();
        let put = catalog.lookup("ecr:PutImage").unwrap();
        let rt = catalog.resource_type_by_alias(&[put], "repo").unwrap();
        assert_eq!(rt.qualified_name(), "ecr:repository");
        assert!(catalog.resource_type_by_alias(&[put], "bucket").is_none());
    }

    #[test]
    fn test_overlay_adds_and_marks_deprecated() {
        let catalog = ActionCatalog::builtin()
            .unwrap()
            .with_overlay(
                r#"
release "2025-06+local"

service "ecr" {
    action "PutImage" access="write" {
        resources {
            - "repository"
        }
        deprecated "use ecr:PutImageV2"
    }
    action "PutImageV2" access="write" {
        resources {
            - "repository"
        }
    }
}
"#,
            )
            .unwrap();
        assert_eq!(catalog.release(), "2025-06+local");
        assert!(catalog.lookup("ecr:PutImageV2").is_some());
        assert_eq!(
            catalog.lookup("ecr:PutImage").unwrap().deprecated.as_deref(),
            Some("use ecr:PutImageV2")
        );
    }

    #[test]
    fn test_invalid_catalogs() {
        let undefined = r#"
service "ecr" {
    action "PutImage" access="write" {
        resources {
            - "repository"
        }
    }
}
"#;
        assert!(matches!(
            ActionCatalog::from_kdl(undefined).unwrap_err(),
            SynthError::InvalidCatalog(_)
        ));

        let bad_access = r#"
service "ecr" {
    action "PutImage" access="admin" {
        unrestrictable
    }
}
"#;
        assert!(matches!(
            ActionCatalog::from_kdl(bad_access).unwrap_err(),
            SynthError::InvalidCatalog(_)
        ));

        let wrong_service = r#"
service "ecr" {
    resource "bucket" arn="arn:${Partition}:s3:::${BucketName}"
}
"#;
        assert!(matches!(
            ActionCatalog::from_kdl(wrong_service).unwrap_err(),
            SynthError::InvalidCatalog(_)
        ));
    }
}
