use std::fmt;

use crate::synth::errors::SynthError;
use crate::synth::wildcard;

/// A parsed `arn:partition:service:region:account:resource` string. Any
/// field may carry IAM wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account: String,
    pub resource: String,
}

impl Arn {
    pub fn parse(s: &str) -> Result<Self, SynthError> {
        let malformed = |reason: &str| SynthError::MalformedResourcePattern {
            pattern: s.to_string(),
            reason: reason.to_string(),
        };
        let parts: Vec<&str> = s.splitn(6, ':').collect();
        if parts.len() != 6 {
            return Err(malformed(
                "expected six `:`-separated fields (arn:partition:service:region:account:resource)",
            ));
        }
        if parts[0] != "arn" {
            return Err(malformed("must start with `arn:`"));
        }
        if parts[1].is_empty() {
            return Err(malformed("partition is empty"));
        }
        if parts[2].is_empty() || wildcard::has_wildcard(parts[2]) {
            return Err(malformed("service must be a literal name"));
        }
        if parts[5].is_empty() {
            return Err(malformed("resource is empty"));
        }
        Ok(Self {
            partition: parts[1].to_string(),
            service: parts[2].to_string(),
            region: parts[3].to_string(),
            account: parts[4].to_string(),
            resource: parts[5].to_string(),
        })
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account, self.resource
        )
    }
}

/// Resource scope of a grant or statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourcePattern {
    /// `*`: every resource the action can touch.
    Any,
    Arn(Arn),
}

impl ResourcePattern {
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, ResourcePattern::Any)
    }

    /// Every resource matched by `other` is also matched by `self`.
    pub fn covers(&self, other: &ResourcePattern) -> bool {
        match (self, other) {
            (ResourcePattern::Any, _) => true,
            (ResourcePattern::Arn(_), ResourcePattern::Any) => false,
            (ResourcePattern::Arn(a), ResourcePattern::Arn(b)) => {
                wildcard::covers(&a.to_string(), &b.to_string())
            }
        }
    }

    /// Some resource could be matched by both patterns.
    pub fn overlaps(&self, other: &ResourcePattern) -> bool {
        match (self, other) {
            (ResourcePattern::Any, _) | (_, ResourcePattern::Any) => true,
            (ResourcePattern::Arn(a), ResourcePattern::Arn(b)) => {
                wildcard::intersects(&a.to_string(), &b.to_string())
            }
        }
    }
}

impl fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourcePattern::Any => f.write_str("*"),
            ResourcePattern::Arn(arn) => arn.fmt(f),
        }
    }
}

/// Shape of a resource type's ARN, taken from its catalog template such as
/// `arn:${Partition}:ecr:${Region}:${Account}:repository/${RepositoryName}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArnTemplate {
    pub template: String,
    pub service: String,
    pub regional: bool,
    pub account_scoped: bool,
    /// Resource field with every `${Var}` replaced by `*`.
    resource_glob: String,
    /// Literal text before the first `${Var}` of the resource field.
    resource_prefix: String,
}

impl ArnTemplate {
    pub fn parse(template: &str) -> Result<Self, SynthError> {
        let invalid = |reason: &str| {
            SynthError::InvalidCatalog(format!("ARN template `{template}`: {reason}"))
        };
        let parts: Vec<&str> = template.splitn(6, ':').collect();
        if parts.len() != 6 || parts[0] != "arn" {
            return Err(invalid("expected arn:partition:service:region:account:resource"));
        }
        let service = parts[2];
        if service.is_empty() || service.contains("${") {
            return Err(invalid("service must be literal"));
        }
        let resource = parts[5];
        if resource.is_empty() {
            return Err(invalid("resource field is empty"));
        }
        let resource_prefix = resource
            .split("${")
            .next()
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            template: template.to_string(),
            service: service.to_string(),
            regional: !parts[3].is_empty(),
            account_scoped: !parts[4].is_empty(),
            resource_glob: placeholders_to_glob(resource),
            resource_prefix,
        })
    }

    /// Whether `arn` has the shape this template describes.
    pub fn accepts(&self, arn: &Arn) -> bool {
        arn.service == self.service
            && self.regional == !arn.region.is_empty()
            && self.account_scoped == !arn.account.is_empty()
            && wildcard::matches(&self.resource_glob, &arn.resource)
    }

    /// Expand a short `path` (the part after `alias/`) into a full ARN.
    pub fn expand(&self, path: &str, partition: &str, region: &str, account: &str) -> Arn {
        Arn {
            partition: partition.to_string(),
            service: self.service.clone(),
            region: if self.regional {
                region.to_string()
            } else {
                String::new()
            },
            account: if self.account_scoped {
                account.to_string()
            } else {
                String::new()
            },
            resource: format!("{}{}", self.resource_prefix, path),
        }
    }
}

fn placeholders_to_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start..].find('}') {
            Some(end) => {
                out.push('*');
                rest = &rest[start + end + 1..];
            }
            None => {
                rest = &rest[start..];
                break;
            }
        }
    }
    out.push_str(rest);
    out
}
