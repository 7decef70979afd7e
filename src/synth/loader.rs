use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use crate::synth::builder::{build, statements_for};
use crate::synth::catalog::{ActionCatalog, ActionDescriptor};
use crate::synth::checker::check;
use crate::synth::condition::{ConditionSet, QualifiedOperator};
use crate::synth::document::{content_hash, PolicyDocument};
use crate::synth::errors::SynthError;
use crate::synth::intent::{parse_json_intent, parse_kdl_intent};
use crate::synth::resource::{Arn, ResourcePattern};
use crate::synth::trust::{self, TrustRelationship, TrustValidator};
use crate::synth::types::*;
use crate::synth::wildcard;
use crate::synth::CompiledArtifact;

/// Settings that shape compilation but do not come from intent files.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Fills context fields the intent files leave unset.
    pub defaults: IntentContext,
    /// OIDC providers whose claims the operator controls.
    pub internal_providers: Vec<String>,
}

/// Load intent documents from a single `.kdl`/`.json` file, or every such
/// file in a directory (sorted by path, other files ignored).
pub fn load_intents(path: &Path) -> Result<Vec<ParsedIntent>, SynthError> {
    if path.is_file() {
        if intent_format(path).is_none() {
            return Err(SynthError::InvalidIntent(format!(
                "intent file `{}` must have a `.kdl` or `.json` extension",
                path.display()
            )));
        }
        return Ok(vec![load_intent_file(path)?]);
    }
    if !path.is_dir() {
        return Err(SynthError::InvalidIntent(format!(
            "intent path `{}` does not exist",
            path.display()
        )));
    }

    let mut entries: Vec<_> = std::fs::read_dir(path)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && intent_format(p).is_some())
        .collect();
    entries.sort();

    let mut parsed = Vec::with_capacity(entries.len());
    for entry in &entries {
        parsed.push(load_intent_file(entry)?);
    }

    tracing::info!(
        dir = %path.display(),
        files = entries.len(),
        "Loaded intent files"
    );

    Ok(parsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntentFormat {
    Kdl,
    Json,
}

fn intent_format(path: &Path) -> Option<IntentFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("kdl") => Some(IntentFormat::Kdl),
        Some("json") => Some(IntentFormat::Json),
        _ => None,
    }
}

fn load_intent_file(path: &Path) -> Result<ParsedIntent, SynthError> {
    let contents = std::fs::read_to_string(path).map_err(|source| SynthError::IntentLoadError {
        path: path.display().to_string(),
        source,
    })?;
    let parsed = match intent_format(path) {
        Some(IntentFormat::Json) => parse_json_intent(&contents)?,
        _ => parse_kdl_intent(&contents)?,
    };
    tracing::debug!(
        path = %path.display(),
        grants = parsed.grants.len(),
        trusts = parsed.trusts.len(),
        "Parsed intent file"
    );
    Ok(parsed)
}

/// Load and compile in one step.
pub fn compile_path(
    path: &Path,
    catalog: &ActionCatalog,
    options: &CompileOptions,
) -> Result<CompiledArtifact, SynthError> {
    let parsed = load_intents(path)?;
    compile(parsed, catalog, options)
}

#[derive(Serialize)]
struct HashInput<'a> {
    catalog_release: &'a str,
    defaults: &'a IntentContext,
    internal_providers: BTreeSet<&'a str>,
    intents: &'a [ParsedIntent],
}

/// Merge parsed intents and compile them into an immutable artifact.
/// Structural problems fail the whole compilation; policy problems become
/// findings.
pub fn compile(
    parsed: Vec<ParsedIntent>,
    catalog: &ActionCatalog,
    options: &CompileOptions,
) -> Result<CompiledArtifact, SynthError> {
    let input_hash = content_hash(&serde_json::to_vec(&HashInput {
        catalog_release: catalog.release(),
        defaults: &options.defaults,
        internal_providers: options
            .internal_providers
            .iter()
            .map(String::as_str)
            .collect(),
        intents: &parsed,
    })?);

    let mut context = IntentContext::default();
    let mut grant_decls: Vec<GrantDecl> = Vec::new();
    let mut trust_decls: Vec<TrustDecl> = Vec::new();

    // Merge all parsed intents
    for p in parsed {
        context.merge(&p.context)?;
        grant_decls.extend(p.grants);
        trust_decls.extend(p.trusts);
    }
    let context = context.with_defaults(&options.defaults);

    check_unique_names(grant_decls.iter().map(|g| (g.actor.as_str(), g.name.as_str())), "grant")?;
    check_unique_names(trust_decls.iter().map(|t| (t.actor.as_str(), t.name.as_str())), "trust")?;

    let grants = grant_decls
        .iter()
        .map(|decl| resolve_grant(decl, catalog, &context))
        .collect::<Result<Vec<_>, _>>()?;

    let statements = build(&grants);
    let mut findings = check(&statements, catalog);

    let mut actors: Vec<&str> = Vec::new();
    for s in &statements {
        if !actors.contains(&s.actor.as_str()) {
            actors.push(&s.actor);
        }
    }
    let policies: BTreeMap<String, PolicyDocument> = actors
        .iter()
        .map(|actor| {
            (
                actor.to_string(),
                PolicyDocument::from_statements(statements_for(&statements, actor).map(|(_, s)| s)),
            )
        })
        .collect();

    let trusts = trust_decls
        .iter()
        .map(TrustRelationship::from_decl)
        .collect::<Result<Vec<_>, _>>()?;

    let validator = TrustValidator::new(&options.internal_providers);
    for t in &trusts {
        findings.extend(
            validator
                .validate_all(t)
                .into_iter()
                .map(|f| f.into_finding(&t.actor)),
        );
    }

    let mut by_actor: BTreeMap<&str, Vec<&TrustRelationship>> = BTreeMap::new();
    for t in &trusts {
        by_actor.entry(t.actor.as_str()).or_default().push(t);
    }
    let mut trust_policies = BTreeMap::new();
    for (actor, ts) in by_actor {
        trust_policies.insert(actor.to_string(), trust::render(&ts, &context)?);
    }

    let artifact = CompiledArtifact {
        input_hash,
        catalog_release: catalog.release().to_string(),
        context,
        statements,
        policies,
        trusts,
        trust_policies,
        findings,
    };

    tracing::info!(
        hash = %artifact.input_hash,
        grants = grants.len(),
        statements = artifact.statements.len(),
        actors = artifact.policies.len(),
        trusts = artifact.trusts.len(),
        findings = artifact.findings.len(),
        "Compiled access policies"
    );

    Ok(artifact)
}

fn check_unique_names<'a>(
    names: impl Iterator<Item = (&'a str, &'a str)>,
    what: &str,
) -> Result<(), SynthError> {
    let mut seen = HashSet::new();
    for (actor, name) in names {
        if actor.trim().is_empty() {
            return Err(SynthError::InvalidIntent(format!(
                "{what} `{name}` has an empty actor"
            )));
        }
        if !seen.insert((actor, name)) {
            return Err(SynthError::InvalidIntent(format!(
                "{what} `{name}` is declared more than once for actor `{actor}`"
            )));
        }
    }
    Ok(())
}

/// Validate a declared grant against the catalog and expand its short
/// resource forms.
pub fn resolve_grant(
    decl: &GrantDecl,
    catalog: &ActionCatalog,
    context: &IntentContext,
) -> Result<Grant, SynthError> {
    if decl.actions.is_empty() {
        return Err(SynthError::InvalidIntent(format!(
            "grant `{}` lists no actions",
            decl.name
        )));
    }
    if decl.resources.is_empty() {
        return Err(SynthError::InvalidIntent(format!(
            "grant `{}` lists no resources (use `*` for unrestrictable actions)",
            decl.name
        )));
    }

    let mut actions = BTreeSet::new();
    let mut descriptors: Vec<&ActionDescriptor> = Vec::new();
    for raw in &decl.actions {
        let raw = raw.trim();
        let matched = catalog.expand(raw);
        if matched.is_empty() {
            return Err(SynthError::UnknownAction {
                action: raw.to_string(),
                grant: decl.name.clone(),
            });
        }
        if wildcard::has_wildcard(raw) {
            actions.insert(raw.to_string());
        } else {
            // Canonical spelling from the catalog.
            actions.insert(matched[0].name.clone());
        }
        descriptors.extend(matched);
    }

    let mut resources = BTreeSet::new();
    for raw in &decl.resources {
        resources.insert(resolve_resource(raw.trim(), &descriptors, catalog, context)?);
    }

    let mut conditions = ConditionSet::new();
    for c in &decl.conditions {
        let op = QualifiedOperator::parse(&c.operator).ok_or_else(|| {
            SynthError::InvalidCondition(format!(
                "unknown operator `{}` on `{}` in grant `{}`",
                c.operator, c.key, decl.name
            ))
        })?;
        conditions.insert(op, c.key.trim(), c.values.iter().cloned())?;
    }

    Ok(Grant {
        name: decl.name.clone(),
        actor: decl.actor.clone(),
        effect: decl.effect,
        actions,
        resources,
        conditions,
        justification: decl.justification.clone(),
    })
}

fn resolve_resource(
    raw: &str,
    descriptors: &[&ActionDescriptor],
    catalog: &ActionCatalog,
    context: &IntentContext,
) -> Result<ResourcePattern, SynthError> {
    let malformed = |reason: String| SynthError::MalformedResourcePattern {
        pattern: raw.to_string(),
        reason,
    };

    if raw == "*" {
        return Ok(ResourcePattern::Any);
    }

    let arn = if raw.starts_with("arn:") {
        Arn::parse(raw)?
    } else {
        let Some((alias, path)) = raw.split_once('/') else {
            return Err(malformed(
                "expected `*`, a full ARN or a short form like `repo/backend`".into(),
            ));
        };
        if path.is_empty() {
            return Err(malformed(format!("short form `{alias}/` has an empty path")));
        }
        let rt = catalog
            .resource_type_by_alias(descriptors, alias)
            .ok_or_else(|| {
                malformed(format!(
                    "no resource type `{alias}` is targeted by the listed actions"
                ))
            })?;
        rt.arn.expand(
            path,
            context.partition(),
            context.region.as_deref().unwrap_or("*"),
            context.account.as_deref().unwrap_or("*"),
        )
    };

    if !descriptors.iter().any(|d| catalog.accepts_arn(d, &arn)) {
        return Err(malformed(
            "does not match the ARN shape of any resource type the listed actions target".into(),
        ));
    }
    Ok(ResourcePattern::Arn(arn))
}
