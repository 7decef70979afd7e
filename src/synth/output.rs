use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::synth::document::content_hash;
use crate::synth::errors::SynthError;
use crate::synth::CompiledArtifact;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Index of the documents written for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub input_hash: String,
    pub catalog_release: String,
    /// file name -> content hash
    pub documents: BTreeMap<String, String>,
}

/// Write every policy and trust document plus `manifest.json` into `dir`.
/// Writing the same artifact twice produces identical files. Documents from
/// earlier compiles that are no longer produced are removed.
pub fn write_artifact(
    artifact: &CompiledArtifact,
    dir: &Path,
    pretty: bool,
) -> Result<Manifest, SynthError> {
    std::fs::create_dir_all(dir)?;

    let mut files: BTreeMap<String, String> = BTreeMap::new();
    let mut owners: BTreeMap<String, &str> = BTreeMap::new();

    let docs = artifact
        .policies
        .iter()
        .map(|(actor, doc)| (actor, doc, "policy"))
        .chain(
            artifact
                .trust_policies
                .iter()
                .map(|(actor, doc)| (actor, doc, "trust")),
        );
    for (actor, doc, suffix) in docs {
        let name = format!("{}.{suffix}.json", file_stem(actor));
        if let Some(other) = owners.insert(name.clone(), actor.as_str()) {
            if other != actor.as_str() {
                return Err(SynthError::InvalidIntent(format!(
                    "actors `{other}` and `{actor}` map to the same output file `{name}`"
                )));
            }
        }
        files.insert(name, doc.to_canonical_json(pretty)?);
    }

    let mut documents = BTreeMap::new();
    for (name, contents) in &files {
        std::fs::write(dir.join(name), contents)?;
        documents.insert(name.clone(), content_hash(contents.as_bytes()));
    }

    let removed = prune_stale(dir, &documents)?;

    let manifest = Manifest {
        input_hash: artifact.input_hash.clone(),
        catalog_release: artifact.catalog_release.clone(),
        documents,
    };
    let mut json = serde_json::to_string_pretty(&manifest)?;
    json.push('\n');
    std::fs::write(dir.join(MANIFEST_FILE), json)?;

    tracing::info!(
        dir = %dir.display(),
        documents = manifest.documents.len(),
        removed,
        hash = %manifest.input_hash,
        "Wrote policy documents"
    );

    Ok(manifest)
}

/// Delete policy and trust documents left by an earlier compile that this
/// manifest no longer lists. Other files in `dir` are untouched.
fn prune_stale(dir: &Path, documents: &BTreeMap<String, String>) -> Result<usize, SynthError> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let generated = name.ends_with(".policy.json") || name.ends_with(".trust.json");
        if generated && !documents.contains_key(&name) {
            std::fs::remove_file(entry.path())?;
            tracing::debug!(file = %name, "Removed stale document");
            removed += 1;
        }
    }
    Ok(removed)
}

/// Actor names become file names: anything outside `[A-Za-z0-9._-]` is
/// replaced with `_`.
fn file_stem(actor: &str) -> String {
    let stem: String = actor
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim_start_matches('.');
    if stem.is_empty() {
        "_".to_string()
    } else {
        stem.to_string()
    }
}
