pub mod builders;

pub use builders::{intent, GrantBuilder, TrustBuilder, ACCOUNT, REGION};

use iamsynth::synth::catalog::ActionCatalog;
use iamsynth::synth::loader::{compile, CompileOptions};
use iamsynth::synth::types::ParsedIntent;
use iamsynth::synth::CompiledArtifact;

pub fn catalog() -> ActionCatalog {
    ActionCatalog::builtin().expect("built-in catalog must load")
}

/// Compile with the built-in catalog and default options.
pub fn compile_intent(parsed: ParsedIntent) -> CompiledArtifact {
    compile(vec![parsed], &catalog(), &CompileOptions::default()).expect("compilation failed")
}
