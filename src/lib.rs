//! iamsynth - least-privilege IAM policy synthesizer
//!
//! Compiles declared access intent into provider policy documents and trust
//! policies, checking them against an action catalog on the way.
//! It exposes all modules for testing purposes.

pub mod settings;
pub mod synth;
