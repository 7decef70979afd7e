use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SynthError {
    #[error("Failed to load intent file `{path}`")]
    #[diagnostic(
        code(iamsynth::intent_load),
        help("Check that the file exists and contains valid KDL or JSON")
    )]
    IntentLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid intent: {0}")]
    #[diagnostic(
        code(iamsynth::invalid_intent),
        help("Intent files may contain `context`, `grant` and `trust` nodes")
    )]
    InvalidIntent(String),

    #[error("Invalid action catalog: {0}")]
    #[diagnostic(
        code(iamsynth::invalid_catalog),
        help("Catalog files contain `release` and `service` nodes with `resource` and `action` children")
    )]
    InvalidCatalog(String),

    #[error("Unknown action `{action}` in grant `{grant}`")]
    #[diagnostic(
        code(iamsynth::unknown_action),
        help("Actions are written `service:ActionName`; run `iamsynth catalog` to list known actions")
    )]
    UnknownAction { action: String, grant: String },

    #[error("Malformed resource pattern `{pattern}`: {reason}")]
    #[diagnostic(
        code(iamsynth::malformed_resource),
        help("Use `*`, a full ARN (arn:partition:service:region:account:resource) or a short form like `repo/backend`")
    )]
    MalformedResourcePattern { pattern: String, reason: String },

    #[error("Invalid condition: {0}")]
    #[diagnostic(
        code(iamsynth::invalid_condition),
        help("Supported operators: StringEquals, StringNotEquals, StringLike, StringNotLike, ArnEquals, ArnLike, Numeric*, Bool, IpAddress, NotIpAddress, Null")
    )]
    InvalidCondition(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(iamsynth::kdl_parse),
        help("Check your KDL file syntax, see https://kdl.dev for the specification")
    )]
    KdlParse(String),

    #[error("JSON error: {0}")]
    #[diagnostic(code(iamsynth::json))]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    #[diagnostic(code(iamsynth::io))]
    Io(#[from] std::io::Error),
}
