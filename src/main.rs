use std::path::PathBuf;

use clap::{Parser, Subcommand};
use iamsynth::settings::Settings;
use iamsynth::synth::catalog::ActionCatalog;
use iamsynth::synth::checker::Severity;
use iamsynth::synth::report::{self, FailOn, ReportFormat};
use iamsynth::synth::{loader, output, CompiledArtifact};
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "iamsynth",
    version,
    about = "Least-privilege IAM policy synthesizer for CI deployment roles"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "iamsynth.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile intent files, write policy documents and report findings
    Compile {
        /// Intent file or directory of `.kdl`/`.json` intent files
        intent: PathBuf,
        /// Output directory (overrides `output.dir`)
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long, value_enum)]
        format: Option<ReportFormat>,
        #[arg(long, value_enum)]
        fail_on: Option<FailOn>,
    },
    /// Compile and report findings without writing documents
    Check {
        intent: PathBuf,
        #[arg(long, value_enum)]
        format: Option<ReportFormat>,
        #[arg(long, value_enum)]
        fail_on: Option<FailOn>,
    },
    /// List catalog actions
    Catalog {
        /// Only show actions matching this pattern, e.g. `ecr:*`
        #[arg(long)]
        action: Option<String>,
    },
}

fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::debug!(?settings, "Loaded configuration");

    let catalog = settings.load_catalog()?;
    tracing::info!(
        release = %catalog.release(),
        actions = catalog.len(),
        "Loaded action catalog"
    );

    match cli.command {
        Command::Compile {
            intent,
            out,
            format,
            fail_on,
        } => {
            let artifact = loader::compile_path(&intent, &catalog, &settings.compile_options())?;
            let dir = out.unwrap_or_else(|| settings.output.dir.clone());
            output::write_artifact(&artifact, &dir, settings.output.pretty)?;
            finish(
                &artifact,
                format.unwrap_or(settings.report.format),
                fail_on.unwrap_or(settings.report.fail_on),
            )
        }
        Command::Check {
            intent,
            format,
            fail_on,
        } => {
            let artifact = loader::compile_path(&intent, &catalog, &settings.compile_options())?;
            finish(
                &artifact,
                format.unwrap_or(settings.report.format),
                fail_on.unwrap_or(settings.report.fail_on),
            )
        }
        Command::Catalog { action } => {
            print_catalog(&catalog, action.as_deref());
            Ok(())
        }
    }
}

fn finish(artifact: &CompiledArtifact, format: ReportFormat, fail_on: FailOn) -> Result<()> {
    print!("{}", report::render(artifact, format)?);
    if report::should_fail(artifact, fail_on) {
        miette::bail!(
            "findings at or above `{}` severity: {} block, {} warn",
            format!("{fail_on:?}").to_lowercase(),
            artifact.count(Severity::Block),
            artifact.count(Severity::Warn)
        );
    }
    Ok(())
}

fn print_catalog(catalog: &ActionCatalog, pattern: Option<&str>) {
    let actions: Vec<_> = match pattern {
        Some(p) => catalog.expand(p),
        None => catalog.actions().collect(),
    };
    println!("catalog release {}", catalog.release());
    for a in actions {
        let scope = if a.unrestrictable {
            "*".to_string()
        } else {
            a.resource_types.join(", ")
        };
        match &a.deprecated {
            Some(note) => println!(
                "{:<45} {:<5}  {scope}  (deprecated: {note})",
                a.name,
                a.access_level.to_string()
            ),
            None => println!("{:<45} {:<5}  {scope}", a.name, a.access_level.to_string()),
        }
    }
}
