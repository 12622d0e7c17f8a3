use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use scanner_engine::{Engine, EngineOptions, EngineResult, Namespace, ParameterSet};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

mod report;

#[derive(Parser)]
#[command(name = "scanner-isolate")]
#[command(about = "Split multi-scanner files into isolated, parameterized scanners", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for output)
    #[arg(long, global = true)]
    quiet: bool,

    /// TOML file with engine options (flags below override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Boundaries below this confidence are flagged for review
    #[arg(long, global = true)]
    min_confidence: Option<f64>,

    /// Hard cap on boundaries per file
    #[arg(long, global = true)]
    max_boundaries: Option<usize>,

    /// Disable the semantic boundary signal
    #[arg(long, global = true)]
    no_semantic: bool,

    /// Wall-clock budget for the run
    #[arg(long, global = true)]
    time_budget_ms: Option<u64>,

    /// Worker threads (0 = available parallelism)
    #[arg(long, global = true)]
    workers: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Full run: boundaries, parameters, contamination check, templates
    Analyze(AnalyzeArgs),

    /// Only list detected boundaries
    Boundaries(AnalyzeArgs),

    /// Show isolated parameter sets
    Params(ParamsArgs),

    /// Print the generated template of one namespace
    Template(TemplateArgs),
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Scanner file (`-` reads stdin)
    file: PathBuf,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ParamsArgs {
    /// Scanner file (`-` reads stdin)
    file: PathBuf,

    /// Only this namespace (use GLOBAL for shared values)
    #[arg(long)]
    namespace: Option<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct TemplateArgs {
    /// Scanner file (`-` reads stdin)
    file: PathBuf,

    /// Namespace to print
    #[arg(long)]
    namespace: String,
}

fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // Keep stdout clean for JSON parsing
    let json_output = match &cli.command {
        Commands::Analyze(args) | Commands::Boundaries(args) => args.json,
        Commands::Params(args) => args.json,
        Commands::Template(_) => false,
    };
    if json_output {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let options = load_options(&cli)?;
    let engine = Engine::new(options).context("Invalid engine options")?;

    match cli.command {
        Commands::Analyze(args) => run_analyze(&engine, &args)?,
        Commands::Boundaries(args) => run_boundaries(&engine, &args)?,
        Commands::Params(args) => run_params(&engine, &args)?,
        Commands::Template(args) => run_template(&engine, &args)?,
    }

    Ok(())
}

/// Options file first, then flag overrides
fn load_options(cli: &Cli) -> Result<EngineOptions> {
    let mut options = match &cli.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str::<EngineOptions>(&raw)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => EngineOptions::default(),
    };

    if let Some(value) = cli.min_confidence {
        options.min_boundary_confidence = value;
    }
    if let Some(value) = cli.max_boundaries {
        options.max_boundaries = value;
    }
    if cli.no_semantic {
        options.enable_semantic_detector = false;
    }
    if let Some(value) = cli.time_budget_ms {
        options.time_budget_ms = value;
    }
    if let Some(value) = cli.workers {
        options.worker_threads = value;
    }
    log::debug!("Engine options: {options:?}");
    Ok(options)
}

fn read_source(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn analyze(engine: &Engine, path: &Path) -> Result<EngineResult> {
    let source = read_source(path)?;
    engine
        .run(&source)
        .with_context(|| format!("Failed to analyze {}", path.display()))
}

/// Full run report
fn run_analyze(engine: &Engine, args: &AnalyzeArgs) -> Result<()> {
    let result = analyze(engine, &args.file)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", report::render_summary(&result));
    }
    Ok(())
}

/// Detected boundaries only
fn run_boundaries(engine: &Engine, args: &AnalyzeArgs) -> Result<()> {
    let result = analyze(engine, &args.file)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result.boundaries)?);
    } else {
        eprintln!("Found {} boundaries", result.boundaries.len());
        print!("{}", report::render_boundaries(&result.boundaries));
    }
    Ok(())
}

/// Isolated parameter sets, optionally for one namespace
fn run_params(engine: &Engine, args: &ParamsArgs) -> Result<()> {
    let result = analyze(engine, &args.file)?;
    let sets: BTreeMap<&Namespace, &ParameterSet> = result
        .parameter_sets
        .iter()
        .filter(|(ns, _)| args.namespace.as_deref().map_or(true, |name| ns.as_str() == name))
        .collect();
    if let (Some(name), true) = (&args.namespace, sets.is_empty()) {
        anyhow::bail!("No parameter set for namespace `{name}`");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sets)?);
    } else {
        print!("{}", report::render_parameters(sets));
    }
    Ok(())
}

/// Released template source for one namespace
fn run_template(engine: &Engine, args: &TemplateArgs) -> Result<()> {
    let result = analyze(engine, &args.file)?;
    let namespace = Namespace::new(args.namespace.as_str());
    let boundary = result
        .boundary(&namespace)
        .with_context(|| format!("Unknown namespace `{}`", args.namespace))?;

    let Some(template) = result.template(&namespace) else {
        anyhow::bail!(
            "No template for `{}`: boundary is {} and requires review",
            namespace,
            boundary.state.as_str()
        );
    };
    if !template.is_emitted() {
        anyhow::bail!(
            "Template for `{}` was not emitted: {}",
            namespace,
            report::status_label(template)
        );
    }
    print!("{}", template.source_text);
    Ok(())
}
