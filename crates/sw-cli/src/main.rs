mod report;
mod server;
mod settings;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use rmcp::{ServiceExt, transport::stdio};
use serde_json::json;
use sw_concepts::{Demo, Step, parse_script, play};
use sw_core::{ComposerGraph, SyncEngine};

use settings::Settings;

#[derive(Parser)]
#[command(name = "sw", about = "syncweave synchronization engine CLI and MCP server")]
struct Cli {
    /// Settings file (TOML). Falls back to $SW_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the maximum cascade depth
    #[arg(long, global = true)]
    max_depth: Option<usize>,

    /// Seed random behaviors for reproducible runs
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a graph and print a summary
    Validate {
        /// Graph JSON as exported by the composer
        graph: PathBuf,
    },

    /// Load a graph and submit triggers one at a time
    Run {
        /// Graph JSON as exported by the composer
        graph: PathBuf,

        /// JSON array of {concept, action, inputs, repeat} steps
        #[arg(long)]
        script: Option<PathBuf>,

        /// Extra trigger, e.g. 'Button.clicked={"kind":"inc"}'. Repeatable
        #[arg(long = "submit", value_name = "CONCEPT.ACTION[=JSON]")]
        submits: Vec<String>,

        /// Print the final state of a concept. Repeatable
        #[arg(long)]
        inspect: Vec<String>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run or export a bundled demo
    Demo {
        /// Demo name; omit to list them
        name: Option<String>,

        /// Write the demo graph to a file instead of running it
        #[arg(long)]
        export: Option<PathBuf>,

        /// List the bundled demos
        #[arg(long)]
        list: bool,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Start MCP server on stdio transport
    Serve {
        /// Graph JSON to serve
        #[arg(required_unless_present = "demo")]
        graph: Option<PathBuf>,

        /// Serve a bundled demo instead of a file
        #[arg(long, conflicts_with = "graph")]
        demo: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Validate { graph } => cmd_validate(graph),
        Commands::Run {
            graph,
            script,
            submits,
            inspect,
            json,
        } => cmd_run(&cli, graph, script.as_deref(), submits, inspect, *json),
        Commands::Demo {
            name,
            export,
            list,
            json,
        } => cmd_demo(&cli, name.as_deref(), export.as_deref(), *list, *json),
        Commands::Serve { graph, demo } => cmd_serve(&cli, graph.as_deref(), demo.as_deref()).await,
    }
}

/// Settings file plus command line overrides.
fn settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(depth) = cli.max_depth {
        settings.engine.max_cascade_depth = depth;
    }
    if cli.seed.is_some() {
        settings.library.seed = cli.seed;
    }
    Ok(settings)
}

fn read_graph(path: &Path) -> Result<ComposerGraph> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    ComposerGraph::from_json(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn load_engine(cli: &Cli, graph: &ComposerGraph) -> Result<SyncEngine> {
    let settings = settings(cli)?;
    SyncEngine::load(graph, &settings.library(), settings.engine.clone()).map_err(|e| {
        let problems = report::problems(&e);
        for line in &problems {
            eprintln!("error: {line}");
        }
        anyhow!("graph failed validation ({} problem(s))", problems.len())
    })
}

/// `Concept.action` or `Concept.action={...}`.
fn parse_submit(spec: &str) -> Result<Step> {
    let (target, inputs) = match spec.split_once('=') {
        Some((target, raw)) => {
            let inputs: serde_json::Value = serde_json::from_str(raw)
                .with_context(|| format!("invalid JSON inputs in '{spec}'"))?;
            (target, inputs)
        }
        None => (spec, json!({})),
    };
    if !inputs.is_object() {
        bail!("inputs in '{spec}' must be a JSON object");
    }
    let Some((concept, action)) = target.rsplit_once('.') else {
        bail!("expected CONCEPT.ACTION[=JSON], got '{spec}'");
    };
    if concept.is_empty() || action.is_empty() {
        bail!("expected CONCEPT.ACTION[=JSON], got '{spec}'");
    }
    Ok(Step::new(concept, action, inputs))
}

fn cmd_validate(path: &Path) -> Result<()> {
    let graph = read_graph(path)?;
    match graph.compile() {
        Ok(compiled) => {
            print!("{}", report::summary(&compiled, graph.edges.len()));
            println!("ok");
            Ok(())
        }
        Err(e) => {
            let problems = report::problems(&e);
            for line in &problems {
                println!("error: {line}");
            }
            bail!("{} failed validation ({} problem(s))", path.display(), problems.len())
        }
    }
}

fn cmd_run(
    cli: &Cli,
    path: &Path,
    script: Option<&Path>,
    submits: &[String],
    inspect: &[String],
    as_json: bool,
) -> Result<()> {
    let graph = read_graph(path)?;
    let mut engine = load_engine(cli, &graph)?;

    let mut steps = match script {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read {}", p.display()))?;
            parse_script(&text).with_context(|| format!("invalid script {}", p.display()))?
        }
        None => Vec::new(),
    };
    for spec in submits {
        steps.push(parse_submit(spec)?);
    }
    if steps.is_empty() && inspect.is_empty() {
        eprintln!("nothing to run: pass --script or --submit");
    }

    let played = play(&mut engine, &steps);
    let mut states = Vec::new();
    for concept in inspect {
        let state = engine
            .inspect(concept)
            .with_context(|| format!("cannot inspect {concept}"))?;
        states.push((concept.clone(), state));
    }

    if as_json {
        let out = json!({
            "steps": played.iter().map(report::played_json).collect::<Vec<_>>(),
            "states": states
                .iter()
                .map(|(c, s)| (c.clone(), serde_json::to_value(s).unwrap_or_default()))
                .collect::<serde_json::Map<_, _>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for p in &played {
            report::print_played(p);
        }
        for (concept, state) in &states {
            report::print_state(concept, state);
        }
    }
    Ok(())
}

fn cmd_demo(
    cli: &Cli,
    name: Option<&str>,
    export: Option<&Path>,
    list: bool,
    as_json: bool,
) -> Result<()> {
    let Some(name) = name.filter(|_| !list) else {
        for demo in Demo::ALL {
            println!("{:<14} {}", demo.name(), demo.summary());
        }
        return Ok(());
    };
    let demo: Demo = name.parse().map_err(|e: String| anyhow!(e))?;
    let graph = demo.graph().context("bundled demo graph is invalid")?;

    if let Some(path) = export {
        std::fs::write(path, graph.to_json_pretty()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("exported {demo} to {}", path.display());
        return Ok(());
    }

    let mut engine = load_engine(cli, &graph)?;
    let played = play(&mut engine, &demo.script());
    let ids = engine.registry().ids().to_vec();

    if as_json {
        let mut states = serde_json::Map::new();
        for id in &ids {
            states.insert(id.clone(), serde_json::to_value(engine.inspect(id)?)?);
        }
        let out = json!({
            "demo": demo.name(),
            "steps": played.iter().map(report::played_json).collect::<Vec<_>>(),
            "states": states,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("demo {demo}: {}", demo.summary());
        for p in &played {
            report::print_played(p);
        }
        println!("-- final state");
        for id in &ids {
            report::print_state(id, &engine.inspect(id)?);
        }
    }
    Ok(())
}

async fn cmd_serve(cli: &Cli, path: Option<&Path>, demo: Option<&str>) -> Result<()> {
    let graph = match (path, demo) {
        (Some(p), _) => read_graph(p)?,
        (None, Some(name)) => {
            let demo: Demo = name.parse().map_err(|e: String| anyhow!(e))?;
            demo.graph()?
        }
        (None, None) => bail!("serve needs a graph file or --demo"),
    };
    let engine = load_engine(cli, &graph)?;
    tracing::info!(concepts = engine.registry().len(), syncs = engine.rules().len(), "starting MCP server");

    let server = server::SwServer::new(engine);
    let service = server
        .serve(stdio())
        .await
        .context("failed to start MCP server")?;
    service.waiting().await?;
    Ok(())
}
