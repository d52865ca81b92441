//! pullflow CLI: inspect function bodies and graphs, run datasets.

use clap::{Args, Parser, Subcommand};
use pullflow_core::config::EngineConfig;
use pullflow_core::graph::GraphDef;
use pullflow_exec::Engine;
use pullflow_function::{Analysis, FunctionLibrary, LocalExecutor, ShortCircuitAnalyzer};
use pullflow_operators::dataset_from_graph;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pullflow")]
#[command(about = "pullflow: lazy pull-based datasets with a short-circuiting Map", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether a function body can skip the executor
    Analyze {
        /// Path to the function library JSON
        #[arg(short, long)]
        library: PathBuf,

        /// Function to analyze
        #[arg(short, long)]
        function: String,

        /// Number of trailing inputs bound as captured values
        #[arg(long, default_value_t = 0)]
        captured: usize,
    },

    /// Print the nodes and fingerprint of a dataset graph
    Describe {
        /// Path to the graph JSON
        #[arg(short, long)]
        graph: PathBuf,
    },

    /// Pull a dataset graph to the end, printing one JSON record per line
    Run(RunArgs),
}

#[derive(Args, Default)]
struct RunArgs {
    /// Path to the graph JSON
    #[arg(short, long)]
    graph: PathBuf,

    /// Path to the function library JSON
    #[arg(short, long)]
    library: PathBuf,

    /// Checkpoint directory (overrides config)
    #[arg(long)]
    checkpoint_dir: Option<String>,

    /// Checkpoint URI, `file:///path` or `memory://name`
    #[arg(long)]
    checkpoint_uri: Option<String>,

    /// Records between checkpoints
    #[arg(long)]
    checkpoint_every: Option<u64>,

    /// Checkpoint codec: none, zstd or lz4
    #[arg(long)]
    checkpoint_codec: Option<String>,

    /// Checkpoint name (defaults to one derived from the graph fingerprint)
    #[arg(long)]
    checkpoint_name: Option<String>,

    /// Resume from the latest checkpoint of this graph
    #[arg(long)]
    resume: bool,

    /// Always invoke the function, even for pure selections
    #[arg(long)]
    no_short_circuit: bool,

    /// Pull from this many threads (record order is then unspecified)
    #[arg(long)]
    parallel: Option<usize>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PULLFLOW_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Analyze {
            library,
            function,
            captured,
        } => analyze_function(&library, &function, captured).map(|out| print!("{out}")),
        Commands::Describe { graph } => describe_graph(&graph).map(|out| print!("{out}")),
        Commands::Run(args) => run_graph(&args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_library(path: &Path) -> Result<FunctionLibrary, Box<dyn std::error::Error>> {
    Ok(FunctionLibrary::from_json(&fs::read_to_string(path)?)?)
}

fn load_graph(path: &Path) -> Result<GraphDef, Box<dyn std::error::Error>> {
    Ok(GraphDef::from_json(&fs::read_to_string(path)?)?)
}

fn analyze_function(
    library_path: &Path,
    name: &str,
    num_captured: usize,
) -> Result<String, Box<dyn std::error::Error>> {
    let library = load_library(library_path)?;
    let def = library.lookup(name)?;
    let mut out = String::new();

    writeln!(out, "Function {name}")?;
    writeln!(
        out,
        "  Inputs: {} ({} captured)",
        def.inputs.len(),
        num_captured
    )?;
    writeln!(out, "  Outputs: {}", def.outputs.len())?;
    match ShortCircuitAnalyzer::analyze(def) {
        Analysis::Selection(indices) => {
            writeln!(out, "  Short-circuit: yes, selects {indices:?}")?;
            if let Some(plan) = ShortCircuitAnalyzer::plan(def, num_captured) {
                for (i, t) in plan.transfers().iter().enumerate() {
                    writeln!(out, "    output {i}: {t:?}")?;
                }
            } else {
                writeln!(out, "  (selection does not fit {num_captured} captured inputs)")?;
            }
        }
        Analysis::Ineligible(reason) => {
            writeln!(out, "  Short-circuit: no ({reason})")?;
        }
    }
    Ok(out)
}

fn describe_graph(graph_path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let graph = load_graph(graph_path)?;
    let mut out = String::new();

    writeln!(out, "Dataset Graph")?;
    writeln!(out, "=============")?;
    writeln!(out, "Fingerprint: {}", graph.fingerprint()?)?;
    writeln!(out, "Output: {}", graph.output_node()?.id)?;
    if !graph.functions.is_empty() {
        let names: Vec<_> = graph.functions.iter().map(String::as_str).collect();
        writeln!(out, "Functions: {}", names.join(", "))?;
    }
    writeln!(out)?;
    for node in &graph.nodes {
        let inputs: Vec<_> = node.inputs.iter().map(ToString::to_string).collect();
        writeln!(out, "  {} {} [{}]", node.id, node.op, inputs.join(", "))?;
        for (i, list) in node.list_inputs.iter().enumerate() {
            let ids: Vec<_> = list.iter().map(ToString::to_string).collect();
            writeln!(out, "    list {i}: [{}]", ids.join(", "))?;
        }
        for (k, v) in &node.attrs {
            writeln!(out, "    {k} = {v:?}")?;
        }
    }
    Ok(out)
}

fn apply_run_overrides(cfg: &mut EngineConfig, args: &RunArgs) {
    if let Some(dir) = &args.checkpoint_dir {
        cfg.checkpoint_dir = dir.clone();
    }
    if let Some(uri) = &args.checkpoint_uri {
        cfg.checkpoint_uri = Some(uri.clone());
    }
    if let Some(every) = args.checkpoint_every {
        cfg.checkpoint_every = Some(every);
    }
    if let Some(codec) = &args.checkpoint_codec {
        cfg.checkpoint_codec = codec.clone();
    }
    if args.resume {
        cfg.resume = true;
    }
    if args.no_short_circuit {
        cfg.short_circuit = false;
    }
    if let Some(workers) = args.parallel {
        cfg.max_parallel_pulls = workers;
    }
}

fn wants_checkpoints(cfg: &EngineConfig, args: &RunArgs) -> bool {
    cfg.checkpoint_every.is_some()
        || cfg.resume
        || cfg.checkpoint_uri.is_some()
        || args.checkpoint_dir.is_some()
}

fn build_executor(cfg: &EngineConfig) -> Result<LocalExecutor, pullflow_function::FunctionError> {
    if cfg.use_inter_op_parallelism {
        LocalExecutor::with_worker_threads(cfg.max_parallel_pulls)
    } else {
        Ok(LocalExecutor::new())
    }
}

fn run_graph(args: &RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let graph = load_graph(&args.graph)?;
    let library = load_library(&args.library)?;

    let mut config = EngineConfig::from_env();
    apply_run_overrides(&mut config, args);

    let executor = build_executor(&config)?;
    let dataset = dataset_from_graph(&graph, &library, &config)?;
    tracing::info!(dataset = %dataset.debug_string(), "dataset rebuilt");

    let checkpoints = wants_checkpoints(&config, args);
    let mut engine = Engine::new(config, Arc::new(executor))?;
    if checkpoints {
        engine = engine.with_configured_checkpoints()?;
    }
    if let Some(name) = &args.checkpoint_name {
        engine = engine.with_checkpoint_name(name.clone());
    }

    if let Some(workers) = args.parallel {
        let records = engine.collect_parallel(&dataset, workers)?;
        for r in &records {
            println!("{}", serde_json::to_string(r)?);
        }
        eprintln!("✓ {} records from {} workers", records.len(), workers);
        return Ok(());
    }

    let summary = engine.run(&dataset, |r| {
        let line = serde_json::to_string(&r)
            .map_err(|e| pullflow_exec::ExecError::Sink(e.to_string()))?;
        println!("{line}");
        Ok(())
    })?;

    eprintln!("✓ Dataset pulled to the end");
    eprintln!("  Records: {} ({} total)", summary.records, summary.total_records);
    eprintln!("  Checkpoints: {}", summary.checkpoints);
    eprintln!("  Duration: {}ms", summary.elapsed_ms);
    eprintln!("  Fingerprint: {}", summary.fingerprint);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pullflow_core::schema::{DType, OutputSignature, TensorSpec};
    use pullflow_core::types::Buffer;
    use pullflow_function::FunctionDef;
    use pullflow_operators::{graph_of, MapDataset, RangeDataset};

    fn library() -> FunctionLibrary {
        FunctionLibrary::new()
            .with(
                FunctionDef::new("swap")
                    .arg("x", DType::Int64)
                    .arg("k", DType::Int64)
                    .node("kk", "Identity", &["k"])
                    .output("kk")
                    .output("x"),
            )
            .unwrap()
            .with(
                FunctionDef::new("inc")
                    .arg("x", DType::Int64)
                    .arg("k", DType::Int64)
                    .node("y", "Add", &["x", "k"])
                    .output("y"),
            )
            .unwrap()
    }

    fn write_fixtures(dir: &Path) -> (PathBuf, PathBuf) {
        let lib = library();
        let ds = MapDataset::new(
            RangeDataset::new(0, 3, 1).unwrap(),
            "inc",
            &lib,
            vec![Buffer::scalar_i64(10)],
            OutputSignature::new(vec![TensorSpec::scalar(DType::Int64)]),
            false,
            &EngineConfig::default(),
        )
        .unwrap();
        let lib_path = dir.join("library.json");
        let graph_path = dir.join("graph.json");
        fs::write(&lib_path, lib.to_json().unwrap()).unwrap();
        fs::write(&graph_path, graph_of(ds.as_ref()).unwrap().to_json().unwrap()).unwrap();
        (lib_path, graph_path)
    }

    #[test]
    fn analyze_reports_selection_and_transfers() {
        let dir = tempfile::tempdir().unwrap();
        let (lib_path, _) = write_fixtures(dir.path());

        let out = analyze_function(&lib_path, "swap", 1).unwrap();
        assert!(out.contains("Short-circuit: yes, selects [1, 0]"));
        assert!(out.contains("output 0: CopyCaptured(0)"));
        assert!(out.contains("output 1: MoveArg(0)"));

        let out = analyze_function(&lib_path, "inc", 1).unwrap();
        assert!(out.contains("Short-circuit: no"));
        assert!(analyze_function(&lib_path, "missing", 0).is_err());
    }

    #[test]
    fn describe_lists_map_node() {
        let dir = tempfile::tempdir().unwrap();
        let (_, graph_path) = write_fixtures(dir.path());
        let out = describe_graph(&graph_path).unwrap();
        assert!(out.contains("Fingerprint: "));
        assert!(out.contains("MapDataset"));
        assert!(out.contains("RangeDataset"));
        assert!(out.contains("Functions: inc"));
    }

    #[test]
    fn run_flags_override_config() {
        let mut config = EngineConfig::default();
        let args = RunArgs {
            checkpoint_dir: Some("/tmp/cli-ckpt".into()),
            checkpoint_every: Some(5),
            resume: true,
            no_short_circuit: true,
            parallel: Some(2),
            ..Default::default()
        };
        apply_run_overrides(&mut config, &args);
        assert_eq!(config.checkpoint_dir, "/tmp/cli-ckpt");
        assert_eq!(config.checkpoint_every, Some(5));
        assert!(config.resume);
        assert!(!config.short_circuit);
        assert_eq!(config.max_parallel_pulls, 2);
        assert!(wants_checkpoints(&config, &args));
        assert!(!wants_checkpoints(&EngineConfig::default(), &RunArgs::default()));
    }

    #[test]
    fn executor_pool_follows_config() {
        let mut config = EngineConfig::default();
        apply_run_overrides(
            &mut config,
            &RunArgs {
                parallel: Some(3),
                ..Default::default()
            },
        );
        assert_eq!(build_executor(&config).unwrap().worker_threads(), 3);

        config.use_inter_op_parallelism = false;
        assert_eq!(build_executor(&config).unwrap().worker_threads(), 0);
    }

    #[test]
    fn run_pulls_graph_with_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let (lib_path, graph_path) = write_fixtures(dir.path());
        let args = RunArgs {
            graph: graph_path,
            library: lib_path,
            checkpoint_dir: Some(dir.path().join("ckpt").to_string_lossy().into_owned()),
            checkpoint_every: Some(1),
            ..Default::default()
        };
        run_graph(&args).unwrap();
        assert!(dir.path().join("ckpt").read_dir().unwrap().next().is_some());
    }
}
