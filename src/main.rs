use clap::{Parser, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use seedpool::scheduler::Kwargs;
use seedpool::shutdown::install_shutdown_handler;
use seedpool::{builtin, EvalOutput, EvalRequest, Pool, PoolConfig, Registry};

#[derive(Parser, Debug)]
#[command(name = "seedpool")]
#[command(version)]
#[command(about = "Evaluate a function over a batch of inputs on a pool of worker processes")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Evaluate a registered function over a batch
    Run(RunArgs),

    /// List registered functions and hooks
    List {
        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Name of the registered function to call
    #[arg(long, short = 'f')]
    function: String,

    /// Generate N tasks with x = 0..N
    #[arg(long, conflicts_with = "tasks", required_unless_present = "tasks")]
    range: Option<usize>,

    /// JSON file holding an array of keyword-argument objects
    #[arg(long)]
    tasks: Option<PathBuf>,

    /// Extra keyword argument for every task (format: "key=json")
    /// Example: --set fail=3 --set label='"a"'
    #[arg(long = "set", value_parser = parse_kwarg)]
    set: Vec<(String, Value)>,

    /// Number of worker processes (0 runs every task in this process)
    #[arg(long, short = 'w', default_value = "30")]
    workers: usize,

    /// CPUs pinned to each worker
    #[arg(long, default_value = "2")]
    proc_per_worker: usize,

    /// First CPU of the affinity layout
    #[arg(long, default_value = "0")]
    proc_start: usize,

    /// Master seed (fresh entropy when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Worker init hook
    #[arg(long)]
    init: Option<String>,

    /// Init hook arguments as a JSON array
    #[arg(long, requires = "init")]
    init_args: Option<String>,

    /// Hook run before every task
    #[arg(long)]
    pre: Option<String>,

    /// Hook run after every task
    #[arg(long)]
    post: Option<String>,

    /// How long a starting worker may wait for a slot
    #[arg(long, default_value_t = seedpool::config::DEFAULT_SLOT_TIMEOUT_MS)]
    slot_timeout_ms: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct RunOutput {
    function: String,
    workers: usize,
    #[serde(flatten)]
    output: EvalOutput,
}

#[derive(Serialize)]
struct ListOutput<'a> {
    functions: Vec<&'a str>,
    init_hooks: Vec<&'a str>,
    pre_hooks: Vec<&'a str>,
    post_hooks: Vec<&'a str>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_kwarg(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=json, got '{}'", s))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn load_kwargs(args: &RunArgs) -> Result<Vec<Kwargs>, Box<dyn std::error::Error>> {
    let mut kwargs_list = match (&args.tasks, args.range) {
        (Some(path), _) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            let entries: Vec<Value> = serde_json::from_str(&raw)?;
            entries
                .into_iter()
                .enumerate()
                .map(|(i, entry)| {
                    Kwargs::from_value(entry)
                        .ok_or_else(|| format!("task {} in {} is not an object", i, path.display()))
                })
                .collect::<Result<Vec<_>, _>>()?
        }
        (None, Some(n)) => (0..n).map(|x| Kwargs::new().with("x", x)).collect(),
        (None, None) => return Err("one of --range or --tasks is required".into()),
    };

    for kwargs in &mut kwargs_list {
        for (key, value) in &args.set {
            kwargs.insert(key.clone(), value.clone());
        }
    }
    Ok(kwargs_list)
}

fn display_value(value: &Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => "-".to_string(),
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_run(registry: Registry, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let kwargs_list = load_kwargs(&args)?;

    let mut config = PoolConfig::new(args.workers)
        .with_proc_per_worker(args.proc_per_worker)
        .with_proc_start(args.proc_start)
        .with_slot_timeout_ms(args.slot_timeout_ms);
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    let mut request = EvalRequest::new(args.function.clone(), kwargs_list);
    if let Some(init) = &args.init {
        let init_args: Vec<Value> = match &args.init_args {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| format!("--init-args must be a JSON array: {}", e))?,
            None => Vec::new(),
        };
        request = request.with_init(init.clone(), init_args);
    }
    if let Some(pre) = &args.pre {
        request = request.with_pre(pre.clone());
    }
    if let Some(post) = &args.post {
        request = request.with_post(post.clone());
    }

    let pool = Pool::new(registry, config);
    let shutdown = install_shutdown_handler();
    let output = tokio::select! {
        result = pool.run(request) => result?,
        _ = shutdown.cancelled() => {
            return Err("interrupted before the batch finished".into());
        }
    };

    match args.output {
        OutputFormat::Json => {
            let run = RunOutput {
                function: args.function,
                workers: args.workers,
                output,
            };
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        OutputFormat::Table => {
            if output.is_empty() {
                println!("No tasks.");
                return Ok(());
            }
            println!("{:<8} {:<10} RESULT", "INDEX", "STATUS");
            println!("{}", "-".repeat(60));
            let failed = output.failed_indices().len();
            let total = output.len();
            for (index, completed) in output.completed.iter().enumerate() {
                let (status, shown) = if *completed {
                    ("completed", display_value(&output.results[index]))
                } else {
                    ("failed", output.errors[index].clone().unwrap_or_default())
                };
                println!("{:<8} {:<10} {}", index, status, shown);
            }
            println!();
            println!("{} of {} tasks completed", total - failed, total);
        }
    }
    Ok(())
}

fn handle_list(
    registry: &Registry,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let listing = ListOutput {
        functions: registry.function_names(),
        init_hooks: registry.init_hook_names(),
        pre_hooks: registry.pre_hook_names(),
        post_hooks: registry.post_hook_names(),
    };

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        OutputFormat::Table => {
            for (title, names) in [
                ("Functions", &listing.functions),
                ("Init hooks", &listing.init_hooks),
                ("Pre hooks", &listing.pre_hooks),
                ("Post hooks", &listing.post_hooks),
            ] {
                println!("{}:", title);
                for name in names {
                    println!("  {}", name);
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Stdout carries worker frames and command output, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let registry = builtin::registry();
    if let Some(served) = seedpool::serve_if_worker(&registry) {
        return served.map_err(Into::into);
    }

    let args = Args::parse();
    let result = match args.command {
        Commands::Run(run_args) => handle_run(registry, run_args).await,
        Commands::List { output } => handle_list(&registry, &output),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
