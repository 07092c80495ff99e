use clap::{Parser, Subcommand};
use henkan::config::{self, ServiceConfig};
use henkan::service::{ImageService, LocalStack};
use henkan::types::ImageRecord;
use henkan::worker::{Worker, WorkerReport};
use henkan::{CancellationToken, Pipeline, TransformationChain, logging, output};
use std::error::Error;
use std::io::Read;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Shared flag for commands that take a chain.
#[derive(clap::Args, Clone)]
struct ChainArgs {
    /// Transformation chain as a JSON array file ("-" reads stdin)
    #[arg(long)]
    chain: PathBuf,
}

fn version_string() -> &'static str {
    let hash = env!("HENKAN_GIT_HASH");
    if hash.is_empty() {
        env!("CARGO_PKG_VERSION")
    } else {
        let dirty = if env!("HENKAN_GIT_DIRTY") == "true" {
            "-dirty"
        } else {
            ""
        };
        // Leaked once at startup, called exactly once
        Box::leak(format!("{} ({hash}{dirty})", env!("CARGO_PKG_VERSION")).into_boxed_str())
    }
}

#[derive(Parser)]
#[command(name = "henkan")]
#[command(about = "Declarative image transformation pipeline")]
#[command(long_about = "\
Declarative image transformation pipeline

A chain is a JSON array of steps applied in order:

  [
    {\"name\": \"resize\",    \"config\": {\"width\": 800, \"height\": 600}},
    {\"name\": \"trim\",      \"config\": {\"threshold\": 10}},
    {\"name\": \"blur\",      \"config\": {\"sigma\": 1.5}},
    {\"name\": \"rotate\",    \"config\": {\"angle\": 90}},
    {\"name\": \"grayscale\"}
  ]

Names are case-insensitive. Output keeps the source format.

'validate' and 'apply' work on local files only. 'submit' and 'reprocess'
record the image under data_dir, queue it, and process the queue before
returning. Run 'henkan gen-config' for a documented henkan.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a chain without touching any image
    Validate {
        /// Chain JSON file ("-" reads stdin)
        chain: PathBuf,
    },
    /// Run a chain on a local file and write the result
    Apply {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        chain: ChainArgs,
    },
    /// Record a source image, queue it and process the queue
    Submit {
        /// Local path, or a file:// or http(s):// URL
        source: String,
        #[command(flatten)]
        chain: ChainArgs,
    },
    /// Replace an image's chain and process it again
    Reprocess {
        id: Uuid,
        #[command(flatten)]
        chain: ChainArgs,
    },
    /// Show one image record
    Show { id: Uuid },
    /// List image records, newest first
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Delete an image record and its stored objects
    Delete { id: Uuid },
    /// Print a stock henkan.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            Ok(())
        }
        command => {
            let config = config::load_config(&cli.config)?;
            logging::init(&config.logging)?;
            run(command, &config)
        }
    }
}

fn run(command: Command, config: &ServiceConfig) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Validate { chain } => {
            let chain = read_chain(&chain)?;
            Pipeline::default().validate_chain(&chain)?;
            output::print_chain_ok(&chain);
        }
        Command::Apply {
            input,
            output: target,
            chain,
        } => {
            let chain = read_chain(&chain.chain)?;
            let bytes = std::fs::read(&input)?;
            let input_size = bytes.len();
            let cancel = CancellationToken::from_timeout(config.processing.timeout());
            let result = Pipeline::default().execute_bytes(bytes, &chain, &cancel)?;
            std::fs::write(&target, &result)?;
            output::print_apply_output(
                &chain,
                input_size,
                result.len(),
                &target.display().to_string(),
            );
        }
        Command::Submit { source, chain } => {
            let chain = read_chain(&chain.chain)?;
            let stack = ImageService::local(config)?;
            let updates = stack.notifier.subscribe();
            let record = stack.service.create_image(&source, chain)?;
            println!("==> Submitted {}", record.id);
            drain_queue(&stack, config)?;
            print_updates(updates.try_iter());
            output::print_record(&stack.service.get_image(record.id)?);
        }
        Command::Reprocess { id, chain } => {
            let chain = read_chain(&chain.chain)?;
            let stack = ImageService::local(config)?;
            let updates = stack.notifier.subscribe_to(id);
            stack.service.update_image(id, chain)?;
            println!("==> Requeued {id}");
            drain_queue(&stack, config)?;
            print_updates(updates.try_iter());
            output::print_record(&stack.service.get_image(id)?);
        }
        Command::Show { id } => {
            let stack = ImageService::local(config)?;
            output::print_record(&stack.service.get_image(id)?);
        }
        Command::List { page, limit } => {
            let stack = ImageService::local(config)?;
            output::print_page(&stack.service.list_images(page, limit)?);
        }
        Command::Delete { id } => {
            let stack = ImageService::local(config)?;
            stack.service.delete_image(id)?;
            println!("Deleted {id}");
        }
        Command::GenConfig => print!("{}", config::stock_config_toml()),
    }
    Ok(())
}

/// Process everything on the queue, printing worker progress as it happens.
fn drain_queue(stack: &LocalStack, config: &ServiceConfig) -> Result<WorkerReport, Box<dyn Error>> {
    println!("==> Processing queue");
    init_thread_pool(&config.processing);
    let worker = Worker::new(stack.service.clone(), stack.queue.clone(), &config.processing);

    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_worker_event(&event) {
                println!("{}", line);
            }
        }
    });
    let report = worker.run_until_idle(Some(tx));
    printer.join().map_err(|_| "output thread panicked")?;
    let report = report?;
    println!("{}", output::format_worker_report(&report));
    Ok(report)
}

fn print_updates(updates: impl Iterator<Item = ImageRecord>) {
    println!("==> Status updates");
    for record in updates {
        println!("{}", output::format_status_update(&record));
    }
}

/// Read a chain from a JSON file, or stdin for `-`.
fn read_chain(path: &Path) -> Result<TransformationChain, Box<dyn Error>> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read chain {}: {e}", path.display()))?
    };
    TransformationChain::from_json(&content)
        .map_err(|e| format!("invalid chain JSON in {}: {e}", path.display()).into())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; config can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
