//! bucketq demo driver
//!
//! Pushes a run of messages into a list queue and a sorted queue, then drains
//! both oldest first. Runs against a live store or, with `--memory`, against
//! the embedded store.

use bucketq::bucket::BucketKeyDeriver;
use bucketq::store::{start_expiry_sweeper, MemoryStore};
use bucketq::{QueueConfig, RedisQueue, StoreContext, TimeUnit, DEFAULT_EXPIRY_MULTIPLIER};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Demo configuration
struct Config {
    queue: QueueConfig,
    /// Use the embedded store instead of connecting
    memory: bool,
    prefix: String,
    count: usize,
    batch: usize,
    unit: TimeUnit,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            memory: false,
            prefix: "CallApi".to_string(),
            count: 1000,
            batch: 100,
            unit: TimeUnit::Hours,
        }
    }
}

/// Returns the value following flag `args[i]`, or exits.
fn value(args: &[String], i: usize) -> &str {
    match args.get(i + 1) {
        Some(v) => v.as_str(),
        None => {
            eprintln!("Error: {} requires a value", args[i]);
            std::process::exit(1);
        }
    }
}

fn parse<T: std::str::FromStr>(args: &[String], i: usize, what: &str) -> T {
    value(args, i).parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid {}", what);
        std::process::exit(1);
    })
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => config.queue.host = value(&args, i).to_string(),
                "--port" | "-p" => config.queue.port = parse(&args, i, "port number"),
                "--db" | "-n" => config.queue.database = parse(&args, i, "database index"),
                "--password" | "-a" => config.queue.password = Some(value(&args, i).to_string()),
                "--prefix" => config.prefix = value(&args, i).to_string(),
                "--count" | "-c" => config.count = parse(&args, i, "message count"),
                "--batch" | "-b" => config.batch = parse(&args, i, "batch size"),
                "--unit" | "-u" => {
                    config.unit = match value(&args, i).to_ascii_lowercase().as_str() {
                        "minutes" | "minute" | "m" => TimeUnit::Minutes,
                        "hours" | "hour" | "h" => TimeUnit::Hours,
                        "days" | "day" | "d" => TimeUnit::Days,
                        other => {
                            eprintln!("Error: unknown unit {:?}", other);
                            std::process::exit(1);
                        }
                    }
                }
                "--memory" => {
                    config.memory = true;
                    i += 1;
                    continue;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("bucketq-demo version {}", bucketq::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
            i += 2;
        }

        config
    }
}

fn print_help() {
    println!(
        r#"
bucketq-demo - Time-bucketed queues over a Redis-compatible store

USAGE:
    bucketq-demo [OPTIONS]

OPTIONS:
    -h, --host <HOST>          Store host (default: 127.0.0.1)
    -p, --port <PORT>          Store port (default: 6379)
    -n, --db <INDEX>           Database index (default: 0)
    -a, --password <PASSWORD>  Password for AUTH
        --prefix <PREFIX>      Queue key prefix (default: CallApi)
    -c, --count <N>            Messages to push per queue (default: 1000)
    -b, --batch <N>            Messages per pop (default: 100)
    -u, --unit <UNIT>          minutes | hours | days (default: hours)
        --memory               Use the embedded store instead of connecting
    -v, --version              Print version information
        --help                 Print this help message

EXAMPLES:
    bucketq-demo --memory                 # No server needed
    bucketq-demo --port 6380 --count 50   # Against a local server
    RUST_LOG=bucketq=debug bucketq-demo   # Show bucket creation and pops
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    // Set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // The sweeper stops when dropped, so keep it for the whole run
    let (queue, _sweeper) = if config.memory {
        let store = Arc::new(MemoryStore::new());
        let sweeper = start_expiry_sweeper(Arc::clone(&store));
        let context = StoreContext::with_store(store, config.queue.database).await?;
        let deriver = BucketKeyDeriver::new(config.queue.formats()?);
        (RedisQueue::new(context, deriver), Some(sweeper))
    } else {
        info!("Connecting to {}", config.queue.address());
        (RedisQueue::connect(&config.queue).await?, None)
    };

    let context = queue.context();
    info!(
        version = %context.version(),
        strategy = ?context.strategy(),
        nodes = context.nodes().len(),
        "Queue ready"
    );

    run_list_demo(&queue, &config).await?;
    run_sorted_demo(&queue, &config).await?;

    info!("Demo complete");
    Ok(())
}

async fn run_list_demo(queue: &RedisQueue, config: &Config) -> anyhow::Result<()> {
    let prefix = config.prefix.as_str();

    for i in 0..config.count {
        let message = format!("A{}", i);
        if !queue
            .send_queue(prefix, &message, DEFAULT_EXPIRY_MULTIPLIER, config.unit)
            .await?
        {
            warn!("{} was not queued", message);
        }
    }
    info!(count = config.count, prefix = %prefix, "List messages sent");

    let mut received = 0;
    loop {
        let batch = queue
            .get_queue_messages(prefix, config.batch, config.unit)
            .await?;
        if batch.is_empty() {
            break;
        }
        received += batch.len();
        println!("{}", batch.join(" "));
    }
    info!(received = received, "List queue drained");
    Ok(())
}

async fn run_sorted_demo(queue: &RedisQueue, config: &Config) -> anyhow::Result<()> {
    let prefix = config.prefix.as_str();

    let mut rejected = 0;
    for i in 0..config.count {
        let message = format!("A{}", i);
        queue
            .send_sorted_queue(prefix, &message, DEFAULT_EXPIRY_MULTIPLIER, config.unit)
            .await?;
        // Same content in the same bucket is refused
        if !queue
            .send_sorted_queue(prefix, &message, DEFAULT_EXPIRY_MULTIPLIER, config.unit)
            .await?
        {
            rejected += 1;
        }
    }
    info!(count = config.count, duplicates_rejected = rejected, "Sorted messages sent");

    let mut received = 0;
    loop {
        let batch = queue
            .get_sorted_queue_messages(prefix, config.batch, config.unit)
            .await?;
        if batch.is_empty() {
            break;
        }
        received += batch.len();
        println!("{}", batch.join(" "));
    }
    info!(received = received, "Sorted queue drained");
    Ok(())
}
