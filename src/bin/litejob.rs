//! litejob CLI: operator interface to a litejob database.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use litejob::config::Config;
use litejob::telemetry::{TelemetryConfig, init_telemetry};
use litejob::{Arguments, Client, Db, JobId, JobResult, Registry, Status, Worker, WorkerConfig};
use serde_json::json;

#[derive(Parser)]
#[command(name = "litejob", about = "Durable SQLite-backed job queue")]
struct Cli {
    /// Database file (overrides LITEJOB_DATABASE)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue a job
    Enqueue {
        /// Registered function name
        function: String,
        /// Queue name (defaults to LITEJOB_QUEUE or "default")
        #[arg(long)]
        queue: Option<String>,
        /// Positional arguments as a JSON array
        #[arg(long)]
        args: Option<String>,
        /// Keyword arguments as a JSON object
        #[arg(long)]
        kwargs: Option<String>,
    },
    /// Print a job's status and result
    Result {
        /// Job ID
        id: String,
    },
    /// Show a job record
    Show {
        /// Job ID (full UUID or prefix)
        id: String,
    },
    /// List jobs
    List {
        /// Filter by queue
        #[arg(long)]
        queue: Option<String>,
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Maximum jobs to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// List queues with job counts
    Queues,
    /// Run a worker with the built-in demo functions
    Worker {
        /// Queue to poll (defaults to LITEJOB_QUEUE or "default")
        #[arg(long)]
        queue: Option<String>,
        /// Worker config TOML with a [worker] table
        #[arg(long)]
        config: Option<PathBuf>,
        /// Idle wait between empty polls, in milliseconds
        #[arg(long)]
        poll_interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env_with_database(cli.database)?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "litejob".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Arc::new(Db::connect(&config.database_path).await?);
    db.migrate().await?;

    match cli.command {
        Command::Enqueue {
            function,
            queue,
            args,
            kwargs,
        } => {
            let queue = queue.unwrap_or_else(|| config.queue.clone());
            cmd_enqueue(db, &queue, &function, args, kwargs).await
        }
        Command::Result { id } => cmd_result(db, &config, &id).await,
        Command::Show { id } => cmd_show(&db, &id).await,
        Command::List {
            queue,
            status,
            limit,
        } => cmd_list(&db, queue, status, limit).await,
        Command::Queues => cmd_queues(&db).await,
        Command::Worker {
            queue,
            config: worker_config,
            poll_interval_ms,
        } => {
            let queue = queue.unwrap_or_else(|| config.queue.clone());
            let mut worker_config = match worker_config {
                Some(path) => WorkerConfig::from_file(&path)?,
                None => WorkerConfig::default().with_poll_interval(config.poll_interval),
            };
            if let Some(ms) = poll_interval_ms {
                worker_config = worker_config.with_poll_interval(Duration::from_millis(ms));
            }
            cmd_worker(db, queue, worker_config).await
        }
    }
}

async fn cmd_enqueue(
    db: Arc<Db>,
    queue: &str,
    function: &str,
    args: Option<String>,
    kwargs: Option<String>,
) -> anyhow::Result<()> {
    let args: serde_json::Value = match args {
        Some(raw) => serde_json::from_str(&raw)?,
        None => json!([]),
    };
    let kwargs: serde_json::Value = match kwargs {
        Some(raw) => serde_json::from_str(&raw)?,
        None => json!({}),
    };

    let client = Client::new(db, queue);
    let id = client
        .enqueue(function, Arguments::from_json(args, kwargs)?)
        .await?;
    println!("{id}");
    Ok(())
}

async fn cmd_result(db: Arc<Db>, config: &Config, id: &str) -> anyhow::Result<()> {
    let id: JobId = id.parse()?;
    let client = Client::new(db, config.queue.clone());

    match client.get_result(id).await? {
        JobResult::Pending => println!("pending"),
        JobResult::Running => println!("running"),
        JobResult::Completed(value) => {
            println!("completed");
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        JobResult::Failed(failure) => {
            println!("failed");
            println!("Kind:       {}", failure.kind);
            println!("Message:    {}", failure.message);
            if let Some(trace) = failure.trace {
                println!("Trace:\n{trace}");
            }
        }
    }
    Ok(())
}

async fn cmd_show(db: &Db, id_str: &str) -> anyhow::Result<()> {
    // Support prefix matching: find the job whose ID starts with the given string
    let id = if id_str.len() < 36 {
        let jobs = db.list_jobs(None, None, 1000).await?;
        let matches: Vec<_> = jobs
            .iter()
            .filter(|job| job.id.to_string().starts_with(id_str))
            .collect();
        match matches.len() {
            0 => anyhow::bail!("no job matching prefix '{id_str}'"),
            1 => matches[0].id,
            n => anyhow::bail!("{n} jobs match prefix '{id_str}', be more specific"),
        }
    } else {
        id_str.parse()?
    };

    let job = db.get_job(id).await?;
    let payload: serde_json::Value = serde_json::from_slice(&job.payload)
        .unwrap_or_else(|_| json!(format!("<{} undecodable bytes>", job.payload.len())));

    println!("ID:         {}", job.id);
    println!("Queue:      {}", job.queue_name);
    println!("Status:     {}", job.status);
    println!("Payload:    {}", serde_json::to_string_pretty(&payload)?);
    println!("Created:    {}", job.created_at);
    println!("Updated:    {}", job.updated_at);
    match litejob::client::decode_result(&job) {
        Ok(JobResult::Completed(value)) => {
            println!("Result:     {}", serde_json::to_string_pretty(&value)?);
        }
        Ok(JobResult::Failed(failure)) => println!("Failure:    {failure}"),
        Ok(_) => {}
        Err(e) => println!("Result:     <{e}>"),
    }
    Ok(())
}

async fn cmd_list(
    db: &Db,
    queue: Option<String>,
    status: Option<String>,
    limit: i64,
) -> anyhow::Result<()> {
    let status_filter: Option<Status> = match status {
        Some(s) => Some(s.parse().map_err(|_| anyhow::anyhow!("invalid status: {s}"))?),
        None => None,
    };

    let jobs = db.list_jobs(queue.as_deref(), status_filter, limit).await?;
    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<16}  {:<10}  {:<20}  CREATED",
        "ID", "QUEUE", "STATUS", "FUNCTION"
    );
    println!("{}", "-".repeat(110));

    for job in &jobs {
        let function = litejob::codec::decode::<litejob::codec::Payload>(&job.payload)
            .map(|p| p.function)
            .unwrap_or_else(|_| "?".to_string());
        println!(
            "{:<36}  {:<16}  {:<10}  {:<20}  {}",
            job.id,
            job.queue_name,
            job.status,
            function,
            job.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\n{} job(s)", jobs.len());
    Ok(())
}

async fn cmd_queues(db: &Db) -> anyhow::Result<()> {
    let queues = db.list_queues().await?;
    if queues.is_empty() {
        println!("No queues found.");
        return Ok(());
    }

    println!(
        "{:<20}  {:>8}  {:>8}  {:>10}  {:>8}",
        "QUEUE", "PENDING", "RUNNING", "COMPLETED", "FAILED"
    );
    for queue in &queues {
        let counts = db.count_by_status(&queue.name).await?;
        let count = |status: Status| counts.get(status.as_str()).copied().unwrap_or(0);
        println!(
            "{:<20}  {:>8}  {:>8}  {:>10}  {:>8}",
            queue.name,
            count(Status::Pending),
            count(Status::Running),
            count(Status::Completed),
            count(Status::Failed)
        );
    }
    Ok(())
}

async fn cmd_worker(db: Arc<Db>, queue: String, config: WorkerConfig) -> anyhow::Result<()> {
    let worker = Worker::new(db, queue, Arc::new(demo_registry()), config);

    let handle = worker.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        handle.shutdown();
    });

    worker.run().await?;
    Ok(())
}

/// Functions the bundled worker knows how to run.
fn demo_registry() -> Registry {
    Registry::new()
        .register("add", |args: Arguments| {
            arithmetic(&args, "add", i64::checked_add, |a, b| a + b)
        })
        .register("multiply", |args: Arguments| {
            arithmetic(&args, "multiply", i64::checked_mul, |a, b| a * b)
        })
        .register("process_data", |args: Arguments| {
            let data: Vec<i64> = args.get(0)?;
            let multiplier: i64 = args.kwarg_or("multiplier", 1)?;
            let scaled = data
                .iter()
                .map(|x| {
                    x.checked_mul(multiplier)
                        .ok_or_else(|| anyhow::anyhow!("{x} * {multiplier} overflows i64"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(json!(scaled))
        })
        .register("delayed_add", |args: Arguments| {
            let delay: f64 = args.kwarg_or("delay", 1.0)?;
            std::thread::sleep(Duration::from_secs_f64(delay.max(0.0)));
            arithmetic(&args, "add", i64::checked_add, |a, b| a + b)
        })
        .register("echo", |args: Arguments| {
            Ok(json!({"args": args.args, "kwargs": args.kwargs}))
        })
        .register("fail", |args: Arguments| {
            let message: String = args.kwarg_or("message", "requested failure".to_string())?;
            Err(anyhow::anyhow!(message))
        })
}

/// Apply a binary operation, staying in integers when both operands are.
/// Integer overflow is an error, not a wrapped result.
fn arithmetic(
    args: &Arguments,
    name: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> anyhow::Result<serde_json::Value> {
    match (args.get::<i64>(0), args.get::<i64>(1)) {
        (Ok(a), Ok(b)) => int_op(a, b)
            .map(|v| json!(v))
            .ok_or_else(|| anyhow::anyhow!("{name}({a}, {b}) overflows i64")),
        _ => Ok(json!(float_op(args.get(0)?, args.get(1)?))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(function: &str, args: Arguments) -> anyhow::Result<serde_json::Value> {
        let registry = demo_registry();
        let handler = registry.resolve(function)?;
        handler(args)
    }

    #[test]
    fn add_and_multiply_stay_integral() {
        assert_eq!(call("add", Arguments::new().arg(10).arg(20)).unwrap(), json!(30));
        assert_eq!(call("multiply", Arguments::new().arg(6).arg(7)).unwrap(), json!(42));
        assert_eq!(call("add", Arguments::new().arg(1.5).arg(2)).unwrap(), json!(3.5));
    }

    #[test]
    fn integer_overflow_is_an_error() {
        let err = call("add", Arguments::new().arg(i64::MAX).arg(1)).unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err}");

        let err = call("multiply", Arguments::new().arg(i64::MAX).arg(2)).unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err}");

        let err = call(
            "process_data",
            Arguments::new().arg(vec![1, i64::MAX]).kwarg("multiplier", 2),
        )
        .unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err}");
    }

    #[test]
    fn process_data_scales_each_item() {
        let out = call(
            "process_data",
            Arguments::new().arg(vec![1, 2, 3, 4]).kwarg("multiplier", 3),
        )
        .unwrap();
        assert_eq!(out, json!([3, 6, 9, 12]));
    }
}
