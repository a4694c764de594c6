// src/bin/dispatcher_bench.rs

use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::Barrier;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use email_dispatcher::{
    DeliveryBackend, Dispatcher, DispatcherConfig, EmailContent, MockBackend, MockBackendConfig,
};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "dispatcher_bench",
    about = "A benchmarking tool for the email dispatch engine"
)]
struct Opt {
    /// Number of concurrent submitters
    #[structopt(short = "u", long, default_value = "10")]
    num_submitters: usize,

    /// Emails submitted by each submitter
    #[structopt(short = "r", long, default_value = "100")]
    emails_per_submitter: usize,

    /// Fraction of submissions that repeat an earlier email (0.0 - 1.0)
    #[structopt(short, long, default_value = "0.1")]
    duplicate_ratio: f64,

    /// Failure rate applied to both providers
    #[structopt(short, long, default_value = "0.0")]
    failure_rate: f64,

    /// Maximum simulated latency per send, in milliseconds
    #[structopt(long, default_value = "0")]
    max_latency_ms: u64,

    /// Dispatch loop tick, in milliseconds
    #[structopt(short, long, default_value = "1")]
    tick_ms: u64,

    /// Number of iterations to run
    #[structopt(short, long, default_value = "3")]
    iterations: usize,

    /// Skip waiting for the queue to drain
    #[structopt(long)]
    submit_only: bool,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

struct IterationResult {
    submitted: usize,
    accepted: usize,
    submit_time: Duration,
    drain_time: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = if opt.disable_logs {
        "error"
    } else {
        match opt.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "dispatcher_bench={},email_dispatcher={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if !(0.0..=1.0).contains(&opt.duplicate_ratio) {
        return Err(format!("duplicate ratio out of range: {}", opt.duplicate_ratio).into());
    }

    println!(
        "\nRunning benchmark: {} submitters x {} emails",
        opt.num_submitters, opt.emails_per_submitter
    );
    println!("======================================================");

    let mut results = Vec::with_capacity(opt.iterations);
    for iteration in 0..opt.iterations {
        info!("Starting iteration {} of {}", iteration + 1, opt.iterations);
        let result = run_iteration(&opt).await?;

        println!(
            "Iteration {}: {} submitted, {} records, submit {:?} ({:.2} req/sec), drain {}",
            iteration + 1,
            result.submitted,
            result.accepted,
            result.submit_time,
            result.submitted as f64 / result.submit_time.as_secs_f64(),
            result
                .drain_time
                .map(|d| format!("{:?}", d))
                .unwrap_or_else(|| "skipped".to_string())
        );
        results.push(result);
    }

    let total_submitted: usize = results.iter().map(|r| r.submitted).sum();
    let total_submit_time: Duration = results.iter().map(|r| r.submit_time).sum();
    let drained: Vec<Duration> = results.iter().filter_map(|r| r.drain_time).collect();

    println!("\nBenchmark Results:");
    println!("  Total Submissions:  {}", total_submitted);
    println!(
        "  Avg. Submit Time:   {:?}",
        total_submit_time / opt.iterations.max(1) as u32
    );
    println!(
        "  Avg. Throughput:    {:.2} submissions/second",
        total_submitted as f64 / total_submit_time.as_secs_f64()
    );
    if !drained.is_empty() {
        let total: Duration = drained.iter().sum();
        println!("  Avg. Drain Time:    {:?}", total / drained.len() as u32);
    }

    Ok(())
}

async fn run_iteration(opt: &Opt) -> Result<IterationResult, Box<dyn std::error::Error>> {
    let mut config = DispatcherConfig::default();
    config.tick_interval = Duration::from_millis(opt.tick_ms);
    config.retry.base_delay = Duration::from_millis(1);
    config.validate()?;

    let backends: Vec<Arc<dyn DeliveryBackend>> = ["ProviderA", "ProviderB"]
        .iter()
        .map(|name| {
            let mut backend_config = MockBackendConfig::new(*name);
            backend_config.failure_rate = opt.failure_rate;
            backend_config.max_latency = Duration::from_millis(opt.max_latency_ms);
            Arc::new(MockBackend::new(backend_config)) as Arc<dyn DeliveryBackend>
        })
        .collect();

    let dispatcher = Dispatcher::new(backends, config)?;
    let tasks = dispatcher.start();

    let barrier = Arc::new(Barrier::new(opt.num_submitters));
    let mut handles = Vec::with_capacity(opt.num_submitters);
    let start_time = Instant::now();

    for submitter in 0..opt.num_submitters {
        let dispatcher = dispatcher.clone();
        let barrier = Arc::clone(&barrier);
        let count = opt.emails_per_submitter;
        let duplicate_ratio = opt.duplicate_ratio;

        handles.push(tokio::spawn(async move {
            barrier.wait().await;

            let mut submitted = 0;
            for i in 0..count {
                let n = if i > 0 && rand::random::<f64>() < duplicate_ratio {
                    rand::random_range(0..i)
                } else {
                    i
                };
                match dispatcher.submit(bench_email(submitter, n)).await {
                    Ok(_) => submitted += 1,
                    Err(e) => warn!("Submission rejected: {}", e),
                }
            }
            submitted
        }));
    }

    let submitted: usize = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter_map(|r| r.ok())
        .sum();
    let submit_time = start_time.elapsed();

    let drain_time = if opt.submit_only {
        None
    } else {
        while !dispatcher.is_drained().await {
            time::sleep(Duration::from_millis(5)).await;
        }
        Some(start_time.elapsed())
    };

    dispatcher.shutdown();
    tasks.join().await;

    Ok(IterationResult {
        submitted,
        accepted: dispatcher.list_all().await.len(),
        submit_time,
        drain_time,
    })
}

fn bench_email(submitter: usize, n: usize) -> EmailContent {
    EmailContent::new(
        format!("user{}-{}@example.com", submitter, n),
        "bench@example.com",
        format!("Benchmark message {}", n),
        "Benchmark body",
    )
}
