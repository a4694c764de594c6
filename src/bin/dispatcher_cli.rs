// src/bin/dispatcher_cli.rs

use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use email_dispatcher::{
    DeliveryBackend, DeliveryStatus, Dispatcher, DispatcherConfig, EmailContent, MockBackend,
    MockBackendConfig,
};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "dispatcher_cli",
    about = "Run a simulated batch of emails through the dispatch engine"
)]
struct Opt {
    /// Number of distinct emails to submit
    #[structopt(short = "n", long, default_value = "10")]
    num_emails: usize,

    /// How many of those emails to submit a second time
    #[structopt(short, long, default_value = "2")]
    duplicates: usize,

    /// Failure rate of provider A (0.0 - 1.0)
    #[structopt(long, default_value = "0.3")]
    failure_rate_a: f64,

    /// Failure rate of provider B (0.0 - 1.0)
    #[structopt(long, default_value = "0.2")]
    failure_rate_b: f64,

    /// Start with provider A down
    #[structopt(long)]
    down_a: bool,

    /// Start with provider B down
    #[structopt(long)]
    down_b: bool,

    /// Maximum simulated latency per send, in milliseconds
    #[structopt(long, default_value = "200")]
    max_latency_ms: u64,

    /// Dispatch loop tick, in milliseconds
    #[structopt(short, long, default_value = "100")]
    tick_ms: u64,

    /// Backoff base unit, in milliseconds
    #[structopt(short, long, default_value = "50")]
    backoff_ms: u64,

    /// Consecutive failures before a provider's circuit opens
    #[structopt(short = "f", long, default_value = "5")]
    failure_threshold: usize,

    /// Print the final state as JSON instead of tables
    #[structopt(long)]
    json: bool,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
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
            2 => "debug",
            _ => "trace",
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "dispatcher_cli={},email_dispatcher={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = DispatcherConfig::default();
    config.tick_interval = Duration::from_millis(opt.tick_ms);
    config.metrics_interval = Duration::from_millis(opt.tick_ms);
    config.retry.base_delay = Duration::from_millis(opt.backoff_ms);
    config.circuit_breaker.failure_threshold = opt.failure_threshold;
    config.validate()?;

    let mut provider_a = MockBackendConfig::provider_a();
    provider_a.failure_rate = opt.failure_rate_a;
    provider_a.max_latency = Duration::from_millis(opt.max_latency_ms);
    provider_a.down = opt.down_a;

    let mut provider_b = MockBackendConfig::provider_b();
    provider_b.failure_rate = opt.failure_rate_b;
    provider_b.max_latency = Duration::from_millis(opt.max_latency_ms);
    provider_b.down = opt.down_b;

    let backends: Vec<Arc<dyn DeliveryBackend>> = vec![
        Arc::new(MockBackend::new(provider_a)),
        Arc::new(MockBackend::new(provider_b)),
    ];

    let dispatcher = Dispatcher::new(backends, config)?;
    let tasks = dispatcher.start();
    info!("Submitting {} emails", opt.num_emails);

    let start_time = Instant::now();
    let mut accepted = 0;
    for i in 0..opt.num_emails {
        dispatcher.submit(simulated_email(i)).await?;
        accepted += 1;
    }
    for i in 0..opt.duplicates.min(opt.num_emails) {
        let record = dispatcher.submit(simulated_email(i)).await?;
        info!("Duplicate of email {} resolved to {}", i, record.id);
    }

    let progress = if opt.json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(accepted as u64)
    };
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?,
    );

    loop {
        let records = dispatcher.list_all().await;
        let done = records.iter().filter(|r| r.status.is_terminal()).count();
        progress.set_position(done as u64);
        progress.set_message(format!("{:?}", dispatcher.service_status()));

        if done == records.len() {
            break;
        }
        time::sleep(Duration::from_millis(100)).await;
    }
    progress.finish_with_message("done");

    dispatcher.shutdown();
    tasks.join().await;

    let records = dispatcher.list_all().await;
    let backends = dispatcher.backend_status().await;
    let metrics = dispatcher.refresh_metrics().await;

    if opt.json {
        let report = serde_json::json!({
            "serviceStatus": dispatcher.service_status(),
            "records": records,
            "providers": backends,
            "metrics": metrics,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.add_row(row!["ID", "Status", "Provider", "Attempts", "Last error"]);
    for record in &records {
        table.add_row(row![
            record.id,
            record.status,
            record.provider,
            record.attempts,
            record.error.as_deref().unwrap_or("-")
        ]);
    }
    table.printstd();

    let mut providers = Table::new();
    providers.add_row(row!["Provider", "Healthy", "Circuit", "Failures"]);
    for backend in &backends {
        providers.add_row(row![
            backend.name,
            backend.healthy,
            format!("{:?}", backend.circuit_state),
            backend.consecutive_failures
        ]);
    }
    providers.printstd();

    let failed = records
        .iter()
        .filter(|r| r.status == DeliveryStatus::Failed)
        .count();
    if failed > 0 {
        warn!("{} emails could not be delivered", failed);
    }

    let mut summary = Table::new();
    summary.add_row(row!["Metric", "Value"]);
    summary.add_row(row!["Accepted", accepted]);
    summary.add_row(row!["Sent", metrics.total_sent]);
    summary.add_row(row!["Failed", metrics.total_failed]);
    summary.add_row(row!["Success rate", format!("{:.1}%", metrics.success_rate)]);
    summary.add_row(row![
        "Avg. response time",
        format!("{:.0}ms", metrics.average_response_time)
    ]);
    summary.add_row(row!["Time elapsed", format!("{:?}", start_time.elapsed())]);
    summary.printstd();

    Ok(())
}

fn simulated_email(i: usize) -> EmailContent {
    EmailContent::new(
        format!("recipient{}@example.com", i),
        "simulator@example.com",
        format!("Simulated message #{}", i),
        format!("This is simulated message number {}.", i),
    )
}
