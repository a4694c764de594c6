use dotenv::dotenv;
use email_dispatcher::{
    init_logging, Dispatcher, DispatcherConfig, EmailContent, MockBackend, MockBackendConfig,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time;
use tracing::{error, info, warn};

/// Accept one JSON email per stdin line and answer with the record
async fn read_submissions(dispatcher: Dispatcher) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let content: EmailContent = match serde_json::from_str(&line) {
            Ok(content) => content,
            Err(e) => {
                warn!("Ignoring malformed submission: {}", e);
                continue;
            }
        };

        match dispatcher.submit(content).await {
            Ok(record) => match serde_json::to_string(&record) {
                Ok(json) => println!("{json}"),
                Err(e) => error!("Failed to encode record: {}", e),
            },
            Err(e) => warn!("Submission rejected: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();
    info!("Email dispatcher starting up");

    let config = match DispatcherConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    let backends: Vec<Arc<dyn email_dispatcher::DeliveryBackend>> = vec![
        Arc::new(MockBackend::new(MockBackendConfig::provider_a())),
        Arc::new(MockBackend::new(MockBackendConfig::provider_b())),
    ];

    let status_interval = config.metrics_interval;
    let dispatcher = Dispatcher::new(backends, config)?;
    let tasks = dispatcher.start();
    tokio::spawn(read_submissions(dispatcher.clone()));

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    info!(
        status = ?dispatcher.service_status(),
        "Dispatcher running; press Ctrl-C to stop"
    );

    let mut ticker = time::interval(status_interval.max(Duration::from_secs(1)));
    while running.load(Ordering::SeqCst) {
        ticker.tick().await;
        let metrics = dispatcher.metrics().await;
        info!(
            sent = metrics.total_sent,
            failed = metrics.total_failed,
            queued = metrics.queue_length,
            success_rate = metrics.success_rate,
            "Dispatcher status"
        );
    }

    info!("Shutting down");
    dispatcher.shutdown();
    tasks.join().await;

    Ok(())
}
