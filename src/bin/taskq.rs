//! taskq CLI: run sample tasks through an engine and inspect config.

use anyhow::Context as _;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use taskq::config::{Config, QueueConfig};
use taskq::event::EventKind;
use taskq::telemetry::{TelemetryConfig, init_telemetry};
use taskq::{Engine, HandlerRegistry, TaskHandler, TaskProvider, TaskRequest};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "taskq", about = "Bounded in-process background task queue")]
struct Cli {
    /// TOML file with a [queue] table (overrides TASKQ_* variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send sample email/notification/audit tasks and report the outcome
    Demo {
        /// Number of tasks to send
        #[arg(long, default_value_t = 20)]
        tasks: usize,
        /// Make every Nth handler invocation fail (0 = never)
        #[arg(long, default_value_t = 0)]
        fail_every: usize,
        /// Enable retry globally and on every task
        #[arg(long)]
        retry: bool,
        /// Print every dispatch event as a JSON line
        #[arg(long)]
        events: bool,
    },
    /// Print the effective queue configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Demo {
            tasks,
            fail_every,
            retry,
            events,
        } => cmd_demo(config, tasks, fail_every, retry, events).await,
        Command::Config => {
            cmd_config(&config.queue);
            Ok(())
        }
    }
}

fn load_config(file: Option<&std::path::Path>) -> anyhow::Result<Config> {
    let mut config = Config::from_env()?;
    if let Some(path) = file {
        config.queue = QueueConfig::load(path)?;
    }
    Ok(config)
}

fn cmd_config(queue: &QueueConfig) {
    println!("Capacity:       {}", queue.capacity);
    println!("Retry:          {}", if queue.retry_enabled { "enabled" } else { "disabled" });
    println!("Max Retries:    {}", queue.max_retries);
    println!(
        "Max Concurrent: {}",
        queue
            .max_concurrent
            .map(|n| n.to_string())
            .unwrap_or("unbounded".to_string())
    );
    println!(
        "Drain Timeout:  {}",
        queue
            .drain_timeout
            .map(|d| format!("{}ms", d.as_millis()))
            .unwrap_or("-".to_string())
    );
}

async fn cmd_demo(
    config: Config,
    tasks: usize,
    fail_every: usize,
    retry: bool,
    print_events: bool,
) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "taskq".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let mut queue_config = config.queue;
    if retry {
        queue_config.retry_enabled = true;
    }

    let engine = Engine::new(&queue_config, sample_registry(fail_every)?)?;
    let mut events = engine.dispatcher().subscribe();
    let dispatcher = engine.start();

    let stop = CancellationToken::new();
    let ctrl = stop.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.cancel();
    });

    let mut producer = tokio::spawn(send_samples(engine.provider().clone(), tasks, retry));
    let mut expected: Option<usize> = None;
    let mut summary = Summary::default();

    loop {
        if let Some(sent) = expected {
            // Once events were missed the count cannot be trusted; wait for
            // the engine to go idle instead.
            let settled = if summary.missed > 0 {
                engine.dispatcher().is_idle()
            } else {
                summary.settled >= sent
            };
            if settled {
                break;
            }
        }
        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                println!("interrupted");
                producer.abort();
                break;
            }
            sent = &mut producer, if expected.is_none() => {
                expected = Some(sent.context("producer task failed")?);
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if print_events {
                        println!("{}", serde_json::to_string(&event)?);
                    }
                    summary.observe(&event.kind);
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "event subscriber lagged");
                    summary.missed += n;
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::time::sleep(Duration::from_millis(50)), if summary.missed > 0 => {}
        }
    }

    engine.shutdown();
    dispatcher.await.context("dispatcher task failed")??;
    summary.print(expected.unwrap_or(0));
    Ok(())
}

/// Send `count` sample tasks concurrently. Returns how many were accepted.
async fn send_samples(provider: TaskProvider, count: usize, retry: bool) -> usize {
    let mut sends = JoinSet::new();
    for i in 0..count {
        let provider = provider.clone();
        sends.spawn(async move {
            match i % 3 {
                0 => {
                    provider
                        .send_with_retry(
                            SendEmail {
                                to: format!("user{i}@example.com"),
                                subject: "Welcome".to_string(),
                            },
                            retry,
                        )
                        .await
                }
                1 => {
                    provider
                        .send_with_retry(
                            Notify {
                                user_id: i as u64,
                                message: "Your report is ready".to_string(),
                            },
                            retry,
                        )
                        .await
                }
                _ => {
                    provider
                        .send_with_retry(
                            AuditRecord {
                                action: format!("login:{i}"),
                            },
                            retry,
                        )
                        .await
                }
            }
        });
    }

    let mut accepted = 0;
    while let Some(joined) = sends.join_next().await {
        match joined {
            Ok(Ok(_)) => accepted += 1,
            Ok(Err(e)) => tracing::error!(error = %e, "send failed"),
            Err(e) => tracing::error!(error = %e, "send task panicked"),
        }
    }
    accepted
}

#[derive(Default)]
struct Summary {
    settled: usize,
    completed: usize,
    failed_attempts: usize,
    requeued: usize,
    discarded: BTreeMap<String, usize>,
    missed: u64,
}

impl Summary {
    fn observe(&mut self, kind: &EventKind) {
        match kind {
            EventKind::TaskCompleted { .. } => self.completed += 1,
            EventKind::TaskFailed { .. } => self.failed_attempts += 1,
            EventKind::TaskRequeued { .. } => self.requeued += 1,
            EventKind::TaskDiscarded { reason, .. } => {
                *self.discarded.entry(reason.to_string()).or_default() += 1;
            }
            EventKind::TaskDispatched { .. } | EventKind::DispatcherStopped { .. } => {}
        }
        if kind.is_terminal() {
            self.settled += 1;
        }
    }

    fn print(&self, sent: usize) {
        println!("Sent:            {sent}");
        println!("Completed:       {}", self.completed);
        println!("Failed attempts: {}", self.failed_attempts);
        println!("Re-enqueued:     {}", self.requeued);
        if self.discarded.is_empty() {
            println!("Discarded:       0");
        }
        for (reason, n) in &self.discarded {
            println!("Discarded:       {n} ({reason})");
        }
        if self.missed > 0 {
            println!("Missed events:   {} (counts above are partial)", self.missed);
        }
    }
}

// ---------------------------------------------------------------------------
// Sample requests and handlers
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SendEmail {
    to: String,
    subject: String,
}
impl TaskRequest for SendEmail {}

#[derive(Debug)]
struct Notify {
    user_id: u64,
    message: String,
}
impl TaskRequest for Notify {}

#[derive(Debug)]
struct AuditRecord {
    action: String,
}
impl TaskRequest for AuditRecord {}

/// Shared invocation counter that fails every Nth call.
#[derive(Clone)]
struct Flaky {
    calls: Arc<AtomicUsize>,
    fail_every: usize,
}

impl Flaky {
    fn check(&self, what: &str) -> anyhow::Result<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every > 0 && n % self.fail_every == 0 {
            anyhow::bail!("simulated failure on call {n} ({what})");
        }
        Ok(())
    }
}

struct EmailHandler(Flaky);

#[async_trait]
impl TaskHandler<SendEmail> for EmailHandler {
    async fn handle(&self, request: Arc<SendEmail>, cancel: CancellationToken) -> anyhow::Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("cancelled"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        self.0.check("email")?;
        tracing::info!(to = %request.to, subject = %request.subject, "email sent");
        Ok(())
    }
}

struct NotifyHandler(Flaky);

#[async_trait]
impl TaskHandler<Notify> for NotifyHandler {
    async fn handle(&self, request: Arc<Notify>, _cancel: CancellationToken) -> anyhow::Result<()> {
        self.0.check("notify")?;
        tracing::info!(user_id = request.user_id, message = %request.message, "notification pushed");
        Ok(())
    }
}

struct AuditHandler(Flaky);

#[async_trait]
impl TaskHandler<AuditRecord> for AuditHandler {
    async fn handle(&self, request: Arc<AuditRecord>, _cancel: CancellationToken) -> anyhow::Result<()> {
        self.0.check("audit")?;
        tracing::info!(action = %request.action, "audit record written");
        Ok(())
    }
}

fn sample_registry(fail_every: usize) -> taskq::Result<HandlerRegistry> {
    let flaky = Flaky {
        calls: Arc::new(AtomicUsize::new(0)),
        fail_every,
    };
    let mut registry = HandlerRegistry::empty();
    let (email, notify, audit) = (flaky.clone(), flaky.clone(), flaky);
    registry
        .register::<SendEmail, _, _>(move || EmailHandler(email.clone()))?
        .register::<Notify, _, _>(move || NotifyHandler(notify.clone()))?
        .register::<AuditRecord, _, _>(move || AuditHandler(audit.clone()))?;
    Ok(registry)
}
