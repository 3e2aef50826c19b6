// crates/server-jobs/src/bin/jobs_demo.rs
//! Schedules a handful of simulated jobs and prints every relayed event as
//! a JSON line.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rsp_server_jobs::{JobEvent, JobManager, JobManagerConfig, Status};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "jobs-demo", about = "Run simulated jobs through the job manager")]
struct Args {
    /// Number of jobs to schedule.
    #[arg(long, default_value_t = 3)]
    jobs: u32,

    /// Work units per job.
    #[arg(long, default_value_t = 10)]
    steps: u64,

    /// Milliseconds per work unit.
    #[arg(long, default_value_t = 50)]
    step_ms: u64,

    /// Request cancellation of the first job right after scheduling.
    #[arg(long)]
    cancel_first: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,rsp_server_jobs=info".into()),
        )
        .init();

    let args = Args::parse();
    if args.steps == 0 {
        anyhow::bail!("--steps must be at least 1");
    }

    let config = JobManagerConfig::from_env().context("invalid job manager configuration")?;
    let manager = Arc::new(JobManager::with_config(config));
    let mut events = manager.subscribe();

    let step = Duration::from_millis(args.step_ms);
    let mut scheduled = Vec::new();
    for n in 0..args.jobs {
        let steps = args.steps;
        let job = manager.schedule_job(format!("demo-{n}"), move |monitor| {
            monitor.begin_task(format!("simulate {steps} steps"), steps);
            for i in 0..steps {
                if monitor.is_canceled() {
                    return Ok(Status::canceled(format!("stopped after {i} steps")));
                }
                monitor.sub_task(format!("step {}", i + 1));
                std::thread::sleep(step);
                monitor.worked(1);
            }
            monitor.done();
            Ok(Status::OK)
        });
        scheduled.push(job);
    }

    if args.cancel_first {
        if let Some(first) = scheduled.first() {
            manager.cancel(first);
        }
    }

    let mut remaining = scheduled.len();
    while remaining > 0 {
        match events.blocking_recv() {
            Ok(event) => {
                if matches!(event, JobEvent::Removed { .. }) {
                    remaining = remaining.saturating_sub(1);
                }
                println!("{}", serde_json::to_string(&event)?);
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Event relay lagged");
                remaining = manager.job_count();
            }
            Err(e) => return Err(e).context("event relay closed"),
        }
    }

    Ok(())
}
