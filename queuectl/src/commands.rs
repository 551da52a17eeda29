use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use queue_common::{ConfigKey, DataDir, JobManager, JobState};
use queue_worker::{active_count, run_worker_loop, start_workers, stop_workers};

#[derive(Parser)]
#[command(name = "queuectl", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new job to the queue.
    ///
    /// Example:
    /// queuectl enqueue '{"id":"job1", "command":"echo hello"}'
    Enqueue {
        /// JSON payload: {"id"?, "command", "max_retries"?, "run_at"?}
        payload: String,
        /// ISO 8601 time to run the job (e.g. 2025-11-05T17:00:00Z);
        /// overrides a run_at inside the payload
        #[arg(long = "run-at")]
        run_at: Option<String>,
    },

    /// Manage worker processes
    Worker {
        #[command(subcommand)]
        cmd: WorkerCommand,
    },

    /// Show active worker count and per-state job counts
    Status,

    /// List jobs by their state
    List {
        /// One of: pending, processing, completed, failed, dead
        #[arg(long, default_value = "pending")]
        state: String,
    },

    /// Manage the dead letter queue
    Dlq {
        #[command(subcommand)]
        cmd: DlqCommand,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },

    /// Show the captured stdout/stderr for a job
    Logs { id: String },
}

#[derive(Subcommand)]
enum WorkerCommand {
    /// Start one or more worker processes in the background
    Start {
        /// Number of worker processes to start
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Gracefully stop all registered workers
    Stop,

    /// Run a single worker loop in the foreground (spawned by `worker start`)
    #[command(hide = true)]
    Run,
}

#[derive(Subcommand)]
enum DlqCommand {
    /// View all jobs in the dead letter queue
    List,

    /// Re-enqueue a specific job from the dead letter queue
    Retry { id: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Set a configuration value (key: max_retries | backoff_base)
    Set { key: String, value: String },

    /// Show the current configuration
    Show,
}

impl Cli {
    pub async fn run() -> Result<()> {
        let cli = Cli::parse();
        let data_dir = DataDir::resolve()?;

        match cli.command {
            Commands::Enqueue { payload, run_at } => {
                let run_at = run_at.as_deref().map(parse_run_at).transpose()?;
                let manager = JobManager::open(&data_dir).await?;
                let id = manager.enqueue(&payload, run_at).await?;
                print_json(&serde_json::json!({ "id": id }))?;
            }
            Commands::Worker { cmd } => match cmd {
                WorkerCommand::Start { count } => {
                    let pids = start_workers(&data_dir, count)?;
                    print_json(&serde_json::json!({ "started": pids }))?;
                }
                WorkerCommand::Stop => {
                    let stopped = stop_workers(&data_dir)?;
                    print_json(&serde_json::json!({ "stopped": stopped }))?;
                }
                WorkerCommand::Run => run_worker_loop(data_dir).await?,
            },
            Commands::Status => {
                let manager = JobManager::open(&data_dir).await?;
                let jobs = manager.status().await?;
                let workers = active_count(&data_dir)?;
                print_json(&serde_json::json!({ "workers": workers, "jobs": jobs }))?;
            }
            Commands::List { state } => {
                let state = parse_state(&state)?;
                let manager = JobManager::open(&data_dir).await?;
                if state == JobState::Dead {
                    print_json(&manager.list_dead().await?)?;
                } else {
                    print_json(&manager.list_jobs(state).await?)?;
                }
            }
            Commands::Dlq { cmd } => match cmd {
                DlqCommand::List => {
                    let manager = JobManager::open(&data_dir).await?;
                    print_json(&manager.list_dead().await?)?;
                }
                DlqCommand::Retry { id } => {
                    let manager = JobManager::open(&data_dir).await?;
                    manager.retry_dlq(&id).await?;
                    print_json(&serde_json::json!({ "retried": id }))?;
                }
            },
            Commands::Config { cmd } => match cmd {
                ConfigCommand::Set { key, value } => {
                    let key: ConfigKey = key.parse()?;
                    let value: u32 = value.parse().map_err(|_| {
                        anyhow!("invalid input: config value must be a non-negative integer")
                    })?;
                    let config = data_dir.set_config(key, value)?;
                    print_json(&config)?;
                }
                ConfigCommand::Show => {
                    print_json(&data_dir.load_config()?)?;
                }
            },
            Commands::Logs { id } => {
                let manager = JobManager::open(&data_dir).await?;
                print_json(&manager.logs(&id).await?)?;
            }
        }

        Ok(())
    }
}

fn parse_run_at(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid input: --run-at must be ISO 8601: {err}"))
}

fn parse_state(raw: &str) -> Result<JobState> {
    raw.parse()
        .map_err(|_| anyhow!("invalid input: unknown state filter: {raw}"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_accepts_a_run_at_flag() {
        let cli = Cli::try_parse_from([
            "queuectl",
            "enqueue",
            r#"{"command":"echo hi"}"#,
            "--run-at",
            "2025-12-01T10:00:00Z",
        ])
        .expect("enqueue should parse");

        match cli.command {
            Commands::Enqueue { payload, run_at } => {
                assert_eq!(payload, r#"{"command":"echo hi"}"#);
                assert_eq!(run_at.as_deref(), Some("2025-12-01T10:00:00Z"));
            }
            _ => panic!("expected the enqueue command"),
        }
    }

    #[test]
    fn test_worker_start_defaults_to_one() {
        let cli = Cli::try_parse_from(["queuectl", "worker", "start"])
            .expect("worker start should parse");

        match cli.command {
            Commands::Worker {
                cmd: WorkerCommand::Start { count },
            } => assert_eq!(count, 1),
            _ => panic!("expected worker start"),
        }
    }

    #[test]
    fn test_hidden_worker_run_parses() {
        let cli =
            Cli::try_parse_from(["queuectl", "worker", "run"]).expect("worker run should parse");
        assert!(matches!(
            cli.command,
            Commands::Worker {
                cmd: WorkerCommand::Run
            }
        ));
    }

    #[test]
    fn test_list_defaults_to_pending() {
        let cli = Cli::try_parse_from(["queuectl", "list"]).expect("list should parse");

        match cli.command {
            Commands::List { state } => assert_eq!(state, "pending"),
            _ => panic!("expected the list command"),
        }
    }

    #[test]
    fn test_state_filter_parsing() {
        assert_eq!(parse_state("dead").ok(), Some(JobState::Dead));
        assert!(parse_state("limbo").is_err());
    }

    #[test]
    fn test_run_at_parsing() {
        assert!(parse_run_at("2025-12-01T10:00:00Z").is_ok());
        assert!(parse_run_at("next tuesday").is_err());
    }

    #[test]
    fn test_config_set_shape() {
        let cli = Cli::try_parse_from(["queuectl", "config", "set", "max_retries", "5"])
            .expect("config set should parse");

        match cli.command {
            Commands::Config {
                cmd: ConfigCommand::Set { key, value },
            } => {
                assert_eq!(key, "max_retries");
                assert_eq!(value, "5");
            }
            _ => panic!("expected config set"),
        }
    }

    #[test]
    fn test_dlq_retry_takes_an_id() {
        let cli = Cli::try_parse_from(["queuectl", "dlq", "retry", "job-1"])
            .expect("dlq retry should parse");

        assert!(matches!(
            cli.command,
            Commands::Dlq {
                cmd: DlqCommand::Retry { .. }
            }
        ));
    }
}
