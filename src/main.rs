//! # blogport CLI
//!
//! Moves blog content in and out of portable markdown archives.
//!
//! ## Usage
//!
//! ```bash
//! blogport --config ./config/blogport.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `blogport init` | Create the SQLite database and run schema migrations |
//! | `blogport export --output FILE` | Export posts to a native archive |
//! | `blogport import FILE..` | Import a zip archive, markdown files, or directories |
//! | `blogport status TASK_ID --kind K` | Print a task's progress record as JSON |
//! | `blogport resume` | Re-drive tasks interrupted by a restart |
//! | `blogport serve` | Start the HTTP server |
//! | `blogport completions SHELL` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Export published posts
//! blogport export --status published --output ./blog.zip
//!
//! # Import an export from another instance
//! blogport import ./blog.zip
//!
//! # Import a folder of Hugo posts
//! blogport import ./content/posts
//! ```
//!
//! Logs go to stderr (`RUST_LOG`, default `info`); task progress goes to
//! stderr as well, so stdout carries only command results.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use blogport::config;
use blogport::migrate;
use blogport::progress::ProgressMode;
use blogport::server;
use blogport::service::{ExportRequest, TaskService, UploadedFile};
use blogport_core::frontmatter::PostStatus;
use blogport_core::models::{TaskKind, TaskProgress, TaskStatus};

/// blogport: durable, resumable import/export of blog content.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/blogport.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "blogport",
    about = "Durable, resumable import/export of blog content as portable markdown archives",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/blogport.toml")]
    config: PathBuf,

    /// Progress output while waiting for a task: off, human or json.
    /// Defaults to human when stderr is a terminal.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Export,
    Import,
}

impl From<KindArg> for TaskKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Export => TaskKind::Export,
            KindArg::Import => TaskKind::Import,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Export posts to a native archive and write it to `--output`.
    Export {
        /// Only export these post ids (repeatable).
        #[arg(long = "post-id")]
        post_ids: Vec<String>,

        /// Only export posts with this status.
        #[arg(long)]
        status: Option<String>,

        /// Where to write the archive.
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Import posts from a zip archive, markdown files, or directories.
    ///
    /// A single `.zip` is imported as-is; anything else is bundled into an
    /// archive first, directories walked recursively.
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the progress record of a task as JSON.
    Status {
        task_id: String,
        #[arg(long, value_enum)]
        kind: KindArg,
    },

    /// Re-drive every task left unfinished by a previous run and wait until
    /// each reports a terminal status.
    Resume,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Commands that don't require config
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "blogport", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let progress_mode = match cli.progress {
        Some(ProgressArg::Off) => ProgressMode::Off,
        Some(ProgressArg::Human) => ProgressMode::Human,
        Some(ProgressArg::Json) => ProgressMode::Json,
        None => ProgressMode::default_for_tty(),
    };

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Export {
            post_ids,
            status,
            output,
        } => {
            let status = status
                .map(|s| s.parse::<PostStatus>())
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let request = ExportRequest {
                post_ids: (!post_ids.is_empty()).then_some(post_ids),
                status,
            };
            let service = TaskService::from_config(&cfg).await?;
            let task_id = service.start_export(request).await?;
            let done = wait(&service, &cfg, TaskKind::Export, &task_id, progress_mode).await?;

            let bytes = service
                .download_export(&task_id)
                .await?
                .context("export archive is no longer available")?;
            std::fs::write(&output, bytes)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("{}", output.display());
            finish(&done)?;
        }
        Commands::Import { files } => {
            let uploads = collect_uploads(&files)?;
            let service = TaskService::from_config(&cfg).await?;
            let started = service.start_import(uploads).await?;
            eprintln!("import {} started ({:?} archive)", started.task_id, started.mode);
            let done =
                wait(&service, &cfg, TaskKind::Import, &started.task_id, progress_mode).await?;
            service
                .wait_until_idle(&started.task_id, cfg.tasks.poll_interval())
                .await;
            if let Some(report) = &done.report {
                for post in &report.succeeded {
                    println!("{}", post.slug);
                }
            }
            finish(&done)?;
        }
        Commands::Status { task_id, kind } => {
            let service = TaskService::from_config(&cfg).await?;
            let progress = service
                .progress(kind.into(), &task_id)
                .await?
                .with_context(|| format!("no progress record for task {}", task_id))?;
            println!("{}", serde_json::to_string_pretty(&progress)?);
        }
        Commands::Resume => {
            let service = TaskService::from_config(&cfg).await?;
            let resumed = service.resume_unfinished().await?;
            if resumed.is_empty() {
                println!("No unfinished tasks.");
            }
            for record in &resumed {
                match wait(&service, &cfg, record.kind, &record.id, progress_mode).await {
                    Ok(done) => {
                        // Exports keep running through their retention delay.
                        if record.kind == TaskKind::Import {
                            service
                                .wait_until_idle(&record.id, cfg.tasks.poll_interval())
                                .await;
                        }
                        println!("{} {} {}", record.kind.as_str(), record.id, done.summary())
                    }
                    Err(e) => eprintln!("{} {}: {:#}", record.kind.as_str(), record.id, e),
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}

async fn wait(
    service: &TaskService,
    cfg: &config::Config,
    kind: TaskKind,
    task_id: &str,
    mode: ProgressMode,
) -> anyhow::Result<TaskProgress> {
    let reporter = mode.reporter();
    let mut last: Option<TaskProgress> = None;
    service
        .wait(kind, task_id, cfg.tasks.poll_interval(), |progress| {
            if last.as_ref() != Some(progress) {
                reporter.report(kind, task_id, progress);
                last = Some(progress.clone());
            }
        })
        .await
}

/// Print the partial-success summary; a failed task is a failed command.
fn finish(progress: &TaskProgress) -> anyhow::Result<()> {
    eprintln!("{}", progress.summary());
    for warning in &progress.warnings {
        eprintln!("warning: {}", warning);
    }
    for error in &progress.errors {
        eprintln!("error: {}: {}", error.post, error.reason);
    }
    if progress.status == TaskStatus::Failed {
        bail!(
            "task failed: {}",
            progress.warnings.last().map(String::as_str).unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Read command-line paths into uploads. Files keep their own name;
/// files found under a directory are named relative to it.
fn collect_uploads(paths: &[PathBuf]) -> anyhow::Result<Vec<UploadedFile>> {
    let mut uploads = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry.path().strip_prefix(path)?;
                uploads.push(read_upload(entry.path(), &archive_name(relative))?);
            }
        } else {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .with_context(|| format!("{} has no file name", path.display()))?;
            uploads.push(read_upload(path, &name)?);
        }
    }
    if uploads.is_empty() {
        bail!("no files found to import");
    }
    Ok(uploads)
}

fn read_upload(path: &Path, name: &str) -> anyhow::Result<UploadedFile> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(UploadedFile {
        name: name.to_string(),
        bytes,
    })
}

fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
