use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use filedrop_cli::upload::{
    DEFAULT_MAX_CONCURRENT_CHUNKS, DEFAULT_MAX_CONCURRENT_FILES, UploadOptions, UploadOutcome,
    UploadTask, upload_files,
};
use filedrop_cli::{
    Client, Config, ProgressSnapshot, QuotaInfo, RetryPolicy, UploadStatus, file_config::FileConfig,
    progress,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, error, info};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "filedrop")]
#[command(about = "Upload files to a Filedrop storage server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload one or more files
    Upload {
        /// Files to upload (can specify multiple files)
        files: Vec<PathBuf>,

        /// API token for authentication
        #[arg(short, long, env = "FILEDROP_API_TOKEN")]
        token: Option<String>,

        /// API base URL
        #[arg(long, env = "FILEDROP_API_URL")]
        api_url: Option<String>,

        /// Path to a JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Destination folder id
        #[arg(short, long)]
        folder: Option<String>,

        /// Max files uploading at once (1-16)
        #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_FILES, value_parser = clap::value_parser!(usize))]
        parallel_files: usize,

        /// Max chunks in flight per file (1-16)
        #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_CHUNKS, value_parser = clap::value_parser!(usize))]
        parallel_chunks: usize,

        /// Chunk size in MiB
        #[arg(long, default_value = "10")]
        chunk_size_mib: u64,

        /// Total quota in bytes, for advisory pre-flight validation
        #[arg(long, requires = "used_bytes", requires = "max_file_size")]
        quota_bytes: Option<u64>,

        /// Quota already used in bytes
        #[arg(long)]
        used_bytes: Option<u64>,

        /// Per-file size limit in bytes
        #[arg(long)]
        max_file_size: Option<u64>,

        /// Disable progress bars (useful in CI logs)
        #[arg(long)]
        no_progress: bool,
    },
}

fn bar_style() -> ProgressStyle {
    #[allow(clippy::expect_used)]
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
        .expect("Failed to set progress bar template")
        .progress_chars("#>-");
    style
}

/// Renders the snapshot stream as one bar per task plus an overall line.
async fn render_progress(
    mut rx: progress::ProgressReceiver,
    names: HashMap<Uuid, String>,
    grand_total: u64,
) {
    let multi = MultiProgress::new();
    let overall = multi.add(ProgressBar::new(grand_total));
    overall.set_style(bar_style());
    overall.set_message(format!("{} file(s) total", names.len()));

    let mut bars: HashMap<Uuid, ProgressBar> = HashMap::new();
    let mut latest: HashMap<Uuid, ProgressSnapshot> = HashMap::new();

    while let Some(snap) = rx.recv().await {
        let bar = bars.entry(snap.task_id).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(snap.total_bytes));
            bar.set_style(bar_style());
            if let Some(name) = names.get(&snap.task_id) {
                bar.set_message(name.clone());
            }
            bar
        });
        bar.set_position(snap.uploaded_bytes);
        match snap.status {
            UploadStatus::Completed => bar.finish(),
            UploadStatus::Error => bar.abandon_with_message("failed"),
            UploadStatus::Cancelled => bar.abandon_with_message("cancelled"),
            _ => {}
        }

        latest.insert(snap.task_id, snap);
        let (uploaded, _) = ProgressSnapshot::aggregate(latest.values());
        overall.set_position(uploaded);
    }
    overall.finish();
}

fn report(outcomes: &[UploadOutcome]) -> usize {
    let succeeded: Vec<_> = outcomes.iter().filter(|o| o.is_success()).collect();
    let failed: Vec<_> = outcomes
        .iter()
        .filter(|o| o.task.status == UploadStatus::Error)
        .collect();
    let cancelled = outcomes
        .iter()
        .filter(|o| o.task.status == UploadStatus::Cancelled)
        .count();

    if !succeeded.is_empty() {
        println!("\n✅ Uploaded {} file(s):", succeeded.len());
        for outcome in &succeeded {
            for file in &outcome.files {
                println!("  {} → {}", outcome.task.filename, file.id);
            }
        }
    }
    if cancelled > 0 {
        println!("\n⚠ {cancelled} file(s) cancelled");
    }
    if !failed.is_empty() {
        eprintln!("\n❌ Failed to upload {} file(s):", failed.len());
        for outcome in &failed {
            let (code, message) = outcome
                .task
                .last_error
                .clone()
                .unwrap_or((filedrop_cli::ErrorCode::Unknown, "unknown error".into()));
            eprintln!("  {}: {code}: {message}", outcome.task.filename);
        }
    }
    failed.len()
}

#[allow(clippy::too_many_lines)]
#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            debug!("Error loading .env file: {e}");
        }
    } else {
        debug!("Loaded environment from .env file");
    }

    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Upload {
            files,
            token,
            api_url,
            config,
            folder,
            parallel_files,
            parallel_chunks,
            chunk_size_mib,
            quota_bytes,
            used_bytes,
            max_file_size,
            no_progress,
        } => {
            if files.is_empty() {
                return Err(anyhow::anyhow!("No files specified for upload"));
            }
            if !(1..=16).contains(&parallel_files) || !(1..=16).contains(&parallel_chunks) {
                return Err(anyhow::anyhow!(
                    "Parallelism values must be between 1 and 16"
                ));
            }
            if chunk_size_mib == 0 {
                return Err(anyhow::anyhow!("Chunk size must be at least 1 MiB"));
            }

            let file_config = FileConfig::load_with_fallback(config.as_ref())?;
            let token = token
                .or(file_config.api_token)
                .ok_or_else(|| anyhow::anyhow!("No API token (flag, env, or config file)"))?;
            let api_url = api_url
                .or(file_config.api_url)
                .ok_or_else(|| anyhow::anyhow!("No API URL (flag, env, or config file)"))?;
            let folder = folder.or(file_config.folder_id);

            info!("Using API URL: {api_url}");
            let client = Client::new(Config::new(token, api_url)?);

            let quota = match (quota_bytes, used_bytes, max_file_size) {
                (Some(quota), Some(used), Some(max_file_size)) => Some(QuotaInfo {
                    used,
                    quota,
                    max_file_size,
                }),
                _ => None,
            };

            let options = UploadOptions {
                chunk_size: chunk_size_mib * 1024 * 1024,
                max_concurrent_chunks: parallel_chunks,
                max_concurrent_files: parallel_files,
                retry: RetryPolicy::default(),
                folder_id: folder,
                quota,
                ..UploadOptions::default()
            };

            let mut tasks = Vec::with_capacity(files.len());
            for path in files {
                tasks.push(UploadTask::from_path(path).await?);
            }
            let names: HashMap<Uuid, String> =
                tasks.iter().map(|t| (t.id, t.filename.clone())).collect();
            let grand_total: u64 = tasks.iter().map(|t| t.total_size).sum();

            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Cancellation requested, letting in-flight transfers drain");
                        cancel.cancel();
                    }
                });
            }

            let (progress_tx, renderer) = if no_progress {
                (None, None)
            } else {
                let (tx, rx) = progress::channel();
                (
                    Some(tx),
                    Some(tokio::spawn(render_progress(rx, names, grand_total))),
                )
            };

            let outcomes = upload_files(&client, tasks, &options, progress_tx, &cancel).await;

            if let Some(renderer) = renderer {
                // Sender side is dropped by now, the renderer drains and exits.
                let _ = renderer.await;
            }

            let failures = report(&outcomes);
            if failures > 0 {
                error!("{failures} file(s) failed to upload");
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
