//! gfile: upload to and download from gigafile.nu.
//!
//! Usage:
//!   gfile upload <FILE> [-n THREADS] [-s CHUNK_SIZE]
//!   gfile download <URL> [-o NAME] [--aria2 "ARGS"]
//!   gfile info <URL> [--json]

use std::collections::HashMap;
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use gfile::{
    DelegateConfig, DownloadOutcome, Session, TransferConfig, TransferProgress, UploadOutcome,
};

#[derive(Debug, Parser)]
#[command(name = "gfile", version = env!("CARGO_PKG_VERSION"), about, long_about = None, propagate_version = true)]
struct App {
    #[command(subcommand)]
    cmd: Commands,
    #[command(flatten)]
    opts: TransferArgs,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload a file and print its download URL
    #[command(alias = "up")]
    Upload { file: PathBuf },
    /// Show what a share link points at
    Info { url: String },
    /// Download the file behind a share link
    #[command(alias = "dl")]
    Download {
        url: String,
        /// Output file name (defaults to the name on the page)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct TransferArgs {
    /// Concurrent chunk uploads
    #[arg(short = 'n', long = "threads", global = true, default_value_t = gfile::config::DEFAULT_WORKERS)]
    threads: usize,
    /// Chunk size, e.g. 10M
    #[arg(short = 's', long, global = true, default_value = "10M")]
    chunk_size: String,
    /// Copy buffer size, e.g. 1M
    #[arg(short = 'm', long = "copy-size", global = true, default_value = "1M")]
    copy_size: String,
    /// Connect, page-fetch and idle-read timeout in seconds
    #[arg(long, global = true, default_value_t = 10)]
    timeout: u64,
    /// Download key of a protected file
    #[arg(short = 'k', long, global = true)]
    password: Option<String>,
    /// Hide progress bars
    #[arg(long, global = true)]
    no_progress: bool,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    /// Download with aria2c, passing these extra arguments
    #[arg(
        long,
        global = true,
        value_name = "ARGS",
        num_args = 0..=1,
        default_missing_value = "",
        allow_hyphen_values = true
    )]
    aria2: Option<String>,
}

impl TransferArgs {
    fn config(&self) -> gfile::Result<TransferConfig> {
        let mut config = TransferConfig::default()
            .with_chunk_size_str(&self.chunk_size)?
            .with_chunk_copy_size_str(&self.copy_size)?
            .with_workers(self.threads);
        config.timeout = Duration::from_secs(self.timeout);
        if let Some(password) = &self.password {
            config = config.with_password(password);
        }
        config.delegate = self.aria2.as_deref().map(DelegateConfig::aria2);
        Ok(config)
    }
}

/// One bar per progress label, created on first sight.
struct Bars {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    style: ProgressStyle,
}

impl Bars {
    fn new() -> Self {
        let style = ProgressStyle::with_template(
            "{msg:>20} [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            style,
        }
    }

    fn update(&self, progress: &TransferProgress) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        let bar = bars.entry(progress.label.clone()).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(progress.total));
            bar.set_style(self.style.clone());
            bar.set_message(progress.label.clone());
            bar
        });
        bar.set_position(progress.done.min(progress.total));
        if progress.is_complete() && !bar.is_finished() {
            bar.finish();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gfile=info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let app = App::parse();
    let mut session = Session::new(app.opts.config()?)?;

    if !app.opts.no_progress {
        let bars = Arc::new(Bars::new());
        session.watch_status(Arc::new(move |progress: &TransferProgress| {
            bars.update(progress);
            true
        }));
    }

    let cancel = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let json = app.opts.json;
    match app.cmd {
        Commands::Upload { file } => match session.upload(&file).await {
            Ok(UploadOutcome::Completed(result)) if json => {
                println!("{}", serde_json::to_string_pretty(&result)?)
            }
            Ok(UploadOutcome::Completed(result)) => println!("{}", result.summary()),
            Ok(UploadOutcome::Cancelled) => {
                eprintln!("User cancelled the operation.");
                process::exit(130);
            }
            Err(e) => {
                eprintln!("Upload failed: {}", e);
                process::exit(1);
            }
        },
        Commands::Info { url } => {
            let resolved = session.resolve(&url).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&resolved)?);
            } else {
                println!("Name: {}, size: {}, id: {}", resolved.name, resolved.size_text, resolved.id);
            }
        }
        Commands::Download { url, output } => match session.download(&url, output.as_deref()).await {
            Ok(DownloadOutcome::Completed(path)) => println!("{}", path.display()),
            Ok(DownloadOutcome::Delegated { exit_code }) => {
                process::exit(exit_code.unwrap_or(1));
            }
            Ok(DownloadOutcome::Cancelled) => {
                eprintln!("User cancelled the operation.");
                process::exit(130);
            }
            Err(e) => {
                eprintln!("Download failed: {}", e);
                process::exit(1);
            }
        },
    }

    Ok(())
}
