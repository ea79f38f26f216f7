use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use duopane_archive::{
    ArchiveConfig, ArchiveController, ArchiveFormat, ArchiveTaskStatus, EntryKind, ExtractMethod,
    TaskState, detect_format,
};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::tracker::{TaskTracker, TaskTrackerBuilder};

const REFRESH: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, Parser)]
#[command(name = "duopane", version = env!("CARGO_PKG_VERSION"), about, long_about = None, propagate_version = true)]
pub struct App {
    /// TOML file holding an `[archive]` table.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    #[command(alias = "c", name = "compress", about = "Pack files and directories into an archive")]
    Compress(CompressArg),
    #[command(alias = "x", name = "extract", about = "Unpack an archive")]
    Extract(ExtractArg),
    #[command(alias = "i", name = "inspect", about = "Show an archive's entries and layout")]
    Inspect(InspectArg),
    #[command(alias = "ls", name = "formats", about = "List supported formats and their tools")]
    Formats,
}

#[derive(Clone, Debug, Args)]
pub struct CompressArg {
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,
    #[arg(short, long)]
    pub output: PathBuf,
    /// Defaults to the format implied by the output name.
    #[arg(short, long)]
    pub format: Option<ArchiveFormat>,
    #[arg(short, long, default_value_t = 6)]
    pub level: u32,
}

#[derive(Clone, Debug, Args)]
pub struct ExtractArg {
    pub archive: PathBuf,
    #[arg(default_value = ".")]
    pub dest: PathBuf,
}

#[derive(Clone, Debug, Args)]
pub struct InspectArg {
    pub archive: PathBuf,
}

impl App {
    pub async fn run(self) -> Result<()> {
        let config = match &self.config {
            Some(path) => ArchiveConfig::from_path(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ArchiveConfig::default(),
        };
        let archives = ArchiveController::new(Handle::current(), config);

        match self.cmd {
            Commands::Compress(arg) => compress(&archives, arg).await,
            Commands::Extract(arg) => extract(&archives, arg).await,
            Commands::Inspect(arg) => inspect(&archives, &arg.archive).await,
            Commands::Formats => {
                formats();
                Ok(())
            }
        }
    }
}

async fn compress(archives: &ArchiveController, arg: CompressArg) -> Result<()> {
    let format = match arg.format {
        Some(format) => format,
        None => {
            let name = arg
                .output
                .file_name()
                .map(|name| name.to_string_lossy())
                .unwrap_or_default();
            detect_format(&name).context("pass --format or use a known archive extension")?
        }
    };
    let id = archives.create_archive(&arg.sources, &arg.output, format, arg.level)?;
    watch(archives, &id, "compress").await?;
    println!("{}", arg.output.display());
    Ok(())
}

async fn extract(archives: &ArchiveController, arg: ExtractArg) -> Result<()> {
    let id = archives.extract_archive(&arg.archive, &arg.dest)?;
    watch(archives, &id, "extract").await?;
    println!("{}", arg.dest.display());
    Ok(())
}

/// Render a task's progress until it ends. Ctrl-C cancels it.
async fn watch(archives: &ArchiveController, id: &str, prefix: &str) -> Result<()> {
    let tracker = TaskTrackerBuilder::default()
        .with_prefix(prefix)
        .with_finish("done")
        .build();
    let mut tick = tokio::time::interval(REFRESH);
    let mut interrupted = false;

    let finished = archives.wait_for_task(id);
    tokio::pin!(finished);
    loop {
        tokio::select! {
            _ = &mut finished => break,
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.context("listening for ctrl-c")?;
                info!(task_id = id, "interrupted, cancelling");
                interrupted = true;
                archives.cancel_task(id)?;
            }
            _ = tick.tick() => {
                if let Some(progress) = archives.get_task_status(id).and_then(|s| s.progress) {
                    tracker.update(&progress);
                }
            }
        }
    }

    let status = archives
        .get_task_status(id)
        .with_context(|| format!("task {id} vanished"))?;
    archives.cleanup_task(id);
    report(status, tracker)
}

fn report(status: ArchiveTaskStatus, tracker: TaskTracker) -> Result<()> {
    if let Some(progress) = &status.progress {
        tracker.update(progress);
    }
    debug!(task_id = %status.id, state = status.state.as_str(), "task ended");
    match (status.state, status.error) {
        (TaskState::Completed, _) => {
            tracker.finish();
            Ok(())
        }
        (state, error) => {
            tracker.abandon(state.as_str());
            match error {
                Some(err) => Err(err.into()),
                None => bail!("task {} ended as {}", status.id, state.as_str()),
            }
        }
    }
}

async fn inspect(archives: &ArchiveController, archive: &Path) -> Result<()> {
    let metadata = archives.get_archive_metadata(archive).await?;
    let strategy = archives.analyze_structure(archive).await?;

    for entry in &metadata.entries {
        let suffix = match &entry.kind {
            EntryKind::Symlink { target } => format!(" -> {target}"),
            EntryKind::Hardlink { target } => format!(" => {target}"),
            EntryKind::File | EntryKind::Directory => String::new(),
        };
        println!("{:>12}  {}{}", entry.size, entry.path, suffix);
    }
    println!();
    println!("files:      {}", metadata.file_count);
    println!("packed:     {} bytes", metadata.archive_size);
    println!("unpacked:   {} bytes", metadata.extracted_size);
    println!("layout:     {}", layout(strategy.method));
    Ok(())
}

fn layout(method: ExtractMethod) -> &'static str {
    match method {
        ExtractMethod::ExtractDirect => "single root, unpacks in place",
        ExtractMethod::ExtractToDirectory => "several roots, unpacks into a new directory",
    }
}

fn formats() {
    for format in ArchiveFormat::ALL {
        let mark = if format.is_available() { "yes" } else { "no" };
        println!(
            "{:<8} {:<9} {:<4} {}",
            format.as_str(),
            format.extension(),
            mark,
            format.required_commands().join(", ")
        );
    }
}
