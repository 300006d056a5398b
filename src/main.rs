//! Altlens 主入口

use altlens_lib::commands::{self, OutputOptions};
use altlens_lib::{AppConfig, AppState, BackendKind};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "altlens")]
#[command(about = "Generate alt text for images with a hosted or local vision model")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured backend (huggingface | ollama)
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    /// Number of images processed concurrently
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

/// Flags shared by commands that run the pipeline.
#[derive(Args, Clone)]
struct OutputArgs {
    /// Write the results to a CSV spreadsheet
    #[arg(long)]
    export: Option<PathBuf>,

    /// Inject alt attributes into this HTML document
    #[arg(long)]
    patch: Option<PathBuf>,

    /// Where to write the patched HTML (defaults to overwriting --patch)
    #[arg(long, requires = "patch")]
    patch_out: Option<PathBuf>,

    /// Print the summary and entries as JSON
    #[arg(long)]
    json: bool,
}

impl From<OutputArgs> for OutputOptions {
    fn from(args: OutputArgs) -> Self {
        Self {
            export: args.export,
            patch: args.patch,
            patch_out: args.patch_out,
            json: args.json,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Describe every image in the image directory
    Refresh {
        /// Directory to scan instead of the configured one
        #[arg(long)]
        dir: Option<PathBuf>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Describe the images listed in a CSV manifest (Image Name, Image Path)
    Process {
        manifest: PathBuf,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Describe a single image path or URL
    Describe {
        locator: String,
        /// Display name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Print the effective configuration
    Config {
        /// Print only the config file path
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::from_default_env()
                .add_directive("altlens=info".parse()?)
                .add_directive("altlens_lib=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(kind) = cli.backend {
        config.backend.kind = kind;
    }
    if let Some(n) = cli.concurrency {
        config.pipeline.concurrency = n;
    }

    info!("Starting Altlens v{}", env!("CARGO_PKG_VERSION"));

    if let Command::Config { path } = &cli.command {
        if *path {
            match &cli.config {
                Some(p) => println!("{}", p.display()),
                None => println!("{}", AppConfig::config_path()?.display()),
            }
        } else {
            print!("{}", commands::show_config(&config)?);
        }
        return Ok(());
    }

    let state = AppState::new(config)?;

    // 第一次 Ctrl-C 在两张图片之间取消运行，第二次直接退出
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling after the current image");
            pipeline.cancel();
        }
        if signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let (summary, output) = match cli.command {
        Command::Refresh { dir, output } => {
            (commands::refresh(&state, dir.as_deref()).await?, output)
        }
        Command::Process { manifest, output } => {
            (commands::process(&state, &manifest).await?, output)
        }
        Command::Describe {
            locator,
            name,
            output,
        } => (
            commands::describe(&state, name.as_deref(), &locator).await?,
            output,
        ),
        Command::Config { .. } => return Ok(()),
    };

    commands::finish(&state, &summary, &output.into())
}
