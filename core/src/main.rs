use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use inbox_core::{
    cli::{Cli, Command},
    config::Config,
    ipc,
    media::{attachment_kind, public_id_url, thumbnail_options, transform_url, TransformOptions},
    presence::PresenceIndex,
    MessagingView,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.global)?;
    let default_level = if config.logging_enabled { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Replay { input, active } => {
            let mut view = MessagingView::new(config.view_settings()?, PresenceIndex::new());
            if let Some(conversation_id) = &active {
                for call in view.activate(conversation_id, inbox_core::Now::system()) {
                    info!(call = call.name(), "collaborator call requested");
                }
            }
            let mut reader: Box<dyn AsyncBufRead + Unpin> = match &input {
                Some(path) => Box::new(BufReader::new(
                    tokio::fs::File::open(path)
                        .await
                        .with_context(|| format!("open {}", path.display()))?,
                )),
                None => Box::new(BufReader::new(tokio::io::stdin())),
            };
            let report = ipc::replay(&mut view, &mut reader).await?;
            info!(frames = report.frames, unreadable = report.unreadable, calls = report.calls, "replay finished");
            let mut stdout = tokio::io::stdout();
            ipc::write_json_line(&mut stdout, &view.snapshot()).await?;
        }
        Command::MediaUrl { url, width, height } => {
            let opts = match (width, height) {
                (Some(w), None) => thumbnail_options(w),
                (w, h) => TransformOptions {
                    width: w,
                    height: h,
                    ..TransformOptions::default()
                },
            };
            let display = if url.contains("://") {
                transform_url(&url, &opts)
            } else {
                // a bare public id needs the configured cloud
                let cloud = config
                    .cloud_name
                    .as_deref()
                    .context("media.cloud_name is required for public ids")?;
                public_id_url(cloud, attachment_kind(None, None, &url), &url, &opts)
            };
            println!("{display}");
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
            if let Some(source) = &config.source {
                info!(path = %source.display(), "configuration file");
            }
        }
    }
    Ok(())
}
