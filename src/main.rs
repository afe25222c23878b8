use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use serde::Serialize;

mod ai;
mod cli;
mod config;
mod db;
mod error;
mod models;
mod pipeline;
mod server;
mod youtube;

use cli::{Cli, Command};
use config::Config;
use db::Repository;
use error::Result;
use models::HistorySource;
use pipeline::{Pipeline, PipelineSettings};
use youtube::YouTubeClient;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let Some(command) = cli.selected_command() else {
        Cli::command().print_help()?;
        return Ok(());
    };

    // Warnings only for one-shot commands; the server also logs its lifecycle.
    let default_level = match command {
        Command::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config_path.as_deref())?;
    let repository = Repository::open(&config.db_path).await?;

    let platform = Arc::new(YouTubeClient::new(
        config.youtube_api_key.clone(),
        config.transcript_languages.clone(),
    ));
    let pipeline = Arc::new(Pipeline::new(
        repository.clone(),
        platform,
        PipelineSettings::from(&config),
    ));

    let result = run(command, &config, pipeline).await;
    repository.close().await?;
    result
}

async fn run(command: Command, config: &Config, pipeline: Arc<Pipeline>) -> Result<()> {
    match command {
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.host.clone());
            let port = port.unwrap_or(config.port);
            server::serve(pipeline, &host, port).await?;
        }
        Command::Channel { url, transcripts } => {
            let listing = pipeline
                .channel_for_url(&url, transcripts, HistorySource::Cli)
                .await?;
            print_json(&listing)?;
        }
        Command::Transcript { input } => {
            let (video_id, transcript) = pipeline
                .transcript_for_input(&input, HistorySource::Cli)
                .await?;
            match transcript {
                Some(text) => println!("{}", text),
                None => return Err(error::AppError::TranscriptUnavailable(video_id)),
            }
        }
        Command::Prompt {
            input,
            template,
            service,
            open,
        } => {
            let result = pipeline.prompt(&input, template.as_deref()).await?;
            match service {
                Some(service) => {
                    let link = result.links.get(service);
                    println!("{}", link);
                    if open {
                        open::that(link).context("failed to open browser")?;
                    }
                }
                None => {
                    print_json(&result)?;
                    if open {
                        open::that(&result.links.chatgpt).context("failed to open browser")?;
                    }
                }
            }
        }
        Command::Refresh => {
            let summary = pipeline.refresh_stale_channels().await?;
            println!(
                "Refreshed {} channels ({} already fresh, {} failed), pruned {} history entries",
                summary.refreshed, summary.fresh, summary.failed, summary.history_removed
            );
        }
        Command::History {
            favorites,
            search,
            limit,
        } => {
            let repository = pipeline.repository();
            let entries = match (favorites, search) {
                (true, _) => repository.favorite_history().await?,
                (false, Some(query)) => repository.search_history(&query, limit).await?,
                (false, None) => repository.recent_history(limit).await?,
            };
            print_json(&entries)?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
