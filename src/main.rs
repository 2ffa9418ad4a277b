use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edushorts::cli::{Cli, Commands, LogsAction, RunMode, TopicsAction};
use edushorts::config::{parse_post_times, Config, LogFormat};
use edushorts::content::client::ChatClient;
use edushorts::content::LessonWriter;
use edushorts::output;
use edushorts::pipeline::{PipelineSettings, RunOutcome, VideoPipeline};
use edushorts::publish::YoutubePublisher;
use edushorts::render::{FfmpegRenderer, VideoProducer};
use edushorts::scheduler::{install_signal_handler, Schedule, Scheduler};
use edushorts::store::TopicStore;
use edushorts::topics::{sample_topics, TopicSupplier, TopicWriter};
use edushorts::utils;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::config_path()?,
    };
    let first_use = !config_path.exists();
    let config = Config::load(Some(&config_path)).await?;
    init_tracing(&config, cli.verbose);
    if first_use {
        tracing::info!("Wrote default configuration to {}", config_path.display());
    }

    let show_progress = !cli.quiet;

    match cli.command {
        Commands::Run { mode, interval_hours, post_times } => {
            let pipeline = build_pipeline(&config, show_progress)?;
            tracing::info!("Starting in {} mode", mode);

            let schedule = match mode {
                RunMode::Once => {
                    let outcome = pipeline.run_cycle().await;
                    output::print_outcome(&outcome);
                    return Ok(exit_code(&outcome));
                }
                RunMode::Scheduled => {
                    let times = match post_times {
                        Some(times) => parse_post_times(&times[..])?,
                        None => config.post_times()?,
                    };
                    Schedule::daily(times)?
                }
                RunMode::Continuous => {
                    Schedule::every_hours(interval_hours.unwrap_or(config.schedule.interval_hours))?
                }
            };

            let scheduler = Scheduler::new(schedule, install_signal_handler());
            let summary = scheduler.run(&pipeline).await;
            println!(
                "Stopped after {} cycle(s), {} failed",
                summary.cycles, summary.failures
            );
        }

        Commands::Preview { topic_id, output: target } => {
            let pipeline = build_pipeline(&config, show_progress)?;
            match pipeline.preview(topic_id, target.as_deref()).await {
                Ok(preview) => {
                    println!("Topic: {}", preview.topic.label());
                    for (i, slide) in preview.lesson.slides().iter().enumerate() {
                        println!("  Slide {}: {}", i + 1, slide.replace('\n', " / "));
                    }
                    println!(
                        "Video saved to: {} ({})",
                        preview.video_path.display(),
                        utils::format_duration(preview.video_duration_secs)
                    );
                }
                Err(e) => {
                    tracing::error!("Preview failed: {:#}", e);
                    eprintln!("Preview failed: {:#}", e);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }

        Commands::Topics { action } => {
            let store = open_store(&config)?;
            match action {
                TopicsAction::Stats { format } => {
                    output::print_stats(&store.stats()?, format)?;
                }
                TopicsAction::Seed => {
                    let added = store.add_topics(&sample_topics())?;
                    println!("Added {} sample topics", added);
                }
                TopicsAction::Generate { count } => {
                    let supplier = build_supplier(&config, count)?;
                    let added = supplier.replenish(&store).await?;
                    println!("Added {} new topics", added);
                }
                TopicsAction::Reset => {
                    let reset = store.reset_all()?;
                    println!("Marked {} topics unused", reset);
                }
                TopicsAction::Clear => {
                    let deleted = store.delete_all_topics()?;
                    println!("Deleted {} topics", deleted);
                }
            }
        }

        Commands::Uploads { limit, format } => {
            let store = open_store(&config)?;
            output::print_uploads(&store.recent_uploads(limit)?, format)?;
        }

        Commands::Logs { action, limit, format } => {
            let store = open_store(&config)?;
            match action {
                Some(LogsAction::Prune { days }) => {
                    let days = days.unwrap_or(config.store.log_retention_days);
                    let pruned = store.prune_logs(days)?;
                    println!("Pruned {} log entries older than {} days", pruned, days);
                }
                None => output::print_logs(&store.recent_logs(limit)?, format)?,
            }
        }

        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                config.save(&config_path).await?;
                println!("Configuration written to: {}", config_path.display());
            }
        }

        Commands::Doctor => {
            let problems = doctor(&config).await;
            if problems.is_empty() {
                println!("All checks passed");
            } else {
                eprintln!("Found {} problem(s):", problems.len());
                for problem in &problems {
                    eprintln!("   • {}", problem);
                }
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_tracing(config: &Config, verbose: bool) {
    let default_filter = if verbose { "edushorts=debug" } else { "edushorts=info" };
    let json = config.logging.format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .init();
}

fn exit_code(outcome: &RunOutcome) -> ExitCode {
    if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn open_store(config: &Config) -> Result<TopicStore> {
    TopicStore::open(config.store.db_path.clone())
        .with_context(|| format!("Failed to open database {}", config.store.db_path.display()))
}

fn build_supplier(config: &Config, count: Option<usize>) -> Result<TopicSupplier> {
    let client = ChatClient::new(&config.topics.api).context("Topic generation is not configured")?;
    let writer = TopicWriter::new(client, config.topics.categories.clone());

    Ok(TopicSupplier::new(
        Arc::new(writer),
        count.unwrap_or(config.topics.replenish_count),
        config.topics.batch_size,
    ))
}

/// Wire every collaborator from configuration
fn build_pipeline(config: &Config, show_progress: bool) -> Result<VideoPipeline> {
    let store = open_store(config)?;
    let supplier = build_supplier(config, None)?;

    let lesson_client = ChatClient::new(&config.content.api).context("Lesson generation is not configured")?;
    let lessons = LessonWriter::new(lesson_client, config.content.polish);

    let renderer = FfmpegRenderer::new(&config.render);
    let producer = VideoProducer::new(Arc::new(renderer), &config.render).with_progress(show_progress);

    let publisher = YoutubePublisher::new(&config.publish)?.with_progress(show_progress);

    Ok(VideoPipeline::new(
        store,
        supplier,
        Arc::new(lessons),
        producer,
        Arc::new(publisher),
        PipelineSettings::from_config(config),
    ))
}

/// Everything that would make a run fail before it starts
async fn doctor(config: &Config) -> Vec<String> {
    let renderer = FfmpegRenderer::new(&config.render);
    let mut problems = utils::check_dependencies(&renderer.required_tools()).await;

    for (name, api) in [("topics", &config.topics.api), ("content", &config.content.api)] {
        if let Err(e) = api.resolve_api_key() {
            problems.push(format!("{}: {}", name, e));
        }
    }

    for (what, path) in [
        ("OAuth client secrets", &config.publish.client_secrets_path),
        ("YouTube token", &config.publish.token_path),
    ] {
        if !path.exists() {
            problems.push(format!("{} not found at {}", what, path.display()));
        }
    }

    if let Err(e) = open_store(config) {
        problems.push(format!("{:#}", e));
    }

    problems
}
