use clap::Parser;
use pixel_flow::config::Config;
use pixel_flow::engine::EngineChoice;
use pixel_flow::pipeline::Pipeline;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "pixel-flow",
    about = "Discovers the image assets on a web page and downloads them"
)]
struct Cli {
    /// Target page URL (overrides base_url from the config file)
    #[arg(long)]
    url: Option<String>,

    /// Path to the JSON configuration document
    #[arg(long, default_value = "pixel-flow.json")]
    config: PathBuf,

    /// Destination directory for downloaded images
    #[arg(long, default_value = "images")]
    output: PathBuf,

    /// Force a specific engine: auto, automated, or simple
    #[arg(long)]
    engine: Option<EngineChoice>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("pixel_flow=debug,info")
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        match Config::from_file(&cli.config) {
            Ok(config) => config,
            Err(e) => {
                error!("could not load {}: {}", cli.config.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        info!(
            "no config file at {}, running with defaults",
            cli.config.display()
        );
        Config::default()
    };

    let url = cli
        .url
        .clone()
        .unwrap_or_else(|| config.base_url.clone());
    if url.is_empty() {
        error!("no target URL: pass --url or set base_url in the config file");
        std::process::exit(1);
    }

    info!("target page: {}", url);
    let pipeline = Pipeline::new(config);

    match pipeline.run(&url, &cli.output, cli.engine).await {
        Ok(run) => {
            info!("run complete using the {} engine", run.engine.as_str());
            if run.fallback_used {
                info!("fallback engine was engaged during this run");
            }
            info!(
                "found {} / downloaded {} / failed {} ({:.1} KiB in {:.1}s)",
                run.stats.found,
                run.stats.downloaded,
                run.stats.failed,
                run.stats.total_bytes as f64 / 1024.0,
                run.elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            error!("pipeline run failed: {}", e);
            std::process::exit(1);
        }
    }
}
