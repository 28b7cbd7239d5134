use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Parser;
use color_eyre::eyre::Result;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use imgtier::domain::{ExecutionContext, FetchRequest, LoadOutcome};
use imgtier::infrastructure::image::decode_resource;
use imgtier::infrastructure::{AppConfig, CliArgs, Command, ConfigStore, ImageLoader};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry().with(filter).init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let store = ConfigStore::new()?;
    let mut config = store.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

fn report(url: &str, outcome: &LoadOutcome) {
    match outcome {
        LoadOutcome::Found(loaded) => println!(
            "{url}: {}x{} (native {}x{}, sample {}) from {}",
            loaded.image.width(),
            loaded.image.height(),
            loaded.image.native_width(),
            loaded.image.native_height(),
            loaded.image.sample_size(),
            loaded.source,
        ),
        LoadOutcome::NotFound => println!("{url}: not found"),
        LoadOutcome::Failed(e) if e.is_transient() => {
            println!("{url}: failed: {e} (may succeed on retry)");
        }
        LoadOutcome::Failed(e) => println!("{url}: failed: {e}"),
    }
}

fn fetch(
    config: &AppConfig,
    urls: Vec<String>,
    width: u32,
    height: u32,
    blocking: bool,
) -> Result<()> {
    let (loader, mut queue) = ImageLoader::new(&config.image)?;

    if blocking {
        for url in urls {
            let request = FetchRequest::new(url).with_target(width, height);
            let outcome = loader.load_blocking(&request, ExecutionContext::Worker);
            report(&request.url, &outcome);
        }
    } else {
        let total = urls.len();
        let done = Arc::new(AtomicUsize::new(0));
        for url in urls {
            let request = FetchRequest::new(url.clone()).with_target(width, height);
            let done = done.clone();
            loader.submit(request, url, move |url, outcome| {
                report(&url, &outcome);
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        while done.load(Ordering::SeqCst) < total {
            if !queue.run_next_blocking() {
                break;
            }
        }
    }

    info!(stats = %loader.memory_cache_stats(), "Fetch finished");
    Ok(())
}

fn decode(path: &std::path::Path, width: u32, height: u32) -> Result<()> {
    let image = decode_resource(path, width, height)?;
    println!(
        "{}: {}x{} (native {}x{}, sample {}, {} bytes)",
        path.display(),
        image.width(),
        image.height(),
        image.native_width(),
        image.native_height(),
        image.sample_size(),
        image.byte_size(),
    );
    Ok(())
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = imgtier::VERSION, "Starting imgtier");

    match args.command {
        Command::Fetch {
            urls,
            width,
            height,
            blocking,
        } => fetch(&config, urls, width, height, blocking),
        Command::Decode {
            path,
            width,
            height,
        } => decode(&path, width, height),
    }
}
