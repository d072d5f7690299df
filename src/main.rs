use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use log::info;

use platform_bridge::{
    BridgeConfig, ImageLocator, Outcome, PlatformContext, ResourceGateway,
};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse()?;
    let mut config = match &options.config {
        Some(path) => BridgeConfig::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    config.bundle_dir = options.bundle_dir.clone();

    let context =
        PlatformContext::init_filesystem(config).context("failed to start the platform bridge")?;
    let result = run_actions(context.gateway(), &options);
    context.teardown();
    result
}

fn run_actions(gateway: &ResourceGateway, options: &CliOptions) -> Result<()> {
    println!(
        "Backend: {} (bundle {})",
        gateway.backend_name(),
        options.bundle_dir.display()
    );

    for resource in &options.resources {
        let (name, kind) = resource
            .rsplit_once('.')
            .ok_or_else(|| anyhow!("resource {resource} must be written as name.type"))?;
        let bytes = gateway
            .load_bundled_resource(name, kind)
            .with_context(|| format!("failed to load {resource}"))?;
        println!("Loaded {resource} ({} bytes)", bytes.len());
    }

    for asset in &options.images {
        let image = gateway
            .load_image(&ImageLocator::Asset(asset.clone()))
            .with_context(|| format!("failed to decode {asset}"))?;
        println!(
            "Decoded {asset} ({}x{} {})",
            image.width, image.height, image.format
        );
    }

    for url in &options.downloads {
        match gateway
            .download_url_to_temp_file(url)
            .with_context(|| format!("failed to download {url}"))?
        {
            Outcome::Ready(file) => {
                println!("Downloaded {url} to {}", file.path.display());
                if file.temporary {
                    gateway.delete_file(&file.path);
                }
            }
            Outcome::Cancelled => println!("Download of {url} was cancelled"),
        }
    }

    if options.audio {
        let audio = gateway.query_audio_parameters()?;
        println!(
            "Audio: {} Hz, buffer {} frames",
            audio.sample_rate, audio.buffer_size
        );
    }

    info!("all requested actions completed");
    Ok(())
}

struct CliOptions {
    bundle_dir: PathBuf,
    config: Option<PathBuf>,
    resources: Vec<String>,
    images: Vec<String>,
    downloads: Vec<String>,
    audio: bool,
}

const USAGE: &str = "Usage: platform-bridge <bundle-dir> [--config <file>] [--resource <name.type>]... \
[--image <asset>]... [--download <url>]... [--audio]";

impl CliOptions {
    fn parse() -> Result<Self> {
        let mut args = env::args().skip(1);
        let Some(bundle_dir) = args.next() else {
            return Err(anyhow!(USAGE));
        };
        let mut options = Self {
            bundle_dir: PathBuf::from(bundle_dir),
            config: None,
            resources: Vec::new(),
            images: Vec::new(),
            downloads: Vec::new(),
            audio: false,
        };
        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .ok_or_else(|| anyhow!("{flag} expects a value. {USAGE}"))
            };
            match arg.as_str() {
                "--config" => options.config = Some(PathBuf::from(value("--config")?)),
                "--resource" => options.resources.push(value("--resource")?),
                "--image" => options.images.push(value("--image")?),
                "--download" => options.downloads.push(value("--download")?),
                "--audio" => options.audio = true,
                other => return Err(anyhow!("Unknown argument: {other}. {USAGE}")),
            }
        }
        Ok(options)
    }
}
