use std::path::PathBuf;

use clap::Parser;
use marquee_core::{
    ArtNetSink, ConfigManager, EngineHandle, JsonScheduleStore, MemorySink, NetworkConfig,
    OutputSink, Scheduler, ShowEngine, SyncMode,
};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Headless show scheduler: plays scheduled and requested playlists out to the lights.
#[derive(Parser, Debug)]
#[command(name = "marquee")]
#[command(about = "Marquee show scheduler")]
struct Args {
    /// Configuration file (default: config.json in the working directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Show directory, overriding the configured one
    #[arg(long)]
    show_dir: Option<PathBuf>,

    /// FPP sync role: standalone, fpp-master or fpp-slave
    #[arg(long)]
    sync_mode: Option<SyncMode>,

    /// Render into memory instead of sending Art-Net
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Check the schedule for problems and exit
    #[arg(long, default_value = "false")]
    check: bool,

    /// Read commands from stdin, one per line as `command|parameters` or `?query|parameters`
    #[arg(short, long)]
    interactive: bool,
}

async fn run_line(handle: &EngineHandle, line: &str) -> Result<(), anyhow::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }

    let (name, parameters) = line.split_once('|').unwrap_or((line, ""));
    if let Some(query) = name.strip_prefix('?') {
        let response = handle.query(query, parameters, "stdin", "").await?;
        if !response.success {
            println!("error: {}", response.message);
        }
        println!("{}", response.to_json());
    } else {
        let response = handle.action(name, parameters, "").await?;
        if response.success {
            println!("ok");
        } else {
            println!("error: {}", response.message);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ConfigManager::new(args.config.clone());
    let mut settings = config.load()?;
    if let Some(show_dir) = args.show_dir {
        settings.show_dir = show_dir;
    }
    if let Some(sync_mode) = args.sync_mode {
        settings.sync_mode = sync_mode;
    }

    let store = JsonScheduleStore::new(settings.schedule_path());
    let document = store.load_or_default()?;

    let network_config = NetworkConfig::from_settings(&settings);
    let sink: Box<dyn OutputSink> = if args.dry_run || !settings.artnet_enabled {
        log::info!("Rendering {} channels into memory", network_config.total_channels());
        Box::new(MemorySink::new(network_config.total_channels()).with_limit(1))
    } else {
        log::info!(
            "Art-Net {} to {}",
            network_config.get_mode_string(),
            network_config.get_destination()
        );
        Box::new(ArtNetSink::new(network_config))
    };

    let mut scheduler = Scheduler::new(sink);
    scheduler.apply_settings(&settings);
    scheduler.load_document(document);
    scheduler.set_store(Box::new(store));

    let report = scheduler.check_integrity();
    if args.check {
        println!("{}", report);
        return Ok(());
    }

    if !scheduler.set_output_to_lights(true) {
        log::error!("Lights are not being driven; playback continues without output");
    }

    let mut engine = ShowEngine::new(scheduler, settings);
    engine.start_modules().await?;

    if args.interactive {
        let handle = engine.handle();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Err(e) = run_line(&handle, &line).await {
                    log::error!("{}", e);
                    break;
                }
            }
        });
    }

    let mut scheduler = engine
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Unable to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    if scheduler.is_dirty() {
        scheduler.save()?;
    }
    Ok(())
}
