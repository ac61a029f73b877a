use clap::{Parser, Subcommand};
use jigsawwm::{Config, Result};
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "jigsawwm")]
#[command(about = "A tiling window manager and keyboard remapper for Windows")]
struct Cli {
    #[arg(short, long, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the daemon")]
    Start,
    #[command(about = "Validate the configuration and exit")]
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(|| {
        let home = std::env::var("USERPROFILE")
            .or_else(|_| std::env::var("HOME"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".config")
            .join("jigsawwm")
            .join("jigsawwm.toml")
    });

    let config = Config::load(&config_path)?;

    match cli.command {
        Some(Commands::Check) => {
            info!("configuration OK");
            Ok(())
        }
        Some(Commands::Start) | None => run(config).await,
    }
}

#[cfg(windows)]
async fn run(config: Config) -> Result<()> {
    use jigsawwm::services::{Action, Daemon, ProcessService};
    use jigsawwm::win32::{hook, input, Win32WindowSystem};
    use jigsawwm::window_manager::WindowManager;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    info!("starting jigsawwm");

    // per-monitor DPI awareness, otherwise enumeration reports virtualized
    // coordinates and every rect we compute is off on scaled displays
    unsafe {
        use windows::Win32::UI::HiDpi::{
            SetProcessDpiAwareness, PROCESS_PER_MONITOR_DPI_AWARE,
        };
        if let Err(e) = SetProcessDpiAwareness(PROCESS_PER_MONITOR_DPI_AWARE) {
            log::warn!("SetProcessDpiAwareness failed: {e}");
        }
    }

    let pipeline = Arc::new(Mutex::new(config.build_pipeline()?));
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let mut daemon = Daemon::new(pipeline.clone(), command_tx, input::send_input);
    for (action, command) in config.command_actions() {
        daemon.register_action(action, Action::Command(command))?;
    }
    for svc in &config.services {
        let mut service = ProcessService::new(
            svc.name.clone(),
            svc.args.clone(),
            daemon.scheduler().sender(),
        );
        service.log_path = svc.log_path.clone().map(PathBuf::from);
        service.autorestart = svc.autorestart;
        daemon.register_service(Box::new(service));
    }

    let backend = Win32WindowSystem::new(config.general.bound_compensation);
    let mut wm = WindowManager::new(config.wm_options()?, backend, event_rx, command_rx);

    // hook installation failure is fatal by design
    let _hooks = hook::install(hook::HookChannels {
        pipeline,
        daemon_tx: daemon.scheduler().sender(),
        event_tx,
    })?;

    tokio::select! {
        result = wm.run() => result,
        result = daemon.run() => result,
    }
}

#[cfg(not(windows))]
async fn run(_config: Config) -> Result<()> {
    anyhow::bail!("jigsawwm drives the Win32 desktop and only runs on Windows")
}
