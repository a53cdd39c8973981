use anyhow::Result;
use global_hotkey::GlobalHotKeyEvent;
use tokio::sync::mpsc;

use standup::app::App;
use standup::config::Config;
use standup::input::HotKeyCenter;
use standup::tray::TrayManager;
use standup::{login_item, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;
    println!("✓ Config loaded from ~/.standup.toml");

    // Initialize telemetry
    telemetry::init(&config.telemetry)?;
    tracing::info!("standup starting");
    println!("✓ Telemetry initialized");

    if let Err(e) = login_item::set_enabled(config.general.launch_at_login) {
        tracing::warn!("failed to sync launch at login: {:#}", e);
    }

    // Global hotkeys
    let hotkeys = if config.hotkeys.enabled {
        Some(HotKeyCenter::new(&config.hotkeys)?)
    } else {
        tracing::info!("hotkeys disabled in config");
        None
    };

    let (sender, mut commands) = mpsc::unbounded_channel();
    let mut app = App::new(config, Config::config_path()?, hotkeys, sender);
    app.activate_desk();
    match app.controller() {
        Some(controller) => println!("✓ Desk: {}", controller.desk().name()),
        None => println!("✓ No desk configured, edit ~/.standup.toml"),
    }

    let mut tray = TrayManager::new(app.snapshot())?;
    println!("✓ Menu bar ready");

    // Main event loop
    tracing::info!("event loop starting (press Ctrl+C to exit)");
    println!("\nStandUp is running. Press Ctrl+C to exit.\n");

    let receiver = GlobalHotKeyEvent::receiver();
    loop {
        // Hotkey callbacks feed the command channel
        if let Ok(event) = receiver.try_recv() {
            app.handle_hotkey(event);
        }

        if let Some(command) = TrayManager::poll_events() {
            app.handle(command.into());
        }

        while let Ok(command) = commands.try_recv() {
            app.handle(command);
        }

        // Pick up edits made in the config file
        app.poll_config();

        if let Err(e) = tray.update_if_needed(app.snapshot()) {
            tracing::error!("failed to update tray: {:#}", e);
        }

        // Check for shutdown signal
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                println!("\nShutting down...");
                break;
            }
            () = tokio::time::sleep(tokio::time::Duration::from_millis(10)) => {
                // Poll interval (10ms to avoid busy-waiting)
            }
        }
    }

    Ok(())
}
