use anyhow::{Context, Result};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::config::{Auth, Config, DeskConfig};
use crate::controller::{register_hotkeys, AppCommand, DeskController};
use crate::device::{DeviceWorker, EventStream};
use crate::input::hotkey::{Bindings, HotKeyBackend, HotKeyCenter};
use crate::tray::TraySnapshot;
use crate::{login_item, notify};

/// Connection to the active desk's device
struct DeskLink {
    worker: DeviceWorker,
    _events: EventStream,
}

/// How often the config file's modification time is checked
const CONFIG_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// How an edited config affects the active desk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeskChange {
    None,
    /// Only the sit/stand reference heights moved
    Heights { sitting: u32, standing: u32 },
    /// Different desk, credentials or presets
    Rebuild,
}

impl DeskChange {
    fn between(old: Option<&DeskConfig>, new: Option<&DeskConfig>) -> Self {
        match (old, new) {
            (None, None) => Self::None,
            (Some(old), Some(new)) if old == new => Self::None,
            (Some(old), Some(new)) => {
                let same_otherwise = DeskConfig {
                    sitting_height: old.sitting_height,
                    standing_height: old.standing_height,
                    ..new.clone()
                } == *old;
                if same_otherwise {
                    Self::Heights {
                        sitting: new.sitting_height,
                        standing: new.standing_height,
                    }
                } else {
                    Self::Rebuild
                }
            }
            _ => Self::Rebuild,
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Application state owned by the main loop
pub struct App<B: HotKeyBackend = GlobalHotKeyManager> {
    config: Config,
    config_path: PathBuf,
    config_modified: Option<SystemTime>,
    last_config_check: Instant,
    hotkeys: Option<HotKeyCenter<B>>,
    sender: UnboundedSender<AppCommand>,
    controller: Option<DeskController>,
    link: Option<DeskLink>,
}

impl<B: HotKeyBackend> App<B> {
    /// Create the app; call [`App::activate_desk`] to connect
    pub fn new(
        config: Config,
        config_path: PathBuf,
        hotkeys: Option<HotKeyCenter<B>>,
        sender: UnboundedSender<AppCommand>,
    ) -> Self {
        Self {
            config_modified: modified(&config_path),
            last_config_check: Instant::now(),
            config,
            config_path,
            hotkeys,
            sender,
            controller: None,
            link: None,
        }
    }

    /// Current configuration
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Controller for the active desk, if any
    pub const fn controller(&self) -> Option<&DeskController> {
        self.controller.as_ref()
    }

    /// True while a device worker and event stream are running
    pub const fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Tear down the current desk and set up the configured active desk
    pub fn activate_desk(&mut self) {
        // Stop the old stream before anything new reports in
        self.link = None;
        self.controller = None;

        let Some(desk_config) = self.config.active_desk().cloned() else {
            info!("no desk configured");
            if let Some(hotkeys) = self.hotkeys.as_mut() {
                hotkeys.unregister_all();
            }
            return;
        };

        let controller = DeskController::from_config(&desk_config);
        let preset_count = controller.presets().len();
        self.controller = Some(controller);

        match desk_config.auth() {
            Some(auth) => match self.connect(auth) {
                Ok(link) => {
                    info!(desk = %desk_config.name, "desk activated");
                    self.link = Some(link);
                }
                Err(e) => error!("failed to connect to desk: {:#}", e),
            },
            None => warn!(desk = %desk_config.name, "desk has no access token or device id"),
        }

        if let Some(hotkeys) = self.hotkeys.as_mut() {
            register_hotkeys(hotkeys, preset_count, &self.sender);
        }
    }

    fn connect(&self, auth: Auth) -> Result<DeskLink> {
        let worker = DeviceWorker::start(auth.clone(), self.sender.clone())
            .context("failed to start device worker")?;
        let events =
            EventStream::start(auth, self.sender.clone()).context("failed to start event stream")?;
        Ok(DeskLink {
            worker,
            _events: events,
        })
    }

    /// Route an OS hotkey event to its callback
    pub fn handle_hotkey(&self, event: GlobalHotKeyEvent) {
        if let Some(hotkeys) = &self.hotkeys {
            let id = event.id;
            if !hotkeys.handle_event(event) {
                debug!(id, "hotkey event for unknown id");
            }
        }
    }

    /// React to one command
    pub fn handle(&mut self, command: AppCommand) {
        match command {
            AppCommand::SelectDesk(device_id) => self.select_desk(&device_id),
            AppCommand::ToggleLaunchAtLogin => self.toggle_launch_at_login(),
            AppCommand::OpenConfigFile => self.open_config_file(),
            AppCommand::ReloadConfig => self.reload_config(),
            command => self.drive_desk(command),
        }
    }

    fn drive_desk(&mut self, command: AppCommand) {
        let Some(controller) = self.controller.as_mut() else {
            debug!(?command, "no active desk");
            return;
        };

        let reaction = controller.handle(command);

        if let Some(request) = reaction.request {
            match &self.link {
                Some(link) => link.worker.submit(request),
                None => warn!(?request, "desk is not connected"),
            }
        }

        if let Some(notification) = reaction.notification {
            if self.config.general.notifications {
                if let Err(e) = notify::deliver(&notification) {
                    warn!("failed to show notification: {:#}", e);
                }
            }
        }
    }

    fn select_desk(&mut self, device_id: &str) {
        if self
            .controller
            .as_ref()
            .is_some_and(|c| c.desk().device_id() == device_id)
        {
            return;
        }
        if !self.config.set_active_desk(device_id) {
            warn!(device_id, "unknown desk selected");
            return;
        }
        self.save_config();
        self.activate_desk();
    }

    fn toggle_launch_at_login(&mut self) {
        let enabled = !self.config.general.launch_at_login;
        if let Err(e) = login_item::set_enabled(enabled) {
            error!("failed to update launch at login: {:#}", e);
            return;
        }
        self.config.general.launch_at_login = enabled;
        self.save_config();
    }

    fn open_config_file(&self) {
        info!(path = %self.config_path.display(), "opening config file");
        if let Err(e) = std::process::Command::new("open")
            .arg(&self.config_path)
            .spawn()
        {
            error!("failed to open config file: {}", e);
        }
    }

    fn save_config(&mut self) {
        match self.config.save_to(&self.config_path) {
            // Our own write is not an external edit
            Ok(()) => self.config_modified = modified(&self.config_path),
            Err(e) => error!("failed to save config: {:#}", e),
        }
    }

    /// Reload the config file if it changed on disk
    ///
    /// Checks at most every couple of seconds; call it from the main loop.
    pub fn poll_config(&mut self) {
        if self.last_config_check.elapsed() < CONFIG_CHECK_INTERVAL {
            return;
        }
        self.last_config_check = Instant::now();

        let stamp = modified(&self.config_path);
        if stamp.is_some() && stamp != self.config_modified {
            info!(path = %self.config_path.display(), "config file changed");
            self.reload_config();
        }
    }

    /// Read the config file again and apply it
    ///
    /// A file that fails to load leaves the running config untouched.
    pub fn reload_config(&mut self) {
        self.config_modified = modified(&self.config_path);
        match Config::load_from(&self.config_path) {
            Ok(config) => self.apply_config(config),
            Err(e) => warn!("config reload failed, keeping current settings: {:#}", e),
        }
    }

    /// Switch to `config`, touching only what changed
    ///
    /// Edited reference heights are applied to the live desk. Any other
    /// change to the active desk reconnects it. `hotkeys.enabled` and
    /// telemetry settings take effect on the next start.
    pub fn apply_config(&mut self, config: Config) {
        let previous = std::mem::replace(&mut self.config, config);
        if previous == self.config {
            debug!("config unchanged");
            return;
        }

        if previous.general.launch_at_login != self.config.general.launch_at_login {
            if let Err(e) = login_item::set_enabled(self.config.general.launch_at_login) {
                error!("failed to update launch at login: {:#}", e);
            }
        }
        if previous.hotkeys.enabled != self.config.hotkeys.enabled
            || previous.telemetry != self.config.telemetry
        {
            warn!("hotkey enable and telemetry changes apply after restart");
        }

        let mut rebind = false;
        if previous.hotkeys != self.config.hotkeys {
            if let Some(hotkeys) = self.hotkeys.as_mut() {
                match Bindings::from_config(&self.config.hotkeys) {
                    Ok(bindings) if bindings != *hotkeys.bindings() => {
                        hotkeys.set_bindings(bindings);
                        rebind = true;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("keeping current hotkeys: {:#}", e),
                }
            }
        }

        match DeskChange::between(previous.active_desk(), self.config.active_desk()) {
            DeskChange::Rebuild => {
                info!("active desk changed in config");
                self.activate_desk();
                return;
            }
            DeskChange::Heights { sitting, standing } => {
                if let Some(controller) = self.controller.as_mut() {
                    info!(sitting, standing, "reference heights updated");
                    controller.set_reference_heights(sitting, standing);
                }
            }
            DeskChange::None => {}
        }

        if rebind {
            let preset_count = self.controller.as_ref().map_or(0, |c| c.presets().len());
            if let Some(hotkeys) = self.hotkeys.as_mut() {
                register_hotkeys(hotkeys, preset_count, &self.sender);
            }
        }
    }

    /// What the tray should show right now
    pub fn snapshot(&self) -> TraySnapshot {
        TraySnapshot::capture(&self.config, self.controller.as_ref())
    }
}
