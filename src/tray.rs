use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use std::collections::HashMap;
use tray_icon::menu::accelerator::{Accelerator, Code, Modifiers};
use tray_icon::menu::{CheckMenuItem, Menu, MenuItem, PredefinedMenuItem, Submenu};
use tray_icon::{Icon, TrayIconBuilder};

use crate::config::Config;
use crate::controller::{AppCommand, DeskController};
use crate::desk::StatusIcon;

const ICON_SIZE: u32 = 32;
const TOOLTIP: &str = "StandUp";

const ID_DESK_PREFIX: &str = "desk:";
const ID_PRESET_PREFIX: &str = "preset:";
const ID_RAISE: &str = "raise";
const ID_LOWER: &str = "lower";
const ID_LAUNCH_AT_LOGIN: &str = "launch_at_login";
const ID_OPEN_CONFIG: &str = "open_config";
const ID_RELOAD_CONFIG: &str = "reload_config";
const ID_ADD_DESK: &str = "add_desk";
const ID_ADD_PRESET: &str = "add_preset";

/// Commands triggered from the tray menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrayCommand {
    /// Switch to the desk with this device id
    SelectDesk(String),
    /// Move to a preset (user-order index)
    ActivatePreset(usize),
    /// Step up
    Raise,
    /// Step down
    Lower,
    /// Flip launch-at-login
    ToggleLaunchAtLogin,
    /// Open the config file (also used to add desks and presets)
    OpenConfigFile,
    /// Re-read the config file
    ReloadConfig,
    // Quit is a PredefinedMenuItem and never reaches the event channel
}

impl From<TrayCommand> for AppCommand {
    fn from(command: TrayCommand) -> Self {
        match command {
            TrayCommand::SelectDesk(id) => Self::SelectDesk(id),
            TrayCommand::ActivatePreset(index) => Self::ActivatePreset(index),
            TrayCommand::Raise => Self::Raise,
            TrayCommand::Lower => Self::Lower,
            TrayCommand::ToggleLaunchAtLogin => Self::ToggleLaunchAtLogin,
            TrayCommand::OpenConfigFile => Self::OpenConfigFile,
            TrayCommand::ReloadConfig => Self::ReloadConfig,
        }
    }
}

/// Everything the menu and icon show
///
/// The tray is rebuilt only when this changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraySnapshot {
    /// Icon to show
    pub icon: StatusIcon,
    /// Active desk name, `None` when no desk is configured
    pub desk_name: Option<String>,
    /// All configured desks as (device id, name)
    pub desks: Vec<(String, String)>,
    /// Device id of the active desk
    pub active_device: Option<String>,
    /// Connection status line
    pub status: String,
    /// State line, e.g. "Standing"
    pub state: String,
    /// Height line
    pub height: String,
    /// Preset display names with heights
    pub presets: Vec<String>,
    /// Launch-at-login checkbox
    pub launch_at_login: bool,
}

impl TraySnapshot {
    /// Capture the current config and desk state
    #[must_use]
    pub fn capture(config: &Config, controller: Option<&DeskController>) -> Self {
        let desks = config
            .desks
            .iter()
            .map(|desk| (desk.device_id.clone(), desk.name.clone()))
            .collect();

        let Some(controller) = controller else {
            return Self {
                icon: StatusIcon::Idle,
                desk_name: None,
                desks,
                active_device: None,
                status: "No desk configured".to_owned(),
                state: String::new(),
                height: String::new(),
                presets: Vec::new(),
                launch_at_login: config.general.launch_at_login,
            };
        };

        let desk = controller.desk();
        let presets = controller.presets();
        Self {
            icon: desk.status_icon(),
            desk_name: Some(desk.name().to_owned()),
            desks,
            active_device: Some(desk.device_id().to_owned()),
            status: desk.connection_status().to_owned(),
            state: desk.state_title().to_owned(),
            height: desk.height_label(),
            presets: presets
                .iter()
                .enumerate()
                .map(|(i, p)| format!("{} ({} cm)", presets.display_name(i), p.height))
                .collect(),
            launch_at_login: config.general.launch_at_login,
        }
    }
}

/// Owns the menu bar icon
pub struct TrayManager {
    tray: tray_icon::TrayIcon,
    snapshot: TraySnapshot,
    cached_icons: HashMap<StatusIcon, Icon>,
}

impl TrayManager {
    /// Create the tray icon and menu
    ///
    /// # Errors
    /// Returns error if the icon or menu can't be created
    pub fn new(snapshot: TraySnapshot) -> Result<Self> {
        let mut cached_icons = HashMap::new();
        for kind in [
            StatusIcon::Idle,
            StatusIcon::Busy,
            StatusIcon::Alert,
            StatusIcon::Up,
            StatusIcon::Down,
        ] {
            cached_icons.insert(kind, Self::load_icon(kind)?);
        }

        let tray = Self::build_tray(&snapshot, &cached_icons)?;

        Ok(Self {
            tray,
            snapshot,
            cached_icons,
        })
    }

    fn build_tray(
        snapshot: &TraySnapshot,
        cached_icons: &HashMap<StatusIcon, Icon>,
    ) -> Result<tray_icon::TrayIcon> {
        let icon = cached_icons
            .get(&snapshot.icon)
            .with_context(|| format!("icon {:?} not in cache", snapshot.icon))?
            .clone();
        let menu = Self::build_menu(snapshot)?;

        TrayIconBuilder::new()
            .with_menu(Box::new(menu))
            .with_tooltip(snapshot.desk_name.as_deref().unwrap_or(TOOLTIP))
            .with_icon(icon)
            .build()
            .context("failed to build tray icon")
    }

    fn load_icon(kind: StatusIcon) -> Result<Icon> {
        let image = render_icon(kind);
        let (width, height) = image.dimensions();
        Icon::from_rgba(image.into_raw(), width, height)
            .with_context(|| format!("failed to create {kind:?} icon"))
    }

    /// Rebuild the tray if anything visible changed
    ///
    /// # Errors
    /// Returns error if the new tray can't be built
    pub fn update_if_needed(&mut self, snapshot: TraySnapshot) -> Result<()> {
        if snapshot == self.snapshot {
            return Ok(());
        }

        if snapshot.icon == self.snapshot.icon {
            let menu = Self::build_menu(&snapshot)?;
            self.tray.set_menu(Some(Box::new(menu)));
        } else {
            tracing::debug!(
                "tray icon change: {:?} -> {:?}",
                self.snapshot.icon,
                snapshot.icon
            );
            // set_icon() doesn't repaint reliably on macOS, rebuild instead
            self.tray = Self::build_tray(&snapshot, &self.cached_icons)?;
        }

        self.snapshot = snapshot;
        Ok(())
    }

    fn build_menu(snapshot: &TraySnapshot) -> Result<Menu> {
        let menu = Menu::new();

        let Some(desk_name) = &snapshot.desk_name else {
            menu.append(&MenuItem::new(&snapshot.status, false, None))
                .context("failed to append status item")?;
            menu.append(&MenuItem::with_id(ID_ADD_DESK, "Add Desk...", true, None))
                .context("failed to append add desk item")?;
            Self::append_footer(&menu, snapshot)?;
            return Ok(menu);
        };

        if snapshot.desks.len() > 1 {
            let desks = Submenu::new(desk_name, true);
            for (device_id, name) in &snapshot.desks {
                let selected = snapshot.active_device.as_deref() == Some(device_id.as_str());
                let item = CheckMenuItem::with_id(
                    format!("{ID_DESK_PREFIX}{device_id}"),
                    name,
                    true,
                    selected,
                    None,
                );
                desks.append(&item).context("failed to append desk item")?;
            }
            menu.append(&desks).context("failed to append desk submenu")?;
        } else {
            menu.append(&MenuItem::new(desk_name, false, None))
                .context("failed to append desk item")?;
        }
        menu.append(&PredefinedMenuItem::separator())
            .context("failed to append separator")?;

        for line in [&snapshot.status, &snapshot.state, &snapshot.height] {
            menu.append(&MenuItem::new(line, false, None))
                .context("failed to append status item")?;
        }
        menu.append(&PredefinedMenuItem::separator())
            .context("failed to append separator")?;

        menu.append(&MenuItem::new("Presets:", false, None))
            .context("failed to append presets header")?;
        if snapshot.presets.is_empty() {
            menu.append(&MenuItem::with_id(ID_ADD_PRESET, "Add a Preset...", true, None))
                .context("failed to append add preset item")?;
        }
        for (index, label) in snapshot.presets.iter().enumerate() {
            let item = MenuItem::with_id(
                format!("{ID_PRESET_PREFIX}{index}"),
                label,
                true,
                preset_accelerator(index),
            );
            menu.append(&item).context("failed to append preset item")?;
        }

        menu.append(&PredefinedMenuItem::separator())
            .context("failed to append separator")?;
        menu.append(&MenuItem::with_id(ID_RAISE, "Raise", true, None))
            .context("failed to append raise item")?;
        menu.append(&MenuItem::with_id(ID_LOWER, "Lower", true, None))
            .context("failed to append lower item")?;

        Self::append_footer(&menu, snapshot)?;
        Ok(menu)
    }

    fn append_footer(menu: &Menu, snapshot: &TraySnapshot) -> Result<()> {
        menu.append(&PredefinedMenuItem::separator())
            .context("failed to append separator")?;

        let login = CheckMenuItem::with_id(
            ID_LAUNCH_AT_LOGIN,
            "Launch at Login",
            true,
            snapshot.launch_at_login,
            None,
        );
        menu.append(&login)
            .context("failed to append launch at login item")?;

        menu.append(&MenuItem::with_id(ID_OPEN_CONFIG, "Open Config File", true, None))
            .context("failed to append open config item")?;
        menu.append(&MenuItem::with_id(ID_RELOAD_CONFIG, "Reload Config", true, None))
            .context("failed to append reload config item")?;

        menu.append(&PredefinedMenuItem::quit(None))
            .context("failed to append quit item")?;
        Ok(())
    }

    /// Next menu command, if any
    pub fn poll_events() -> Option<TrayCommand> {
        use tray_icon::menu::MenuEvent;

        if let Ok(event) = MenuEvent::receiver().try_recv() {
            let id = event.id.0.as_str();
            tracing::debug!("tray menu event received: id={:?}", id);
            return parse_menu_event(id);
        }

        None
    }
}

/// Map a menu item id to its command
#[must_use]
pub fn parse_menu_event(id: &str) -> Option<TrayCommand> {
    if let Some(device_id) = id.strip_prefix(ID_DESK_PREFIX) {
        return Some(TrayCommand::SelectDesk(device_id.to_owned()));
    }
    if let Some(index) = id.strip_prefix(ID_PRESET_PREFIX) {
        return index.parse().ok().map(TrayCommand::ActivatePreset);
    }

    match id {
        ID_RAISE => Some(TrayCommand::Raise),
        ID_LOWER => Some(TrayCommand::Lower),
        ID_LAUNCH_AT_LOGIN => Some(TrayCommand::ToggleLaunchAtLogin),
        ID_OPEN_CONFIG | ID_ADD_DESK | ID_ADD_PRESET => Some(TrayCommand::OpenConfigFile),
        ID_RELOAD_CONFIG => Some(TrayCommand::ReloadConfig),
        _ => None,
    }
}

/// Control+Shift+digit for the first nine presets
fn preset_accelerator(index: usize) -> Option<Accelerator> {
    let code = match index {
        0 => Code::Digit1,
        1 => Code::Digit2,
        2 => Code::Digit3,
        3 => Code::Digit4,
        4 => Code::Digit5,
        5 => Code::Digit6,
        6 => Code::Digit7,
        7 => Code::Digit8,
        8 => Code::Digit9,
        _ => return None,
    };
    Some(Accelerator::new(
        Some(Modifiers::CONTROL | Modifiers::SHIFT),
        code,
    ))
}

/// Draw the menu bar glyph: a desk, plus an arrow while moving
#[must_use]
pub fn render_icon(kind: StatusIcon) -> RgbaImage {
    let color = match kind {
        StatusIcon::Idle | StatusIcon::Up | StatusIcon::Down => Rgba([0, 0, 0, 255]),
        StatusIcon::Busy => Rgba([0, 0, 0, 110]),
        StatusIcon::Alert => Rgba([214, 48, 49, 255]),
    };
    let mut image = RgbaImage::new(ICON_SIZE, ICON_SIZE);

    // Desk top and legs
    fill(&mut image, 3..29, 15..19, color);
    fill(&mut image, 6..9, 19..30, color);
    fill(&mut image, 23..26, 19..30, color);

    match kind {
        StatusIcon::Up => arrow(&mut image, true, color),
        StatusIcon::Down => arrow(&mut image, false, color),
        StatusIcon::Alert => {
            fill(&mut image, 15..17, 2..9, color);
            fill(&mut image, 15..17, 10..12, color);
        }
        StatusIcon::Idle | StatusIcon::Busy => {}
    }
    image
}

fn fill(
    image: &mut RgbaImage,
    xs: std::ops::Range<u32>,
    ys: std::ops::Range<u32>,
    color: Rgba<u8>,
) {
    for y in ys {
        for x in xs.clone() {
            image.put_pixel(x, y, color);
        }
    }
}

/// Arrow in rows 2..13 centred above the desk
fn arrow(image: &mut RgbaImage, up: bool, color: Rgba<u8>) {
    const CENTER: u32 = ICON_SIZE / 2;
    for row in 0..6u32 {
        let y = if up { 3 + row } else { 12 - row };
        fill(image, CENTER - row - 1..CENTER + row + 1, y..y + 1, color);
    }
    // Shaft
    let shaft = if up { 9..13 } else { 2..6 };
    fill(image, CENTER - 1..CENTER + 1, shaft, color);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeskConfig;
    use crate::desk::{ConnectionState, DeskEvent};
    use crate::device::StreamUpdate;
    use crate::presets::Preset;

    fn desk_config(device_id: &str, name: &str) -> DeskConfig {
        DeskConfig {
            name: name.to_owned(),
            device_id: device_id.to_owned(),
            access_token: "token".to_owned(),
            sitting_height: 60,
            standing_height: 100,
            presets: vec![
                Preset::new(Some("Sitting"), 62),
                Preset::new(None, 104),
            ],
        }
    }

    fn stream(update: StreamUpdate) -> AppCommand {
        AppCommand::Stream {
            device_id: "dev1".to_owned(),
            update,
        }
    }

    fn config() -> Config {
        let mut config: Config = toml::from_str(crate::config::DEFAULT_CONFIG).unwrap();
        config.desks = vec![desk_config("dev1", "Office"), desk_config("dev2", "Home")];
        config
    }

    #[test]
    fn test_parse_menu_event_desk() {
        assert_eq!(
            parse_menu_event("desk:e00fce68"),
            Some(TrayCommand::SelectDesk("e00fce68".to_owned()))
        );
    }

    #[test]
    fn test_parse_menu_event_preset() {
        assert_eq!(
            parse_menu_event("preset:3"),
            Some(TrayCommand::ActivatePreset(3))
        );
        assert_eq!(parse_menu_event("preset:x"), None);
    }

    #[test]
    fn test_parse_menu_event_actions() {
        assert_eq!(parse_menu_event("raise"), Some(TrayCommand::Raise));
        assert_eq!(parse_menu_event("lower"), Some(TrayCommand::Lower));
        assert_eq!(
            parse_menu_event("launch_at_login"),
            Some(TrayCommand::ToggleLaunchAtLogin)
        );
        assert_eq!(
            parse_menu_event("open_config"),
            Some(TrayCommand::OpenConfigFile)
        );
        assert_eq!(
            parse_menu_event("add_desk"),
            Some(TrayCommand::OpenConfigFile)
        );
        assert_eq!(
            parse_menu_event("add_preset"),
            Some(TrayCommand::OpenConfigFile)
        );
        assert_eq!(
            parse_menu_event("reload_config"),
            Some(TrayCommand::ReloadConfig)
        );
    }

    #[test]
    fn test_parse_menu_event_unknown() {
        assert_eq!(parse_menu_event("Quit"), None);
        assert_eq!(parse_menu_event(""), None);
    }

    #[test]
    fn test_tray_command_into_app_command() {
        assert_eq!(
            AppCommand::from(TrayCommand::ActivatePreset(1)),
            AppCommand::ActivatePreset(1)
        );
        assert_eq!(
            AppCommand::from(TrayCommand::SelectDesk("d".to_owned())),
            AppCommand::SelectDesk("d".to_owned())
        );
        assert_eq!(
            AppCommand::from(TrayCommand::ReloadConfig),
            AppCommand::ReloadConfig
        );
    }

    #[test]
    fn test_preset_accelerator_limits() {
        assert!(preset_accelerator(0).is_some());
        assert!(preset_accelerator(8).is_some());
        assert!(preset_accelerator(9).is_none());
    }

    #[test]
    fn test_snapshot_without_desk() {
        let mut config = config();
        config.desks.clear();
        let snapshot = TraySnapshot::capture(&config, None);
        assert_eq!(snapshot.desk_name, None);
        assert_eq!(snapshot.icon, StatusIcon::Idle);
        assert!(snapshot.presets.is_empty());
        assert!(snapshot.launch_at_login);
    }

    #[test]
    fn test_snapshot_with_desk() {
        let config = config();
        let mut controller = DeskController::from_config(&config.desks[0]);
        controller.handle(stream(StreamUpdate::Connection(ConnectionState::Open, None)));
        controller.handle(AppCommand::HeightFetched {
            device_id: "dev1".to_owned(),
            height: 103,
        });

        let snapshot = TraySnapshot::capture(&config, Some(&controller));
        assert_eq!(snapshot.desk_name.as_deref(), Some("Office"));
        assert_eq!(snapshot.active_device.as_deref(), Some("dev1"));
        assert_eq!(snapshot.desks.len(), 2);
        assert_eq!(snapshot.status, "Connected");
        assert_eq!(snapshot.state, "Standing");
        assert_eq!(snapshot.height, "Height: 103 cm");
        assert_eq!(
            snapshot.presets,
            vec!["Sitting (62 cm)".to_owned(), "Preset #2 (104 cm)".to_owned()]
        );
        assert_eq!(snapshot.icon, StatusIcon::Idle);
    }

    #[test]
    fn test_snapshot_changes_with_movement() {
        let config = config();
        let mut controller = DeskController::from_config(&config.desks[0]);
        controller.handle(stream(StreamUpdate::Connection(ConnectionState::Open, None)));
        let before = TraySnapshot::capture(&config, Some(&controller));

        controller.handle(stream(StreamUpdate::Event(DeskEvent::MovingUp)));
        let after = TraySnapshot::capture(&config, Some(&controller));

        assert_ne!(before, after);
        assert_eq!(after.icon, StatusIcon::Up);
        assert_eq!(after.state, "Raising...");
    }

    #[test]
    fn test_render_icon_dimensions() {
        for kind in [
            StatusIcon::Idle,
            StatusIcon::Busy,
            StatusIcon::Alert,
            StatusIcon::Up,
            StatusIcon::Down,
        ] {
            let image = render_icon(kind);
            assert_eq!(image.dimensions(), (ICON_SIZE, ICON_SIZE));
            // Desk top is always drawn
            assert_ne!(image.get_pixel(16, 16)[3], 0);
        }
    }

    #[test]
    fn test_render_icon_arrows_differ() {
        let up = render_icon(StatusIcon::Up);
        let down = render_icon(StatusIcon::Down);
        let idle = render_icon(StatusIcon::Idle);

        // Widest row sits at the base of each arrowhead
        assert_ne!(up.get_pixel(10, 8)[3], 0);
        assert_eq!(down.get_pixel(10, 8)[3], 0);
        assert_ne!(down.get_pixel(10, 7)[3], 0);
        assert_eq!(up.get_pixel(10, 7)[3], 0);
        assert_eq!(idle.get_pixel(16, 5)[3], 0);
    }

    #[test]
    fn test_render_icon_alert_is_red() {
        let image = render_icon(StatusIcon::Alert);
        assert_eq!(*image.get_pixel(16, 16), Rgba([214, 48, 49, 255]));
    }

    #[test]
    #[ignore = "Requires main thread for macOS menu creation"]
    fn test_build_tray() {
        let config = config();
        let controller = DeskController::from_config(&config.desks[0]);
        let mut tray = TrayManager::new(TraySnapshot::capture(&config, Some(&controller))).unwrap();
        tray.update_if_needed(TraySnapshot::capture(&config, None))
            .unwrap();
    }
}
