use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::DeskConfig;
use crate::desk::{ConnectionState, Desk, DeskEvent};
use crate::device::{DeviceRequest, StreamUpdate};
use crate::input::hotkey::{
    HotKeyBackend, HotKeyCenter, HotKeyError, HotKeyEvent, MAX_PRESET_HOTKEY,
};
use crate::notify::Notification;
use crate::presets::PresetList;

/// Everything the main loop reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    /// Step up to the next preset
    Raise,
    /// Step down to the next preset
    Lower,
    /// Move to the preset at a user-order index
    ActivatePreset(usize),
    /// Make another desk active
    SelectDesk(String),
    /// Flip launch-at-login
    ToggleLaunchAtLogin,
    /// Open the config file in the default editor
    OpenConfigFile,
    /// Re-read the config file
    ReloadConfig,
    /// News from a desk's event stream
    Stream {
        /// Desk the stream belongs to
        device_id: String,
        update: StreamUpdate,
    },
    /// Result of a height read
    HeightFetched {
        /// Desk that was read
        device_id: String,
        height: u32,
    },
    /// A move request failed
    MoveFailed {
        /// Desk that was asked to move
        device_id: String,
        /// Preset the move was for
        preset: Option<usize>,
        /// Error description
        reason: String,
    },
}

impl AppCommand {
    /// Desk a device report came from; `None` for user commands
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Stream { device_id, .. }
            | Self::HeightFetched { device_id, .. }
            | Self::MoveFailed { device_id, .. } => Some(device_id),
            _ => None,
        }
    }
}

/// What the main loop should do after a command
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reaction {
    /// Call to make on the device
    pub request: Option<DeviceRequest>,
    /// Notification to show
    pub notification: Option<Notification>,
}

impl Reaction {
    const fn request(request: DeviceRequest) -> Self {
        Self {
            request: Some(request),
            notification: None,
        }
    }
}

/// Desk state plus presets, driven by [`AppCommand`]s
///
/// Makes no I/O itself: device calls come back as [`Reaction::request`].
#[derive(Debug, Clone)]
pub struct DeskController {
    desk: Desk,
    presets: PresetList,
    target: Option<usize>,
}

impl DeskController {
    /// Wrap a desk and its presets
    #[must_use]
    pub const fn new(desk: Desk, presets: PresetList) -> Self {
        Self {
            desk,
            presets,
            target: None,
        }
    }

    /// Build from a config entry
    #[must_use]
    pub fn from_config(config: &DeskConfig) -> Self {
        Self::new(
            Desk::from_config(config),
            PresetList::new(config.presets.clone()),
        )
    }

    /// The desk model
    #[must_use]
    pub const fn desk(&self) -> &Desk {
        &self.desk
    }

    /// The desk's presets
    #[must_use]
    pub const fn presets(&self) -> &PresetList {
        &self.presets
    }

    /// Apply edited sit/stand heights without resetting the desk
    pub fn set_reference_heights(&mut self, sitting_height: u32, standing_height: u32) {
        self.desk.set_reference_heights(sitting_height, standing_height);
    }

    /// Preset a move is in flight to
    #[must_use]
    pub const fn target(&self) -> Option<usize> {
        self.target
    }

    /// React to a command
    ///
    /// Desk selection, login and config commands belong to the app and are
    /// ignored here, as are reports from any desk other than this one.
    pub fn handle(&mut self, command: AppCommand) -> Reaction {
        if let Some(device_id) = command.device_id() {
            if device_id != self.desk.device_id() {
                debug!(device_id, desk = %self.desk.device_id(), "report from another desk dropped");
                return Reaction::default();
            }
        }

        match command {
            AppCommand::Raise => self.raise(),
            AppCommand::Lower => self.lower(),
            AppCommand::ActivatePreset(index) => self.activate(index),
            AppCommand::Stream {
                update: StreamUpdate::Event(event),
                ..
            } => self.apply_event(event),
            AppCommand::Stream {
                update: StreamUpdate::Connection(state, error),
                ..
            } => {
                self.desk.set_connection(state, error);
                if state == ConnectionState::Open {
                    Reaction::request(DeviceRequest::GetHeight)
                } else {
                    Reaction::default()
                }
            }
            AppCommand::HeightFetched { height, .. } => {
                self.desk.update_height(height);
                Reaction::default()
            }
            AppCommand::MoveFailed { preset, reason, .. } => {
                warn!(desk = %self.desk.name(), "move failed: {}", reason);
                if preset.is_some() && preset == self.target {
                    self.target = None;
                }
                Reaction::default()
            }
            other => {
                debug!(command = ?other, "not a desk command");
                Reaction::default()
            }
        }
    }

    fn raise(&mut self) -> Reaction {
        if self.presets.is_empty() {
            return self.move_to_reference(self.desk.raise_target());
        }
        match self.presets.next_up(self.desk.height(), self.target) {
            Some(index) => self.activate(index),
            None => {
                debug!(height = ?self.desk.height(), "no preset above");
                Reaction::default()
            }
        }
    }

    fn lower(&mut self) -> Reaction {
        if self.presets.is_empty() {
            return self.move_to_reference(self.desk.lower_target());
        }
        match self.presets.next_down(self.desk.height(), self.target) {
            Some(index) => self.activate(index),
            None => {
                debug!(height = ?self.desk.height(), "no preset below");
                Reaction::default()
            }
        }
    }

    fn move_to_reference(&mut self, height: Option<u32>) -> Reaction {
        height.map_or_else(Reaction::default, |height| {
            self.target = None;
            Reaction::request(DeviceRequest::SetHeight {
                height,
                preset: None,
            })
        })
    }

    fn activate(&mut self, index: usize) -> Reaction {
        let Some(preset) = self.presets.get(index) else {
            warn!(index, "no such preset");
            return Reaction::default();
        };
        let height = preset.height;
        let display_name = self.presets.display_name(index);

        info!("Setting Desk \"{}\" to {} cm", self.desk.name(), height);

        self.target = Some(index);
        Reaction {
            request: Some(DeviceRequest::SetHeight {
                height,
                preset: Some(index),
            }),
            notification: Some(Notification::preset_start(
                self.desk.name(),
                &display_name,
                height,
                self.desk.height(),
            )),
        }
    }

    fn apply_event(&mut self, event: DeskEvent) -> Reaction {
        let refresh = self.desk.apply(event);
        if matches!(event, DeskEvent::TargetReached | DeskEvent::MoveTimeout) && self.target.is_some() {
            debug!("reached target");
            self.target = None;
        }
        if refresh {
            Reaction::request(DeviceRequest::GetHeight)
        } else {
            Reaction::default()
        }
    }
}

/// Bind the desk hotkeys to commands on `sender`
///
/// Clears previous bindings first. A desk without presets gets no hotkeys.
/// Combinations the OS refuses are logged and skipped; returns how many
/// were bound.
pub fn register_hotkeys<B: HotKeyBackend>(
    center: &mut HotKeyCenter<B>,
    preset_count: usize,
    sender: &UnboundedSender<AppCommand>,
) -> usize {
    center.unregister_all();
    if preset_count == 0 {
        debug!("no presets, hotkeys left unbound");
        return 0;
    }

    let send = |command: AppCommand| {
        let sender = sender.clone();
        move |_: &HotKeyEvent| {
            if sender.send(command.clone()).is_err() {
                warn!("command channel closed");
            }
        }
    };

    let mut bound = 0;
    let mut note = |result: Result<_, HotKeyError>| match result {
        Ok(_) => bound += 1,
        Err(e) => warn!("{}", e),
    };

    note(center.register_raise_hotkey(send(AppCommand::Raise)));
    note(center.register_lower_hotkey(send(AppCommand::Lower)));

    let preset_hotkeys = preset_count.min(usize::from(MAX_PRESET_HOTKEY));
    for index in 0..preset_hotkeys {
        let number = u32::try_from(index + 1).unwrap_or(u32::MAX);
        note(center.register_preset_hotkey(number, send(AppCommand::ActivatePreset(index))));
    }

    info!(bound, "desk hotkeys registered");
    bound
}
