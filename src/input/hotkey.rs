use anyhow::{anyhow, Context, Result};
use global_hotkey::{
    hotkey::{Code, HotKey, Modifiers},
    GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState,
};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{HotkeyConfig, KeyComboConfig};

/// Highest preset reachable with a digit key
pub const MAX_PRESET_HOTKEY: u8 = 9;

/// What a registered combination is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HotKeyRole {
    /// Move the desk up
    Raise,
    /// Move the desk down
    Lower,
    /// Jump to preset n (1-based)
    Preset(u8),
}

impl fmt::Display for HotKeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raise => f.write_str("raise"),
            Self::Lower => f.write_str("lower"),
            Self::Preset(n) => write!(f, "preset {n}"),
        }
    }
}

/// The input event handed to a hotkey callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotKeyEvent {
    /// OS hotkey id
    pub id: u32,
    /// Role the combination was registered for
    pub role: HotKeyRole,
    /// Combination in display form, e.g. `Shift+Command+ArrowUp`
    pub combination: String,
    /// Key state that triggered the callback
    pub state: HotKeyState,
}

/// Callback invoked on the thread that calls [`HotKeyCenter::handle_event`]
pub type HotKeyCallback = Box<dyn Fn(&HotKeyEvent) + Send + Sync + 'static>;

/// Opaque token for an active registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HotKeyHandle {
    id: u32,
    role: HotKeyRole,
}

impl HotKeyHandle {
    /// Role of the registration
    #[must_use]
    pub const fn role(&self) -> HotKeyRole {
        self.role
    }
}

/// Hotkey registration errors
#[derive(Debug, Error)]
pub enum HotKeyError {
    /// Preset numbers map to digit keys 1-9
    #[error("preset {0} has no hotkey (valid presets are 1-{MAX_PRESET_HOTKEY})")]
    InvalidPreset(u32),

    /// The OS refused the combination
    #[error("failed to register {role} hotkey {combination}")]
    Register {
        /// Role being registered
        role: HotKeyRole,
        /// Combination in display form
        combination: String,
        /// Underlying error
        source: anyhow::Error,
    },

    /// The handle was already unregistered
    #[error("hotkey {0} is not registered")]
    NotRegistered(u32),
}

/// OS side of hotkey registration
///
/// Production code uses [`GlobalHotKeyManager`]; tests use `MockHotKeyBackend`.
#[cfg_attr(test, mockall::automock)]
pub trait HotKeyBackend {
    /// Claim a combination system-wide
    ///
    /// # Errors
    /// Returns error if the OS refuses the combination
    fn register(&self, hotkey: HotKey) -> Result<()>;

    /// Release a combination
    ///
    /// # Errors
    /// Returns error if the OS refuses to release it
    fn unregister(&self, hotkey: HotKey) -> Result<()>;
}

impl HotKeyBackend for GlobalHotKeyManager {
    fn register(&self, hotkey: HotKey) -> Result<()> {
        Self::register(self, hotkey).map_err(|e| anyhow!("{e}"))
    }

    fn unregister(&self, hotkey: HotKey) -> Result<()> {
        Self::unregister(self, hotkey).map_err(|e| anyhow!("{e}"))
    }
}

/// Parsed combinations the center hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bindings {
    /// Raise combination
    pub raise: HotKey,
    /// Lower combination
    pub lower: HotKey,
    /// Modifiers for the preset digit keys
    pub preset_modifiers: Modifiers,
}

impl Bindings {
    /// Parse bindings from config
    ///
    /// # Errors
    /// Returns error on unknown modifier or key names
    pub fn from_config(config: &HotkeyConfig) -> Result<Self> {
        Ok(Self {
            raise: parse_combo(&config.raise).context("invalid raise hotkey")?,
            lower: parse_combo(&config.lower).context("invalid lower hotkey")?,
            preset_modifiers: parse_modifiers(&config.preset_modifiers)
                .context("invalid preset hotkey modifiers")?,
        })
    }

    fn hotkey_for(&self, role: HotKeyRole) -> Result<HotKey, HotKeyError> {
        match role {
            HotKeyRole::Raise => Ok(self.raise),
            HotKeyRole::Lower => Ok(self.lower),
            HotKeyRole::Preset(n) => {
                let code = digit_code(n).ok_or(HotKeyError::InvalidPreset(u32::from(n)))?;
                Ok(HotKey::new(Some(self.preset_modifiers), code))
            }
        }
    }
}

impl Default for Bindings {
    fn default() -> Self {
        Self {
            raise: HotKey::new(Some(Modifiers::SUPER | Modifiers::SHIFT), Code::ArrowUp),
            lower: HotKey::new(Some(Modifiers::SUPER | Modifiers::SHIFT), Code::ArrowDown),
            preset_modifiers: Modifiers::CONTROL | Modifiers::SHIFT,
        }
    }
}

struct Registration {
    hotkey: HotKey,
    role: HotKeyRole,
    callback: HotKeyCallback,
}

/// Binds callbacks to the raise, lower, and preset combinations
pub struct HotKeyCenter<B: HotKeyBackend = GlobalHotKeyManager> {
    backend: B,
    bindings: Bindings,
    registrations: HashMap<u32, Registration>,
}

impl HotKeyCenter<GlobalHotKeyManager> {
    /// Create the OS hotkey manager and parse combinations from config
    ///
    /// # Errors
    /// Returns error if the OS manager can't be created or the config is invalid
    pub fn new(config: &HotkeyConfig) -> Result<Self> {
        let bindings = Bindings::from_config(config)?;
        let manager = GlobalHotKeyManager::new().context("failed to create hotkey manager")?;
        Ok(Self::with_backend(manager, bindings))
    }
}

impl<B: HotKeyBackend> HotKeyCenter<B> {
    /// Create a center on top of any backend
    pub fn with_backend(backend: B, bindings: Bindings) -> Self {
        Self {
            backend,
            bindings,
            registrations: HashMap::new(),
        }
    }

    /// Bind `callback` to the raise combination
    ///
    /// # Errors
    /// Returns error if the OS refuses the combination
    pub fn register_raise_hotkey<F>(&mut self, callback: F) -> Result<HotKeyHandle, HotKeyError>
    where
        F: Fn(&HotKeyEvent) + Send + Sync + 'static,
    {
        self.register(HotKeyRole::Raise, Box::new(callback))
    }

    /// Bind `callback` to the lower combination
    ///
    /// # Errors
    /// Returns error if the OS refuses the combination
    pub fn register_lower_hotkey<F>(&mut self, callback: F) -> Result<HotKeyHandle, HotKeyError>
    where
        F: Fn(&HotKeyEvent) + Send + Sync + 'static,
    {
        self.register(HotKeyRole::Lower, Box::new(callback))
    }

    /// Bind `callback` to the combination for preset `preset_number` (1-9)
    ///
    /// # Errors
    /// Returns [`HotKeyError::InvalidPreset`] outside 1-9, or an error if the
    /// OS refuses the combination
    pub fn register_preset_hotkey<F>(
        &mut self,
        preset_number: u32,
        callback: F,
    ) -> Result<HotKeyHandle, HotKeyError>
    where
        F: Fn(&HotKeyEvent) + Send + Sync + 'static,
    {
        let number = u8::try_from(preset_number)
            .ok()
            .filter(|n| (1..=MAX_PRESET_HOTKEY).contains(n))
            .ok_or(HotKeyError::InvalidPreset(preset_number))?;
        self.register(HotKeyRole::Preset(number), Box::new(callback))
    }

    fn register(
        &mut self,
        role: HotKeyRole,
        callback: HotKeyCallback,
    ) -> Result<HotKeyHandle, HotKeyError> {
        let hotkey = self.bindings.hotkey_for(role)?;

        // A role holds at most one binding
        let previous = self
            .registrations
            .iter()
            .find(|(_, registration)| registration.role == role)
            .map(|(&id, _)| id);
        if let Some(id) = previous {
            debug!(%role, "replacing existing hotkey");
            self.release(id);
        }

        self.backend
            .register(hotkey)
            .map_err(|source| HotKeyError::Register {
                role,
                combination: describe(&hotkey),
                source,
            })?;

        info!(%role, combination = %describe(&hotkey), "registered hotkey");

        let id = hotkey.id();
        self.registrations.insert(
            id,
            Registration {
                hotkey,
                role,
                callback,
            },
        );
        Ok(HotKeyHandle { id, role })
    }

    /// Remove one binding
    ///
    /// # Errors
    /// Returns [`HotKeyError::NotRegistered`] if the handle is stale
    pub fn unregister(&mut self, handle: HotKeyHandle) -> Result<(), HotKeyError> {
        if self.registrations.contains_key(&handle.id) {
            self.release(handle.id);
            Ok(())
        } else {
            Err(HotKeyError::NotRegistered(handle.id))
        }
    }

    /// Combinations in use
    #[must_use]
    pub const fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Switch to new combinations
    ///
    /// Current bindings are released; register again to bind the new ones.
    pub fn set_bindings(&mut self, bindings: Bindings) {
        self.unregister_all();
        self.bindings = bindings;
    }

    /// Remove every binding this center holds
    pub fn unregister_all(&mut self) {
        let ids: Vec<u32> = self.registrations.keys().copied().collect();
        for id in ids {
            self.release(id);
        }
    }

    fn release(&mut self, id: u32) {
        if let Some(registration) = self.registrations.remove(&id) {
            if let Err(e) = self.backend.unregister(registration.hotkey) {
                tracing::error!(role = %registration.role, "failed to unregister hotkey: {}", e);
            }
        }
    }

    /// Number of active bindings
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// True when nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Process a hotkey event from the global event channel
    ///
    /// Returns true if the id belongs to this center.
    pub fn handle_event(&self, event: GlobalHotKeyEvent) -> bool {
        self.dispatch(event.id, event.state)
    }

    /// Invoke the callback for `id` on a key press
    pub fn dispatch(&self, id: u32, state: HotKeyState) -> bool {
        let Some(registration) = self.registrations.get(&id) else {
            return false;
        };

        match state {
            HotKeyState::Pressed => {
                debug!(role = %registration.role, "hotkey pressed");
                let event = HotKeyEvent {
                    id,
                    role: registration.role,
                    combination: describe(&registration.hotkey),
                    state,
                };
                (registration.callback)(&event);
            }
            HotKeyState::Released => {
                debug!(role = %registration.role, "hotkey released (ignored)");
            }
        }
        true
    }
}

impl<B: HotKeyBackend> Drop for HotKeyCenter<B> {
    fn drop(&mut self) {
        if !self.registrations.is_empty() {
            debug!(count = self.registrations.len(), "releasing hotkeys");
        }
        self.unregister_all();
    }
}

/// Human readable form of a combination, e.g. `Shift+Command+ArrowUp`
#[must_use]
pub fn describe(hotkey: &HotKey) -> String {
    let mut parts: Vec<String> = [
        (Modifiers::CONTROL, "Control"),
        (Modifiers::ALT, "Option"),
        (Modifiers::SHIFT, "Shift"),
        (Modifiers::SUPER, "Command"),
    ]
    .into_iter()
    .filter(|(flag, _)| hotkey.mods.contains(*flag))
    .map(|(_, name)| name.to_owned())
    .collect();
    parts.push(format!("{:?}", hotkey.key));
    parts.join("+")
}

fn parse_combo(combo: &KeyComboConfig) -> Result<HotKey> {
    let modifiers = parse_modifiers(&combo.modifiers)?;
    let code = parse_key(&combo.key)?;
    Ok(HotKey::new(Some(modifiers), code))
}

fn parse_modifiers(modifiers: &[String]) -> Result<Modifiers> {
    let mut result = Modifiers::empty();
    for modifier in modifiers {
        match modifier.as_str() {
            "Control" | "Ctrl" => result |= Modifiers::CONTROL,
            "Option" | "Alt" => result |= Modifiers::ALT,
            "Command" | "Cmd" | "Super" => result |= Modifiers::SUPER,
            "Shift" => result |= Modifiers::SHIFT,
            _ => return Err(anyhow!("unknown modifier: {}", modifier)),
        }
    }
    Ok(result)
}

const fn digit_code(digit: u8) -> Option<Code> {
    match digit {
        0 => Some(Code::Digit0),
        1 => Some(Code::Digit1),
        2 => Some(Code::Digit2),
        3 => Some(Code::Digit3),
        4 => Some(Code::Digit4),
        5 => Some(Code::Digit5),
        6 => Some(Code::Digit6),
        7 => Some(Code::Digit7),
        8 => Some(Code::Digit8),
        9 => Some(Code::Digit9),
        _ => None,
    }
}

fn parse_key(key: &str) -> Result<Code> {
    if let [digit @ b'0'..=b'9'] = key.as_bytes() {
        return digit_code(digit - b'0').ok_or_else(|| anyhow!("unsupported key: {}", key));
    }

    match key {
        "Up" => Ok(Code::ArrowUp),
        "Down" => Ok(Code::ArrowDown),
        "Left" => Ok(Code::ArrowLeft),
        "Right" => Ok(Code::ArrowRight),
        "Space" => Ok(Code::Space),
        "A" => Ok(Code::KeyA),
        "B" => Ok(Code::KeyB),
        "C" => Ok(Code::KeyC),
        "D" => Ok(Code::KeyD),
        "E" => Ok(Code::KeyE),
        "F" => Ok(Code::KeyF),
        "G" => Ok(Code::KeyG),
        "H" => Ok(Code::KeyH),
        "I" => Ok(Code::KeyI),
        "J" => Ok(Code::KeyJ),
        "K" => Ok(Code::KeyK),
        "L" => Ok(Code::KeyL),
        "M" => Ok(Code::KeyM),
        "N" => Ok(Code::KeyN),
        "O" => Ok(Code::KeyO),
        "P" => Ok(Code::KeyP),
        "Q" => Ok(Code::KeyQ),
        "R" => Ok(Code::KeyR),
        "S" => Ok(Code::KeyS),
        "T" => Ok(Code::KeyT),
        "U" => Ok(Code::KeyU),
        "V" => Ok(Code::KeyV),
        "W" => Ok(Code::KeyW),
        "X" => Ok(Code::KeyX),
        "Y" => Ok(Code::KeyY),
        "Z" => Ok(Code::KeyZ),
        _ => Err(anyhow!("unsupported key: {}", key)),
    }
}
