/// Global hotkey registration
pub mod hotkey;

pub use hotkey::{
    Bindings, HotKeyBackend, HotKeyCallback, HotKeyCenter, HotKeyError, HotKeyEvent, HotKeyHandle,
    HotKeyRole,
};
