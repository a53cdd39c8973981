//! StandUp - global hotkeys and a menu bar for a Particle-connected standing desk
//!
//! This library exports core modules for testing and reuse.

/// Main-loop application state
pub mod app;
/// Configuration management
pub mod config;
/// Desk state machine, presets, and hotkey wiring
pub mod controller;
/// Desk model
pub mod desk;
/// Particle cloud client and event stream
pub mod device;
/// Global hotkeys
pub mod input;
/// Launch at login
pub mod login_item;
/// User notifications
pub mod notify;
/// Height presets
pub mod presets;
/// Logging setup
pub mod telemetry;
/// Menu bar icon and menu
pub mod tray;
