use anyhow::Result;

/// A user-visible notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Headline, the desk name
    pub title: String,
    /// Message text
    pub body: String,
}

impl Notification {
    /// Announce a move to a preset
    ///
    /// An unknown current height counts as the bottom of the range.
    #[must_use]
    pub fn preset_start(
        desk_name: &str,
        preset_name: &str,
        preset_height: u32,
        current_height: Option<u32>,
    ) -> Self {
        let verb = if current_height.unwrap_or(0) <= preset_height {
            "Raising"
        } else {
            "Lowering"
        };
        Self {
            title: desk_name.to_owned(),
            body: format!("{verb} to {preset_name} position ({preset_height} cm)"),
        }
    }

    fn applescript(&self) -> String {
        format!(
            "display notification \"{}\" with title \"{}\"",
            escape(&self.body),
            escape(&self.title)
        )
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Show a notification through Notification Center
///
/// # Errors
/// Returns error if `osascript` can't be run or fails
#[cfg(target_os = "macos")]
pub fn deliver(notification: &Notification) -> Result<()> {
    use anyhow::Context;

    let status = std::process::Command::new("osascript")
        .arg("-e")
        .arg(notification.applescript())
        .status()
        .context("failed to run osascript")?;
    if !status.success() {
        anyhow::bail!("osascript exited with {status}");
    }
    Ok(())
}

/// Show a notification (logged only off macOS)
///
/// # Errors
/// Never fails on this platform
#[cfg(not(target_os = "macos"))]
#[allow(clippy::unnecessary_wraps)] // Same signature as the macOS version
pub fn deliver(notification: &Notification) -> Result<()> {
    tracing::info!(
        title = %notification.title,
        script = %notification.applescript(),
        "notification"
    );
    Ok(())
}
