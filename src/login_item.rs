use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// launchd label of the login agent
pub const AGENT_LABEL: &str = "io.standup.agent";

/// Render the LaunchAgent plist that starts `program` at login
#[must_use]
pub fn render_plist(program: &Path) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{AGENT_LABEL}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{}</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>ProcessType</key>
    <string>Interactive</string>
</dict>
</plist>
"#,
        xml_escape(&program.display().to_string())
    )
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn agents_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join("Library/LaunchAgents"))
}

/// Install or remove the login agent for the running executable
///
/// # Errors
/// Returns error if the agent file can't be written or removed
pub fn set_enabled(enabled: bool) -> Result<()> {
    let program = std::env::current_exe().context("failed to locate current executable")?;
    set_enabled_in(&agents_dir()?, &program, enabled)
}

/// Install or remove the agent plist inside `dir`
///
/// Removing an agent that isn't installed is not an error.
///
/// # Errors
/// Returns error if the agent file can't be written or removed
pub fn set_enabled_in(dir: &Path, program: &Path, enabled: bool) -> Result<()> {
    let path = dir.join(format!("{AGENT_LABEL}.plist"));

    if enabled {
        let contents = render_plist(program);
        if fs::read_to_string(&path).is_ok_and(|existing| existing == contents) {
            return Ok(());
        }
        fs::create_dir_all(dir).context("failed to create LaunchAgents directory")?;
        fs::write(&path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "launch at login enabled");
    } else if path.exists() {
        fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))?;
        tracing::info!("launch at login disabled");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("standup-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_render_plist() {
        let plist = render_plist(Path::new("/Applications/StandUp.app/Contents/MacOS/standup"));
        assert!(plist.contains("<string>io.standup.agent</string>"));
        assert!(plist.contains("<string>/Applications/StandUp.app/Contents/MacOS/standup</string>"));
        assert!(plist.contains("<key>RunAtLoad</key>\n    <true/>"));
    }

    #[test]
    fn test_render_plist_escapes_path() {
        let plist = render_plist(Path::new("/tmp/R&D <desk>/standup"));
        assert!(plist.contains("/tmp/R&amp;D &lt;desk&gt;/standup"));
    }

    #[test]
    fn test_enable_then_disable() {
        let dir = temp_dir("agent");
        let program = Path::new("/usr/local/bin/standup");
        let plist = dir.join("io.standup.agent.plist");

        set_enabled_in(&dir, program, true).unwrap();
        assert_eq!(fs::read_to_string(&plist).unwrap(), render_plist(program));

        // Idempotent
        set_enabled_in(&dir, program, true).unwrap();

        set_enabled_in(&dir, program, false).unwrap();
        assert!(!plist.exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_enable_rewrites_stale_path() {
        let dir = temp_dir("agent-stale");
        let plist = dir.join("io.standup.agent.plist");

        set_enabled_in(&dir, Path::new("/old/standup"), true).unwrap();
        set_enabled_in(&dir, Path::new("/new/standup"), true).unwrap();
        assert!(fs::read_to_string(&plist).unwrap().contains("/new/standup"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_disable_when_missing() {
        let dir = temp_dir("agent-missing");
        assert!(set_enabled_in(&dir, Path::new("/x"), false).is_ok());
        assert!(!dir.exists());
    }
}
