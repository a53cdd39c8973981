use tracing::{debug, info};

use crate::config::DeskConfig;

/// Sit/stand state derived from desk movement and height
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeskState {
    /// At or below the sit/stand midpoint
    Lowered,
    /// Moving down
    Lowering,
    /// Above the sit/stand midpoint
    Raised,
    /// Moving up
    Raising,
}

impl DeskState {
    /// Menu title for the state
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Lowered => "Sitting",
            Self::Lowering => "Lowering...",
            Self::Raising => "Raising...",
            Self::Raised => "Standing",
        }
    }
}

/// Motor direction reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Not moving
    #[default]
    Stopped,
    /// Moving up
    Up,
    /// Moving down
    Down,
}

/// State of the event stream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No stream
    #[default]
    Closed,
    /// Stream is being opened
    Connecting,
    /// Stream is receiving events
    Open,
}

/// Why the event stream closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The network is unreachable
    Offline,
    /// Anything else, with a description
    Other(String),
}

/// Events published by the desk controller firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeskEvent {
    /// Motor started moving down
    MovingDown,
    /// Motor started moving up
    MovingUp,
    /// Requested height reached
    TargetReached,
    /// Current height in cm
    Height(u32),
    /// Move aborted after the firmware timeout
    MoveTimeout,
    /// Cloud presence of the device changed
    Online(bool),
}

impl DeskEvent {
    /// Decode a cloud event by name and payload
    ///
    /// Returns `None` for events the desk doesn't care about and for
    /// payloads that don't parse.
    #[must_use]
    pub fn parse(name: &str, data: &str) -> Option<Self> {
        match name {
            "movingdown" => Some(Self::MovingDown),
            "movingup" => Some(Self::MovingUp),
            "targetreached" => Some(Self::TargetReached),
            "movetimeout" => Some(Self::MoveTimeout),
            "height" => data.trim().parse().ok().map(Self::Height),
            "spark/status" => match data.trim() {
                "online" => Some(Self::Online(true)),
                "offline" => Some(Self::Online(false)),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Which tray icon reflects the desk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusIcon {
    /// Connected and still
    Idle,
    /// Connecting
    Busy,
    /// Disconnected or device offline
    Alert,
    /// Moving up
    Up,
    /// Moving down
    Down,
}

/// Live model of one desk
#[derive(Debug, Clone)]
pub struct Desk {
    device_id: String,
    name: String,
    sitting_height: u32,
    standing_height: u32,
    height: Option<u32>,
    state: Option<DeskState>,
    direction: Direction,
    connection: ConnectionState,
    connection_error: Option<ConnectionError>,
    online: bool,
}

impl Desk {
    /// Create a desk with unknown height and a closed connection
    #[must_use]
    pub fn new(device_id: &str, name: &str, sitting_height: u32, standing_height: u32) -> Self {
        Self {
            device_id: device_id.to_owned(),
            name: name.to_owned(),
            sitting_height,
            standing_height,
            height: None,
            state: None,
            direction: Direction::Stopped,
            connection: ConnectionState::Closed,
            connection_error: None,
            online: false,
        }
    }

    /// Create a desk from its config entry
    #[must_use]
    pub fn from_config(config: &DeskConfig) -> Self {
        Self::new(
            &config.device_id,
            &config.name,
            config.sitting_height,
            config.standing_height,
        )
    }

    /// Particle device id
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Display name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last known height in cm
    #[must_use]
    pub const fn height(&self) -> Option<u32> {
        self.height
    }

    /// Sit/stand state, unknown until the first height or movement
    #[must_use]
    pub const fn state(&self) -> Option<DeskState> {
        self.state
    }

    /// Motor direction
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Event stream connection state
    #[must_use]
    pub const fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Whether the cloud reports the device as online
    #[must_use]
    pub const fn is_online(&self) -> bool {
        self.online
    }

    /// Apply a controller event
    ///
    /// Returns true when the height should be re-read from the device.
    pub fn apply(&mut self, event: DeskEvent) -> bool {
        debug!(desk = %self.name, ?event, "desk event");
        match event {
            DeskEvent::MovingDown => {
                self.state = Some(DeskState::Lowering);
                self.direction = Direction::Down;
                false
            }
            DeskEvent::MovingUp => {
                self.state = Some(DeskState::Raising);
                self.direction = Direction::Up;
                false
            }
            DeskEvent::TargetReached => {
                self.direction = Direction::Stopped;
                match self.state {
                    Some(DeskState::Lowering) => self.state = Some(DeskState::Lowered),
                    Some(DeskState::Raising) => self.state = Some(DeskState::Raised),
                    _ => {}
                }
                true
            }
            DeskEvent::Height(height) => {
                self.height = Some(height);
                false
            }
            DeskEvent::MoveTimeout => {
                info!(desk = %self.name, "move timed out");
                self.direction = Direction::Stopped;
                true
            }
            DeskEvent::Online(online) => {
                self.online = online;
                false
            }
        }
    }

    /// Record a height read from the device and re-derive the state
    pub fn update_height(&mut self, height: u32) {
        self.height = Some(height);
        self.state = Some(self.state_for_height(height));
    }

    /// Change the sit/stand reference heights
    pub fn set_reference_heights(&mut self, sitting_height: u32, standing_height: u32) {
        if sitting_height == self.sitting_height && standing_height == self.standing_height {
            return;
        }
        self.sitting_height = sitting_height;
        self.standing_height = standing_height;
        if let Some(height) = self.height {
            self.state = Some(self.state_for_height(height));
        }
    }

    /// Record a connection change
    pub fn set_connection(&mut self, connection: ConnectionState, error: Option<ConnectionError>) {
        if connection == ConnectionState::Open {
            self.online = true;
        }
        self.connection = connection;
        self.connection_error = error;
    }

    fn state_for_height(&self, height: u32) -> DeskState {
        let midpoint = if self.standing_height >= self.sitting_height {
            self.sitting_height + (self.standing_height - self.sitting_height) / 2
        } else {
            self.standing_height + (self.sitting_height - self.standing_height) / 2
        };
        if height <= midpoint {
            DeskState::Lowered
        } else {
            DeskState::Raised
        }
    }

    /// Standing height, unless the desk is already up
    #[must_use]
    pub fn raise_target(&self) -> Option<u32> {
        (self.state != Some(DeskState::Raised)).then_some(self.standing_height)
    }

    /// Sitting height, unless the desk is already down
    #[must_use]
    pub fn lower_target(&self) -> Option<u32> {
        (self.state != Some(DeskState::Lowered)).then_some(self.sitting_height)
    }

    /// Menu text for the sit/stand state
    #[must_use]
    pub fn state_title(&self) -> &'static str {
        self.state.map_or("Not Connected", DeskState::title)
    }

    /// Menu text for the connection
    #[must_use]
    pub fn connection_status(&self) -> &'static str {
        match (self.connection, &self.connection_error) {
            (ConnectionState::Connecting, _) => "Connecting...",
            (ConnectionState::Open, _) => "Connected",
            (ConnectionState::Closed, Some(ConnectionError::Offline)) => "Internet offline",
            (ConnectionState::Closed, Some(ConnectionError::Other(_))) => "Error",
            (ConnectionState::Closed, None) => "Disconnected",
        }
    }

    /// Menu text for the height
    #[must_use]
    pub fn height_label(&self) -> String {
        match self.height {
            Some(height) if self.connection == ConnectionState::Open && self.online => {
                format!("Height: {height} cm")
            }
            _ => "Height: --".to_owned(),
        }
    }

    /// Tray icon for the current condition
    #[must_use]
    pub const fn status_icon(&self) -> StatusIcon {
        match (self.connection, self.online, self.direction) {
            (ConnectionState::Connecting, _, _) => StatusIcon::Busy,
            (ConnectionState::Closed, _, _) | (ConnectionState::Open, false, _) => {
                StatusIcon::Alert
            }
            (ConnectionState::Open, true, Direction::Stopped) => StatusIcon::Idle,
            (ConnectionState::Open, true, Direction::Up) => StatusIcon::Up,
            (ConnectionState::Open, true, Direction::Down) => StatusIcon::Down,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desk() -> Desk {
        Desk::new("dev1", "Office", 60, 100)
    }

    #[test]
    fn test_parse_events() {
        assert_eq!(DeskEvent::parse("movingdown", ""), Some(DeskEvent::MovingDown));
        assert_eq!(DeskEvent::parse("movingup", ""), Some(DeskEvent::MovingUp));
        assert_eq!(
            DeskEvent::parse("targetreached", ""),
            Some(DeskEvent::TargetReached)
        );
        assert_eq!(DeskEvent::parse("movetimeout", ""), Some(DeskEvent::MoveTimeout));
        assert_eq!(DeskEvent::parse("height", "74"), Some(DeskEvent::Height(74)));
        assert_eq!(DeskEvent::parse("height", " 74\n"), Some(DeskEvent::Height(74)));
        assert_eq!(
            DeskEvent::parse("spark/status", "offline"),
            Some(DeskEvent::Online(false))
        );
    }

    #[test]
    fn test_parse_ignores_unknown_and_bad_data() {
        assert_eq!(DeskEvent::parse("height", "tall"), None);
        assert_eq!(DeskEvent::parse("height", "-3"), None);
        assert_eq!(DeskEvent::parse("spark/status", "rebooting"), None);
        assert_eq!(DeskEvent::parse("spark/flash/status", "success"), None);
    }

    #[test]
    fn test_movement_cycle_up() {
        let mut desk = desk();
        assert!(!desk.apply(DeskEvent::MovingUp));
        assert_eq!(desk.state(), Some(DeskState::Raising));
        assert_eq!(desk.direction(), Direction::Up);

        assert!(desk.apply(DeskEvent::TargetReached));
        assert_eq!(desk.state(), Some(DeskState::Raised));
        assert_eq!(desk.direction(), Direction::Stopped);
    }

    #[test]
    fn test_movement_cycle_down() {
        let mut desk = desk();
        desk.apply(DeskEvent::MovingDown);
        assert_eq!(desk.state(), Some(DeskState::Lowering));
        assert!(desk.apply(DeskEvent::TargetReached));
        assert_eq!(desk.state(), Some(DeskState::Lowered));
    }

    #[test]
    fn test_target_reached_while_still_keeps_state() {
        let mut desk = desk();
        desk.update_height(100);
        assert!(desk.apply(DeskEvent::TargetReached));
        assert_eq!(desk.state(), Some(DeskState::Raised));
    }

    #[test]
    fn test_move_timeout_requests_refresh() {
        let mut desk = desk();
        desk.apply(DeskEvent::MovingUp);
        assert!(desk.apply(DeskEvent::MoveTimeout));
        assert_eq!(desk.direction(), Direction::Stopped);
        assert_eq!(desk.state(), Some(DeskState::Raising));
    }

    #[test]
    fn test_height_event_does_not_touch_state() {
        let mut desk = desk();
        assert!(!desk.apply(DeskEvent::Height(95)));
        assert_eq!(desk.height(), Some(95));
        assert_eq!(desk.state(), None);
    }

    #[test]
    fn test_midpoint_rule() {
        let mut desk = desk();
        desk.update_height(80);
        assert_eq!(desk.state(), Some(DeskState::Lowered));
        desk.update_height(81);
        assert_eq!(desk.state(), Some(DeskState::Raised));
        desk.update_height(40);
        assert_eq!(desk.state(), Some(DeskState::Lowered));
    }

    #[test]
    fn test_reference_change_rederives_state() {
        let mut desk = desk();
        desk.update_height(85);
        assert_eq!(desk.state(), Some(DeskState::Raised));

        desk.set_reference_heights(70, 110);
        assert_eq!(desk.state(), Some(DeskState::Lowered));
    }

    #[test]
    fn test_reference_change_without_height() {
        let mut desk = desk();
        desk.set_reference_heights(70, 110);
        assert_eq!(desk.state(), None);
        assert_eq!(desk.raise_target(), Some(110));
    }

    #[test]
    fn test_raise_and_lower_targets() {
        let mut desk = desk();
        assert_eq!(desk.raise_target(), Some(100));
        assert_eq!(desk.lower_target(), Some(60));

        desk.update_height(100);
        assert_eq!(desk.raise_target(), None);
        assert_eq!(desk.lower_target(), Some(60));

        desk.update_height(60);
        assert_eq!(desk.raise_target(), Some(100));
        assert_eq!(desk.lower_target(), None);
    }

    #[test]
    fn test_connection_status() {
        let mut desk = desk();
        assert_eq!(desk.connection_status(), "Disconnected");

        desk.set_connection(ConnectionState::Connecting, None);
        assert_eq!(desk.connection_status(), "Connecting...");

        desk.set_connection(ConnectionState::Open, None);
        assert_eq!(desk.connection_status(), "Connected");

        desk.set_connection(ConnectionState::Closed, Some(ConnectionError::Offline));
        assert_eq!(desk.connection_status(), "Internet offline");

        desk.set_connection(
            ConnectionState::Closed,
            Some(ConnectionError::Other("reset".to_owned())),
        );
        assert_eq!(desk.connection_status(), "Error");
    }

    #[test]
    fn test_titles_and_labels() {
        let mut desk = desk();
        assert_eq!(desk.state_title(), "Not Connected");
        assert_eq!(desk.height_label(), "Height: --");

        desk.update_height(72);
        assert_eq!(desk.state_title(), "Sitting");
        assert_eq!(desk.height_label(), "Height: --");

        desk.set_connection(ConnectionState::Open, None);
        assert_eq!(desk.height_label(), "Height: 72 cm");

        desk.apply(DeskEvent::Online(false));
        assert_eq!(desk.height_label(), "Height: --");
    }

    #[test]
    fn test_status_icon() {
        let mut desk = desk();
        assert_eq!(desk.status_icon(), StatusIcon::Alert);

        desk.set_connection(ConnectionState::Connecting, None);
        assert_eq!(desk.status_icon(), StatusIcon::Busy);

        desk.set_connection(ConnectionState::Open, None);
        assert_eq!(desk.status_icon(), StatusIcon::Idle);

        desk.apply(DeskEvent::MovingUp);
        assert_eq!(desk.status_icon(), StatusIcon::Up);

        desk.apply(DeskEvent::MovingDown);
        assert_eq!(desk.status_icon(), StatusIcon::Down);

        desk.apply(DeskEvent::Online(false));
        assert_eq!(desk.status_icon(), StatusIcon::Alert);
    }
}
