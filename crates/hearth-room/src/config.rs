//! Room configuration and state machine.

use std::time::Duration;

use hearth_tick::TickConfig;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Configuration for a room kind.
///
/// Registered together with the kind's factory; every room of that kind
/// gets a copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Time between ticks. Zero means event-driven (no tick loop).
    pub tick_interval: Duration,

    /// Intervals the tick loop may fall behind before it re-synchronizes.
    pub max_lag_ticks: u32,

    /// Non-spectators needed to start the room early.
    pub min_players: usize,

    /// Maximum non-spectators.
    pub max_players: usize,

    /// Maximum members of any kind, spectators included. 0 = unlimited.
    pub max_raw_clients: usize,

    /// Delay after the first player joins before the room starts anyway.
    /// Only armed when `wait_for_min_players` is set; zero disables it.
    pub wait_time: Duration,

    /// When `false` and `wait_time` is zero, the room starts as soon as the
    /// first player joins. When `false` with a non-zero `wait_time`, only
    /// reaching `min_players` starts the room.
    pub wait_for_min_players: bool,

    /// Whether non-spectators may join.
    pub allow_players: bool,

    /// Whether spectators may join.
    pub allow_spectators: bool,

    /// Initial free-form status string, reported in [`RoomInfo`](crate::RoomInfo).
    pub status: String,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::ZERO,
            max_lag_ticks: 5,
            min_players: 1,
            max_players: 8,
            max_raw_clients: 0,
            wait_time: Duration::ZERO,
            wait_for_min_players: true,
            allow_players: true,
            allow_spectators: false,
            status: String::new(),
        }
    }
}

impl RoomConfig {
    /// Clamp inconsistent values: `max_players` is at least 1 and
    /// `min_players` never exceeds it.
    pub fn validated(mut self) -> Self {
        self.max_players = self.max_players.max(1);
        if self.min_players > self.max_players {
            tracing::warn!(
                min_players = self.min_players,
                max_players = self.max_players,
                "min_players above max_players, clamping"
            );
            self.min_players = self.max_players;
        }
        self
    }

    /// Tick scheduler settings for rooms of this kind.
    pub fn tick_config(&self) -> TickConfig {
        TickConfig {
            interval: self.tick_interval,
            max_lag_ticks: self.max_lag_ticks,
            ..TickConfig::default()
        }
    }
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// The lifecycle state of a room.
///
/// ```text
/// Created → WaitingForFirstPlayer → (WaitingOnStartTimer) → Running → Stopping → Disposed
/// ```
///
/// A room can also go straight from any waiting state to `Stopping` (stopped
/// before it started) and from any state to `Disposed` (callback fault).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomState {
    Created,
    WaitingForFirstPlayer,
    WaitingOnStartTimer,
    Running,
    Stopping,
    Disposed,
}

impl RoomState {
    /// Returns `true` before the room has started.
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::WaitingForFirstPlayer | Self::WaitingOnStartTimer
        )
    }

    /// Returns `true` once the room is stopping or gone.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Stopping | Self::Disposed)
    }
}

impl std::fmt::Display for RoomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::WaitingForFirstPlayer => write!(f, "WaitingForFirstPlayer"),
            Self::WaitingOnStartTimer => write!(f, "WaitingOnStartTimer"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Disposed => write!(f, "Disposed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_state_predicates() {
        assert!(RoomState::Created.is_waiting());
        assert!(RoomState::WaitingOnStartTimer.is_waiting());
        assert!(!RoomState::Running.is_waiting());
        assert!(RoomState::Stopping.is_closed());
        assert!(RoomState::Disposed.is_closed());
        assert!(!RoomState::Running.is_closed());
    }

    #[test]
    fn test_room_state_display() {
        assert_eq!(RoomState::WaitingForFirstPlayer.to_string(), "WaitingForFirstPlayer");
        assert_eq!(RoomState::Running.to_string(), "Running");
    }

    #[test]
    fn test_room_config_default() {
        let config = RoomConfig::default();
        assert_eq!(config.tick_interval, Duration::ZERO);
        assert_eq!(config.max_raw_clients, 0);
        assert!(config.allow_players);
        assert!(!config.allow_spectators);
        assert!(config.tick_config().tick_interval().is_none());
    }

    #[test]
    fn test_validated_clamps_min_players() {
        let config = RoomConfig {
            min_players: 10,
            max_players: 0,
            ..RoomConfig::default()
        }
        .validated();
        assert_eq!(config.max_players, 1);
        assert_eq!(config.min_players, 1);
    }

    #[test]
    fn test_room_config_deserializes_with_defaults() {
        let config: RoomConfig =
            serde_json::from_str(r#"{"max_players": 4, "status": "lobby"}"#).unwrap();
        assert_eq!(config.max_players, 4);
        assert_eq!(config.status, "lobby");
        assert_eq!(config.min_players, 1);
    }
}
