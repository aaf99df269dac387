use serde::Serialize;

/// Lifecycle of a [`Player`](super::Player).
///
/// ```text
/// Idle --open--> Opening --buffered--> Playing --stop--> Paused --resume--> Playing
/// any --close/fatal/end--> Stopping --threads joined--> Closed --open--> Opening
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    #[default]
    Idle,
    Opening,
    Playing,
    Paused,
    Stopping,
    Closed,
}

impl PlayerState {
    /// Whether worker threads may be running.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PlayerState::Opening | PlayerState::Playing | PlayerState::Paused | PlayerState::Stopping
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlayerState::Idle => "idle",
            PlayerState::Opening => "opening",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Stopping => "stopping",
            PlayerState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
