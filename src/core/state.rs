/// Where the playback controller currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Playing(usize),
    Paused(usize),
}

/// Playback flags owned by the controller for one page session.
///
/// `current` is either `None` or a valid index into the controller's
/// segments. `generation` is bumped by every operation that starts, pauses or
/// stops playback; a suspended run compares its own generation against it to
/// find out whether it is still the active one.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub current: Option<usize>,
    pub generation: u64,
}

impl PlaybackState {
    pub fn status(&self) -> PlaybackStatus {
        match (self.current, self.is_playing) {
            (None, _) => PlaybackStatus::Idle,
            (Some(i), true) => PlaybackStatus::Playing(i),
            (Some(i), false) => PlaybackStatus::Paused(i),
        }
    }

    /// Moves to `Playing(index)` and returns the new run generation.
    pub fn start(&mut self, index: usize) -> u64 {
        self.generation += 1;
        self.is_playing = true;
        self.current = Some(index);
        self.generation
    }

    /// Moves to `Paused(current)`, keeping the index for resume.
    pub fn pause(&mut self) {
        self.generation += 1;
        self.is_playing = false;
    }

    /// Moves to `Idle`.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.is_playing = false;
        self.current = None;
    }

    pub fn is_active(&self, generation: u64) -> bool {
        self.is_playing && self.generation == generation
    }
}
