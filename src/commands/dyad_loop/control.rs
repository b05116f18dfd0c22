//! File flags that pause or stop the loop between turns.

use std::path::{Path, PathBuf};

use tracing::info;

pub const STOP_FILE: &str = "control.stop";
pub const PAUSE_FILE: &str = "control.pause";

/// What the control flags ask for. Stop wins over pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Run,
    Pause,
    Stop,
}

/// Read the flags under `state_dir`.
pub fn read_loop_control(state_dir: &Path) -> LoopControl {
    if state_dir.join(STOP_FILE).exists() {
        LoopControl::Stop
    } else if state_dir.join(PAUSE_FILE).exists() {
        LoopControl::Pause
    } else {
        LoopControl::Run
    }
}

/// Tracks pause transitions so "paused" and "resumed" are logged once each.
#[derive(Debug)]
pub struct ControlWatcher {
    state_dir: PathBuf,
    paused: bool,
}

impl ControlWatcher {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            paused: false,
        }
    }

    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn check(&mut self) -> LoopControl {
        let control = read_loop_control(&self.state_dir);
        match self.transition(control) {
            Some(PauseTransition::Paused) => info!(flag = PAUSE_FILE, "paused"),
            Some(PauseTransition::Resumed) => info!("resumed"),
            None => {}
        }
        control
    }

    fn transition(&mut self, control: LoopControl) -> Option<PauseTransition> {
        match control {
            LoopControl::Pause if !self.paused => {
                self.paused = true;
                Some(PauseTransition::Paused)
            }
            LoopControl::Run if self.paused => {
                self.paused = false;
                Some(PauseTransition::Resumed)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PauseTransition {
    Paused,
    Resumed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn no_flags_means_run() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_loop_control(dir.path()), LoopControl::Run);
    }

    #[test]
    fn stop_beats_pause() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PAUSE_FILE), "").unwrap();
        assert_eq!(read_loop_control(dir.path()), LoopControl::Pause);
        fs::write(dir.path().join(STOP_FILE), "").unwrap();
        assert_eq!(read_loop_control(dir.path()), LoopControl::Stop);
    }

    #[test]
    fn watcher_tracks_pause_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = ControlWatcher::new(dir.path());
        assert_eq!(watcher.check(), LoopControl::Run);
        assert!(!watcher.is_paused());

        fs::write(dir.path().join(PAUSE_FILE), "").unwrap();
        assert_eq!(watcher.check(), LoopControl::Pause);
        assert_eq!(watcher.check(), LoopControl::Pause);
        assert!(watcher.is_paused());

        fs::remove_file(dir.path().join(PAUSE_FILE)).unwrap();
        assert_eq!(watcher.check(), LoopControl::Run);
        assert!(!watcher.is_paused());
    }

    #[test]
    fn each_pause_transition_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = ControlWatcher::new(dir.path());
        let seen: Vec<_> = [
            LoopControl::Pause,
            LoopControl::Pause,
            LoopControl::Pause,
            LoopControl::Run,
            LoopControl::Run,
        ]
        .into_iter()
        .filter_map(|control| watcher.transition(control))
        .collect();
        assert_eq!(seen, vec![PauseTransition::Paused, PauseTransition::Resumed]);
    }
}
