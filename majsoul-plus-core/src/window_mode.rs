use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{server::ServerBinding, shell_locale::ShellTexts, switches::FeatureSwitches};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WindowMode {
    #[default]
    Manager,
    Game,
}

impl fmt::Display for WindowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manager => f.write_str("manager"),
            Self::Game => f.write_str("game"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("window '{0}' not found")]
    NotFound(String),
    #[error("window operation failed: {0}")]
    Platform(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxiliaryFeature {
    PanicHide,
    ScreenCapture,
    ToolSandbox,
    FileOpen,
}

/// Everything the startup sequence needs from the windowing toolkit.
pub trait WindowHost: Send + Sync {
    /// Must run before any window is constructed.
    fn apply_feature_switches(&self, switches: &FeatureSwitches);
    fn create_game_window(&self, binding: &ServerBinding) -> Result<(), WindowError>;
    /// Hidden surface that keeps a server-only process alive.
    fn create_background_surface(&self) -> Result<(), WindowError>;
    fn hide_manager(&self) -> Result<(), WindowError>;
    fn close_manager(&self) -> Result<(), WindowError>;
    fn focus(&self, mode: WindowMode) -> Result<(), WindowError>;
    /// Hands an extension archive to the manager surface for import.
    fn deliver_import(&self, path: &Path) -> Result<(), WindowError>;
    fn refresh_manager(&self) -> Result<(), WindowError>;
    /// Shown even when no game window exists (server-only mode).
    fn show_game_message(&self, title: &str, message: &str) -> Result<(), WindowError>;
    fn show_startup_failure(&self, title: &str, message: &str);
    fn register_auxiliary(&self, feature: AuxiliaryFeature) -> Result<(), WindowError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Delivered(PathBuf),
    /// Kept pending until the manager surface can take it.
    Deferred(PathBuf),
    RejectedInGame,
}

#[derive(Debug, Default)]
struct ControllerState {
    mode: WindowMode,
    pending: Option<PathBuf>,
    /// The manager page has registered its import listeners.
    manager_attached: bool,
}

#[derive(Debug)]
pub struct WindowModeController {
    state: Mutex<ControllerState>,
    texts: ShellTexts,
}

impl WindowModeController {
    pub fn new(texts: ShellTexts) -> Self {
        Self {
            state: Mutex::new(ControllerState::default()),
            texts,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mode(&self) -> WindowMode {
        self.lock_state().mode
    }

    pub fn pending_import(&self) -> Option<PathBuf> {
        self.lock_state().pending.clone()
    }

    /// Manager → Game. Returns false if the game mode was already active.
    pub fn enter_game(&self) -> bool {
        let mut state = self.lock_state();
        if state.mode == WindowMode::Game {
            return false;
        }
        state.mode = WindowMode::Game;
        // Nothing can consume an import once the manager is gone.
        state.pending = None;
        true
    }

    /// The manager page finished registering its listeners and pulls
    /// whatever arrived before that. Each pending path is handed out once.
    pub fn attach_manager(&self) -> Option<PathBuf> {
        let mut state = self.lock_state();
        if state.mode == WindowMode::Game {
            return None;
        }
        state.manager_attached = true;
        state.pending.take()
    }

    /// The manager page is (re)loading; events sent now would be lost.
    pub fn detach_manager(&self) {
        self.lock_state().manager_attached = false;
    }

    /// Records a path without delivering it. Ignored in game mode.
    pub fn record_pending(&self, path: PathBuf) -> bool {
        let mut state = self.lock_state();
        if state.mode == WindowMode::Game {
            return false;
        }
        state.pending = Some(path);
        true
    }

    pub fn route_import<H>(&self, path: PathBuf, host: &H) -> ImportOutcome
    where
        H: WindowHost + ?Sized,
    {
        if !self.record_pending(path.clone()) {
            log::info!(
                "[window] rejected import of {} while the game is running",
                path.display()
            );
            if let Err(error) =
                host.show_game_message(self.texts.program_name, self.texts.import_blocked_in_game)
            {
                log::warn!("[window] failed to show import rejection: {error}");
            }
            return ImportOutcome::RejectedInGame;
        }

        self.register_pending(host)
            .unwrap_or(ImportOutcome::Deferred(path))
    }

    /// Delivers the pending path, if any, to an attached manager page. The
    /// path is cleared only once delivery succeeds.
    pub fn register_pending<H>(&self, host: &H) -> Option<ImportOutcome>
    where
        H: WindowHost + ?Sized,
    {
        let path = {
            let mut state = self.lock_state();
            if state.mode == WindowMode::Game {
                return None;
            }
            if !state.manager_attached {
                return state.pending.clone().map(ImportOutcome::Deferred);
            }
            state.pending.take()?
        };

        if let Err(error) = host.deliver_import(&path) {
            log::warn!(
                "[window] import of {} deferred: {error}",
                path.display()
            );
            let mut state = self.lock_state();
            if state.mode == WindowMode::Manager && state.pending.is_none() {
                state.pending = Some(path.clone());
            }
            return Some(ImportOutcome::Deferred(path));
        }

        if let Err(error) = host.refresh_manager() {
            log::warn!("[window] failed to refresh manager after import: {error}");
        }
        log::info!("[window] delivered import {}", path.display());
        Some(ImportOutcome::Delivered(path))
    }
}
