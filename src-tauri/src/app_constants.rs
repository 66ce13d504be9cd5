pub(crate) const MANAGER_WINDOW_LABEL: &str = "manager";
pub(crate) const GAME_WINDOW_LABEL: &str = "game";
pub(crate) const PLAYER_WINDOW_LABEL: &str = "player";

pub(crate) const IMPORT_EXTENSION_EVENT: &str = "import-extension";
pub(crate) const REFRESH_ALL_EVENT: &str = "refresh-all";

/// Under the resource dir; mirrors the data directory's content folders.
pub(crate) const BUNDLED_RESOURCE_DIR: &str = "bin";

pub(crate) const PANIC_HIDE_SHORTCUT: &str = "Alt+X";

pub(crate) const DESKTOP_LOG_FILE: &str = "desktop.log";
pub(crate) const DESKTOP_LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
pub(crate) const LOG_BACKUP_COUNT: usize = 3;
