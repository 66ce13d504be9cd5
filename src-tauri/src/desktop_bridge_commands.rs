use tauri::State;

use crate::{ShellState, StartupBridgeState};

#[tauri::command]
pub(crate) fn desktop_bridge_get_startup_state(state: State<'_, ShellState>) -> StartupBridgeState {
    StartupBridgeState::new(
        state.orchestrator.mode(),
        state.orchestrator.binding(),
        &state.paths,
    )
}

/// Called by the manager page once its event listeners are registered.
/// Imports that arrived before that are handed over here, once.
#[tauri::command]
pub(crate) fn desktop_bridge_take_pending_import(state: State<'_, ShellState>) -> Option<String> {
    state
        .orchestrator
        .attach_manager()
        .map(|path| path.display().to_string())
}
