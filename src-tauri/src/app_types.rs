use std::sync::Arc;

use majsoul_plus_core::{
    lifecycle::StartupOrchestrator, paths::AppPaths, server::ServerBinding,
    shell_locale::ShellTexts, trust::CertificateTrustOverride, window_mode::WindowMode,
};

/// Managed Tauri state shared by the event handlers.
#[derive(Debug, Clone)]
pub(crate) struct ShellState {
    pub(crate) orchestrator: Arc<StartupOrchestrator>,
    pub(crate) paths: AppPaths,
    pub(crate) texts: ShellTexts,
    /// Decides certificate errors raised inside the game webview.
    pub(crate) trust: CertificateTrustOverride,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartupBridgeState {
    pub(crate) mode: String,
    pub(crate) server_origin: Option<String>,
    pub(crate) server_fell_back: bool,
    pub(crate) data_dir: String,
}

impl StartupBridgeState {
    pub(crate) fn new(mode: WindowMode, binding: Option<ServerBinding>, paths: &AppPaths) -> Self {
        Self {
            mode: mode.to_string(),
            server_origin: binding.map(|binding| binding.origin()),
            server_fell_back: binding.is_some_and(|binding| binding.fell_back()),
            data_dir: paths.data_dir.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use majsoul_plus_core::server::ServerProtocol;

    use super::*;

    #[test]
    fn startup_bridge_state_serializes_camel_case() {
        let binding = ServerBinding {
            protocol: ServerProtocol::Http,
            port: 8887,
            bound_port: 50123,
        };
        let state =
            StartupBridgeState::new(WindowMode::Game, Some(binding), &AppPaths::new("/data"));

        let value = serde_json::to_value(&state).expect("serialize");
        assert_eq!(value["mode"], "game");
        assert_eq!(value["serverOrigin"], "http://localhost:50123");
        assert_eq!(value["serverFellBack"], true);
    }

    #[test]
    fn startup_bridge_state_without_binding_has_no_origin() {
        let state = StartupBridgeState::new(WindowMode::Manager, None, &AppPaths::new("/data"));
        assert_eq!(state.server_origin, None);
        assert!(!state.server_fell_back);
    }
}
