use std::{env, path::Path};

use majsoul_plus_core::{
    server::ServerBinding,
    shell_locale::ShellTexts,
    switches::FeatureSwitches,
    trust::CertificateTrustOverride,
    window_mode::{AuxiliaryFeature, WindowError, WindowHost, WindowMode},
};
use tauri::{
    AppHandle, Emitter, Manager, WebviewUrl, WebviewWindow, WebviewWindowBuilder, Wry,
};
use tauri_plugin_dialog::{DialogExt, MessageDialogButtons, MessageDialogKind};
use tauri_plugin_global_shortcut::{GlobalShortcutExt, ShortcutState};
use url::Url;

use crate::{
    logging::{append_desktop_log, DesktopLogCategory},
    webview_trust, ShellState, GAME_WINDOW_LABEL, IMPORT_EXTENSION_EVENT, MANAGER_WINDOW_LABEL,
    PANIC_HIDE_SHORTCUT, PLAYER_WINDOW_LABEL, REFRESH_ALL_EVENT,
};

fn log(message: &str) {
    append_desktop_log(DesktopLogCategory::Runtime, message);
}

pub(crate) fn window_label(mode: WindowMode) -> &'static str {
    match mode {
        WindowMode::Manager => MANAGER_WINDOW_LABEL,
        WindowMode::Game => GAME_WINDOW_LABEL,
    }
}

pub(crate) fn game_url(binding: &ServerBinding) -> Result<Url, WindowError> {
    Url::parse(&format!("{}/", binding.origin()))
        .map_err(|error| WindowError::Platform(format!("invalid game url: {error}")))
}

/// Page the game window shows until the certificate hook is in place.
const BLANK_PAGE: &str = "about:blank";

fn with_proxy<'a>(
    builder: WebviewWindowBuilder<'a, Wry, AppHandle>,
    proxy: Option<&Url>,
) -> WebviewWindowBuilder<'a, Wry, AppHandle> {
    match proxy {
        Some(proxy) => builder.proxy_url(proxy.clone()),
        None => builder,
    }
}

pub(crate) fn build_manager_window(
    app_handle: &AppHandle,
    texts: &ShellTexts,
    switches: &FeatureSwitches,
) -> Result<WebviewWindow, WindowError> {
    let builder = WebviewWindowBuilder::new(
        app_handle,
        MANAGER_WINDOW_LABEL,
        WebviewUrl::App("index.html".into()),
    )
    .title(texts.program_name)
    .inner_size(960.0, 640.0)
    .min_inner_size(720.0, 480.0)
    .center();
    with_proxy(builder, switches.proxy.as_ref())
        .build()
        .map_err(|error| WindowError::Platform(error.to_string()))
}

pub(crate) fn toggle_game_window(app_handle: &AppHandle) {
    let Some(window) = app_handle.get_webview_window(GAME_WINDOW_LABEL) else {
        log("toggle_game_window skipped: game window not found");
        return;
    };

    let result = match window.is_visible() {
        Ok(true) => window.hide(),
        Ok(false) => window.show().and_then(|()| window.set_focus()),
        Err(error) => Err(error),
    };
    if let Err(error) = result {
        log(&format!("failed to toggle game window: {error}"));
    }
}

/// `WindowHost` over the running Tauri application.
pub(crate) struct TauriWindowHost {
    app_handle: AppHandle,
    texts: ShellTexts,
    switches: FeatureSwitches,
    trust: CertificateTrustOverride,
}

impl TauriWindowHost {
    pub(crate) fn new(app_handle: AppHandle, state: &ShellState) -> Self {
        Self {
            app_handle,
            texts: state.texts,
            switches: state.orchestrator.feature_switches().clone(),
            trust: state.trust.clone(),
        }
    }

    fn window(&self, label: &str) -> Result<WebviewWindow, WindowError> {
        self.app_handle
            .get_webview_window(label)
            .ok_or_else(|| WindowError::NotFound(label.to_string()))
    }

    fn show_dialog(
        &self,
        title: &str,
        message: &str,
        kind: MessageDialogKind,
        parent: Option<&WebviewWindow>,
    ) {
        let mut dialog = self
            .app_handle
            .dialog()
            .message(message)
            .title(title)
            .kind(kind)
            .buttons(MessageDialogButtons::OkCustom(self.texts.ok_button.to_string()));
        if let Some(parent) = parent {
            dialog = dialog.parent(parent);
        }
        dialog.show(|_| {});
    }

    fn register_panic_hide(&self) -> Result<(), WindowError> {
        self.app_handle
            .global_shortcut()
            .on_shortcut(PANIC_HIDE_SHORTCUT, |app_handle, _shortcut, event| {
                if event.state() == ShortcutState::Pressed {
                    toggle_game_window(app_handle);
                }
            })
            .map_err(|error| WindowError::Platform(error.to_string()))
    }
}

fn platform_error(error: tauri::Error) -> WindowError {
    WindowError::Platform(error.to_string())
}

impl WindowHost for TauriWindowHost {
    fn apply_feature_switches(&self, switches: &FeatureSwitches) {
        for (key, value) in switches.webview_environment() {
            log(&format!("webview environment {key}={value}"));
            env::set_var(key, value);
        }
        if let Some(proxy) = &switches.proxy {
            log(&format!("webview proxy {proxy} applied per window"));
        }
        for ignored in &switches.ignored {
            log(&format!("switch {ignored} ignored: not supported by this webview"));
        }
    }

    fn create_game_window(&self, binding: &ServerBinding) -> Result<(), WindowError> {
        if let Ok(window) = self.window(GAME_WINDOW_LABEL) {
            return window.set_focus().map_err(platform_error);
        }

        let url = game_url(binding)?;
        let blank = Url::parse(BLANK_PAGE)
            .map_err(|error| WindowError::Platform(format!("invalid blank page: {error}")))?;
        let builder = WebviewWindowBuilder::new(
            &self.app_handle,
            GAME_WINDOW_LABEL,
            WebviewUrl::External(blank),
        )
        .title(self.texts.program_name)
        .inner_size(1280.0, 720.0)
        .center()
        .focused(true);
        let window = with_proxy(builder, self.switches.proxy.as_ref())
            .build()
            .map_err(platform_error)?;

        // Queued on the main thread ahead of the navigation below.
        webview_trust::install_certificate_hook(&window, self.trust.clone())?;
        log(&format!("opening game window at {url}"));
        window.navigate(url).map_err(platform_error)
    }

    fn create_background_surface(&self) -> Result<(), WindowError> {
        WebviewWindowBuilder::new(
            &self.app_handle,
            PLAYER_WINDOW_LABEL,
            WebviewUrl::App("player.html".into()),
        )
        .title(self.texts.program_name)
        .visible(false)
        .skip_taskbar(true)
        .build()
        .map(|_| ())
        .map_err(platform_error)
    }

    fn hide_manager(&self) -> Result<(), WindowError> {
        self.window(MANAGER_WINDOW_LABEL)?
            .hide()
            .map_err(platform_error)
    }

    fn close_manager(&self) -> Result<(), WindowError> {
        self.window(MANAGER_WINDOW_LABEL)?
            .close()
            .map_err(platform_error)
    }

    fn focus(&self, mode: WindowMode) -> Result<(), WindowError> {
        let window = self.window(window_label(mode))?;
        if window.is_minimized().unwrap_or(false) {
            window.unminimize().map_err(platform_error)?;
        }
        window.show().map_err(platform_error)?;
        window.set_focus().map_err(platform_error)
    }

    fn deliver_import(&self, path: &Path) -> Result<(), WindowError> {
        self.window(MANAGER_WINDOW_LABEL)?;
        self.app_handle
            .emit_to(
                MANAGER_WINDOW_LABEL,
                IMPORT_EXTENSION_EVENT,
                path.display().to_string(),
            )
            .map_err(platform_error)
    }

    fn refresh_manager(&self) -> Result<(), WindowError> {
        self.window(MANAGER_WINDOW_LABEL)?;
        self.app_handle
            .emit_to(MANAGER_WINDOW_LABEL, REFRESH_ALL_EVENT, ())
            .map_err(platform_error)
    }

    fn show_game_message(&self, title: &str, message: &str) -> Result<(), WindowError> {
        // Server-only mode has no game window; the dialog then stands alone.
        let parent = self.window(GAME_WINDOW_LABEL).ok();
        self.show_dialog(title, message, MessageDialogKind::Warning, parent.as_ref());
        Ok(())
    }

    fn show_startup_failure(&self, title: &str, message: &str) {
        let parent = self.window(MANAGER_WINDOW_LABEL).ok();
        self.show_dialog(title, message, MessageDialogKind::Error, parent.as_ref());
    }

    fn register_auxiliary(&self, feature: AuxiliaryFeature) -> Result<(), WindowError> {
        match feature {
            AuxiliaryFeature::PanicHide => {
                self.register_panic_hide()?;
                log(&format!("panic hide bound to {PANIC_HIDE_SHORTCUT}"));
            }
            AuxiliaryFeature::ScreenCapture | AuxiliaryFeature::ToolSandbox => {
                log(&format!("{feature:?} is not available in this shell"));
            }
            AuxiliaryFeature::FileOpen => {
                log("file-open requests are routed through the single-instance handler");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use majsoul_plus_core::server::ServerProtocol;

    use super::*;

    #[test]
    fn window_label_maps_modes_to_labels() {
        assert_eq!(window_label(WindowMode::Manager), "manager");
        assert_eq!(window_label(WindowMode::Game), "game");
    }

    #[test]
    fn blank_page_parses_as_external_url() {
        assert_eq!(Url::parse(BLANK_PAGE).expect("blank").scheme(), "about");
    }

    #[test]
    fn game_url_points_at_bound_port() {
        let binding = ServerBinding {
            protocol: ServerProtocol::Https,
            port: 8887,
            bound_port: 8887,
        };
        assert_eq!(
            game_url(&binding).expect("url").as_str(),
            "https://localhost:8887/"
        );
    }
}
