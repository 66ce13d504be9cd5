use std::{
    env,
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use majsoul_plus_core::{
    config::{server_only_from_env_value, UserConfig},
    instance::ForwardedInvocation,
    lifecycle::{
        DispatchOutcome, LifecycleEvent, StartupOptions, StartupOrchestrator, START_GAME_EVENT,
    },
    mirror,
    paths::{AppPaths, SERVER_ONLY_ENV},
    provision::{local_certificate_fingerprint, provision_data_dir},
    shell_locale::{resolve_shell_locale, shell_texts_for_locale, DEFAULT_SHELL_LOCALE},
    trust::CertificateTrustOverride,
};
use tauri::{webview::PageLoadEvent, AppHandle, Listener, Manager, RunEvent};

use crate::{
    desktop_bridge_commands,
    logging::{self, append_desktop_log, DesktopLogCategory},
    window_actions::{self, TauriWindowHost},
    ShellState, BUNDLED_RESOURCE_DIR, MANAGER_WINDOW_LABEL,
};

fn append_startup_log(message: &str) {
    append_desktop_log(DesktopLogCategory::Startup, message);
}

fn shell_host(app_handle: &AppHandle) -> Option<(ShellState, TauriWindowHost)> {
    let state = app_handle.try_state::<ShellState>()?.inner().clone();
    let host = TauriWindowHost::new(app_handle.clone(), &state);
    Some((state, host))
}

fn dispatch_event(app_handle: AppHandle, event: LifecycleEvent) {
    tauri::async_runtime::spawn(async move {
        let Some((state, host)) = shell_host(&app_handle) else {
            append_startup_log("lifecycle event dropped: shell state missing");
            return;
        };

        let name = event.name();
        match state.orchestrator.dispatch(event, &host).await {
            Ok(DispatchOutcome::Started(binding)) => {
                append_startup_log(&format!("game running against {}", binding.origin()));
            }
            Ok(outcome) => append_desktop_log(
                DesktopLogCategory::Runtime,
                &format!("{name} handled: {outcome:?}"),
            ),
            Err(error) => append_startup_log(&format!("{name} failed: {error}")),
        }
    });
}

fn spawn_start_game(app_handle: AppHandle) {
    dispatch_event(app_handle, LifecycleEvent::StartGame);
}

fn handle_second_launch(app_handle: &AppHandle, argv: Vec<String>, cwd: String) {
    dispatch_event(
        app_handle.clone(),
        LifecycleEvent::SecondLaunch(ForwardedInvocation::new(argv, cwd)),
    );
}

fn resolve_app_paths() -> AppPaths {
    match AppPaths::from_process_env() {
        Ok(paths) => paths,
        Err(error) => {
            append_startup_log(&format!("failed to resolve data directory: {error}"));
            process::exit(1);
        }
    }
}

/// First run copies the bundled content folders and creates the HTTPS
/// certificate. Failures are logged; the start-game sequence reports them.
fn provision(paths: &AppPaths, bundled: Option<&Path>) -> CertificateTrustOverride {
    match provision_data_dir(paths, bundled) {
        Ok(report) if !report.copied.is_empty() || report.generated_certificate => {
            append_startup_log(&format!("data directory provisioned: {report:?}"));
        }
        Ok(_) => {}
        Err(error) => append_startup_log(&format!("failed to provision data directory: {error}")),
    }
    CertificateTrustOverride::default()
        .with_local_certificate(local_certificate_fingerprint(paths))
}

fn build_shell_state(app_handle: &AppHandle, paths: AppPaths) -> ShellState {
    let bundled = app_handle
        .path()
        .resource_dir()
        .ok()
        .map(|dir| dir.join(BUNDLED_RESOURCE_DIR));
    let trust = provision(&paths, bundled.as_deref());

    let config = UserConfig::load_or_default(&paths.user_config());
    let texts = shell_texts_for_locale(resolve_shell_locale(DEFAULT_SHELL_LOCALE));
    let server_only = server_only_from_env_value(env::var(SERVER_ONLY_ENV).ok().as_deref());
    let routes = mirror::asset_routes(&paths, &config, env!("CARGO_PKG_VERSION"));

    let options = StartupOptions {
        server_only,
        ..StartupOptions::new(texts)
    };
    ShellState {
        orchestrator: Arc::new(StartupOrchestrator::new(&config, &paths, routes, options)),
        paths,
        texts,
        trust,
    }
}

pub(crate) fn run() {
    logging::init_logging();
    append_startup_log("desktop process starting");

    let paths = resolve_app_paths();
    let log_path = logging::attach_log_dir(&paths.log_dir());
    append_startup_log(&format!("desktop log path: {}", log_path.display()));
    append_startup_log(&format!("data directory: {}", paths.data_dir.display()));

    let launch_argv: Vec<String> = env::args().collect();
    let launch_cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    tauri::Builder::default()
        .plugin(tauri_plugin_single_instance::init(|app_handle, argv, cwd| {
            handle_second_launch(app_handle, argv, cwd);
        }))
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_global_shortcut::Builder::new().build())
        .invoke_handler(tauri::generate_handler![
            desktop_bridge_commands::desktop_bridge_get_startup_state,
            desktop_bridge_commands::desktop_bridge_take_pending_import,
        ])
        .on_page_load(|webview, payload| {
            if webview.label() != MANAGER_WINDOW_LABEL {
                return;
            }
            let started = matches!(payload.event(), PageLoadEvent::Started);
            append_desktop_log(
                DesktopLogCategory::Runtime,
                &format!(
                    "manager page-load {}: {}",
                    if started { "started" } else { "finished" },
                    payload.url()
                ),
            );
            // A (re)loading page has no listeners until it asks for pending imports.
            if started {
                if let Some(state) = webview.app_handle().try_state::<ShellState>() {
                    state.orchestrator.detach_manager();
                }
            }
        })
        .setup(move |app| {
            let app_handle = app.handle().clone();
            let state = build_shell_state(&app_handle, paths);
            app.manage(state.clone());
            let host = TauriWindowHost::new(app_handle.clone(), &state);

            state
                .orchestrator
                .prepare_process(&host, &launch_argv, &launch_cwd);
            window_actions::build_manager_window(
                &app_handle,
                &state.texts,
                state.orchestrator.feature_switches(),
            )?;

            let start_game_handle = app_handle.clone();
            app_handle.listen(START_GAME_EVENT, move |_event| {
                spawn_start_game(start_game_handle.clone());
            });
            append_startup_log("manager window ready");
            Ok(())
        })
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(handle_run_event);
}

#[cfg_attr(not(target_os = "macos"), allow(unused_variables))]
fn handle_run_event(app_handle: &AppHandle, event: RunEvent) {
    match event {
        #[cfg(target_os = "macos")]
        RunEvent::Opened { urls } => {
            for url in urls {
                match url.to_file_path() {
                    Ok(path) => dispatch_event(app_handle.clone(), LifecycleEvent::OpenFile(path)),
                    Err(()) => append_desktop_log(
                        DesktopLogCategory::Runtime,
                        &format!("ignoring non-file open request: {url}"),
                    ),
                }
            }
        }
        RunEvent::Exit => {
            append_desktop_log(DesktopLogCategory::Runtime, "desktop process exiting");
        }
        _ => {}
    }
}
