//! Start-game sequencing and lifecycle event dispatch.
//!
//! | event           | source                         | delivery                      |
//! |-----------------|--------------------------------|-------------------------------|
//! | `start-game`    | manager window                 | effective at most once        |
//! | `second-launch` | single-instance plugin         | every time                    |
//! | `open-file`     | OS file association / argv     | every time                    |
//!
//! `start-game` runs, in order: feature switches, asset server, window
//! creation, manager teardown, auxiliary feature registration. Once the game
//! window exists further `start-game` signals are no-ops. A fatal failure
//! leaves the manager window in charge so the user can retry.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{
    config::UserConfig,
    content::RouteTable,
    instance::{import_path_from_args, ForwardedInvocation, SingleInstanceCoordinator},
    paths::{AppPaths, DEFAULT_SERVER_PORT},
    server::{AssetServerLauncher, ServerBinding, ServerError, ServerProtocol},
    shell_locale::ShellTexts,
    switches::{FeatureSwitchGate, FeatureSwitches, PlatformCapabilities},
    window_mode::{
        AuxiliaryFeature, ImportOutcome, WindowError, WindowHost, WindowMode,
        WindowModeController,
    },
};

pub const START_GAME_EVENT: &str = "start-game";
pub const SECOND_LAUNCH_EVENT: &str = "second-launch";
pub const OPEN_FILE_EVENT: &str = "open-file";

pub struct AtomicFlagGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> AtomicFlagGuard<'a> {
    pub fn try_set(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self { flag })
    }
}

impl Drop for AtomicFlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    StartGame,
    SecondLaunch(ForwardedInvocation),
    OpenFile(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    AtMostOnce,
    EveryTime,
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartGame => START_GAME_EVENT,
            Self::SecondLaunch(_) => SECOND_LAUNCH_EVENT,
            Self::OpenFile(_) => OPEN_FILE_EVENT,
        }
    }

    pub fn delivery(&self) -> Delivery {
        match self {
            Self::StartGame => Delivery::AtMostOnce,
            Self::SecondLaunch(_) | Self::OpenFile(_) => Delivery::EveryTime,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Started(ServerBinding),
    AlreadyStarted,
    StartInProgress,
    Import(ImportOutcome),
    Focused,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("asset server failed to start: {0}")]
    Server(#[from] ServerError),
    #[error("failed to open the game window: {0}")]
    Window(#[from] WindowError),
}

#[derive(Debug, Clone)]
pub struct StartupOptions {
    pub preferred_port: u16,
    pub server_only: bool,
    pub capabilities: PlatformCapabilities,
    pub texts: ShellTexts,
}

impl StartupOptions {
    pub fn new(texts: ShellTexts) -> Self {
        Self {
            preferred_port: DEFAULT_SERVER_PORT,
            server_only: false,
            capabilities: PlatformCapabilities::current(),
            texts,
        }
    }
}

#[derive(Debug)]
pub struct StartupOrchestrator {
    instance: SingleInstanceCoordinator,
    switches: FeatureSwitchGate,
    launcher: AssetServerLauncher,
    windows: WindowModeController,
    routes: RouteTable,
    hide_manager: bool,
    server_only: bool,
    capabilities: PlatformCapabilities,
    texts: ShellTexts,
    starting: AtomicBool,
    auxiliary_registered: AtomicBool,
}

impl StartupOrchestrator {
    pub fn new(
        config: &UserConfig,
        paths: &AppPaths,
        routes: RouteTable,
        options: StartupOptions,
    ) -> Self {
        let protocol = ServerProtocol::from_config(config.user_data.use_http_server);
        Self {
            instance: SingleInstanceCoordinator::new(),
            switches: FeatureSwitchGate::new(FeatureSwitches::from_config(
                config,
                &options.capabilities,
            )),
            launcher: AssetServerLauncher::new(protocol, options.preferred_port, paths),
            windows: WindowModeController::new(options.texts),
            routes,
            hide_manager: config.window.is_manager_hide,
            server_only: options.server_only,
            capabilities: options.capabilities,
            texts: options.texts,
            starting: AtomicBool::new(false),
            auxiliary_registered: AtomicBool::new(false),
        }
    }

    pub fn instance(&self) -> &SingleInstanceCoordinator {
        &self.instance
    }

    pub fn mode(&self) -> WindowMode {
        self.windows.mode()
    }

    pub fn binding(&self) -> Option<ServerBinding> {
        self.launcher.binding()
    }

    pub fn pending_import(&self) -> Option<PathBuf> {
        self.windows.pending_import()
    }

    /// Process init: switches go out before the manager window is built, and a
    /// path on the primary's own command line is held until the manager loads.
    pub fn prepare_process<H>(&self, host: &H, own_argv: &[String], cwd: &Path)
    where
        H: WindowHost + ?Sized,
    {
        self.instance.mark_primary();
        self.switches
            .ensure_applied(|switches| host.apply_feature_switches(switches));
        if let Some(path) = import_path_from_args(own_argv, cwd) {
            log::info!("[startup] launch requested import of {}", path.display());
            self.windows.record_pending(path);
        }
    }

    /// The manager page registered its listeners; returns the import that
    /// arrived before it could receive events.
    pub fn attach_manager(&self) -> Option<PathBuf> {
        let path = self.windows.attach_manager();
        if let Some(path) = &path {
            log::info!("[window] manager pulled pending import {}", path.display());
        }
        path
    }

    pub fn detach_manager(&self) {
        self.windows.detach_manager();
    }

    pub fn feature_switches(&self) -> &FeatureSwitches {
        self.switches.switches()
    }

    pub async fn dispatch<H>(
        &self,
        event: LifecycleEvent,
        host: &H,
    ) -> Result<DispatchOutcome, StartupError>
    where
        H: WindowHost + ?Sized,
    {
        log::debug!("[startup] dispatching {}", event.name());
        match event {
            LifecycleEvent::StartGame => self.start_game(host).await,
            LifecycleEvent::SecondLaunch(invocation) => Ok(self.second_launch(&invocation, host)),
            LifecycleEvent::OpenFile(path) => {
                Ok(DispatchOutcome::Import(self.windows.route_import(path, host)))
            }
        }
    }

    fn second_launch<H>(&self, invocation: &ForwardedInvocation, host: &H) -> DispatchOutcome
    where
        H: WindowHost + ?Sized,
    {
        if let Some(path) = self.instance.accept_forwarded(invocation) {
            return DispatchOutcome::Import(self.windows.route_import(path, host));
        }

        let mode = self.windows.mode();
        if let Err(error) = host.focus(mode) {
            log::warn!("[instance] failed to focus {mode} window: {error}");
        }
        DispatchOutcome::Focused
    }

    pub async fn start_game<H>(&self, host: &H) -> Result<DispatchOutcome, StartupError>
    where
        H: WindowHost + ?Sized,
    {
        if self.windows.mode() == WindowMode::Game {
            log::info!("[startup] start-game ignored: game already running");
            return Ok(DispatchOutcome::AlreadyStarted);
        }
        let Some(_starting) = AtomicFlagGuard::try_set(&self.starting) else {
            log::info!("[startup] start-game ignored: start already in progress");
            return Ok(DispatchOutcome::StartInProgress);
        };

        self.switches
            .ensure_applied(|switches| host.apply_feature_switches(switches));

        let binding = match self.launcher.binding() {
            Some(binding) => binding,
            None => match self.launcher.launch(self.routes.clone()).await {
                Ok(binding) => binding,
                Err(error) => {
                    log::error!("[startup] {error}");
                    host.show_startup_failure(self.texts.startup_failed_title, &error.to_string());
                    return Err(error.into());
                }
            },
        };

        let window = if self.server_only {
            log::info!("[startup] server-only mode, keeping the process alive in the background");
            host.create_background_surface()
        } else {
            host.create_game_window(&binding)
        };
        if let Err(error) = window {
            log::error!("[startup] failed to create the game surface: {error}");
            host.show_startup_failure(self.texts.startup_failed_title, &error.to_string());
            return Err(error.into());
        }
        self.windows.enter_game();

        let teardown = if self.hide_manager {
            host.hide_manager()
        } else {
            host.close_manager()
        };
        if let Err(error) = teardown {
            log::warn!("[startup] manager teardown failed: {error}");
        }

        self.register_auxiliary_features(host);
        log::info!("[startup] game started on {}", binding.origin());
        Ok(DispatchOutcome::Started(binding))
    }

    fn register_auxiliary_features<H>(&self, host: &H)
    where
        H: WindowHost + ?Sized,
    {
        if self.auxiliary_registered.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut features = vec![
            AuxiliaryFeature::PanicHide,
            AuxiliaryFeature::ScreenCapture,
            AuxiliaryFeature::ToolSandbox,
        ];
        if self.capabilities.file_open_registration {
            features.push(AuxiliaryFeature::FileOpen);
        }
        for feature in features {
            if let Err(error) = host.register_auxiliary(feature) {
                log::warn!("[startup] failed to register {feature:?}: {error}");
            }
        }
    }
}
