#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod app_constants;
mod app_runtime;
mod app_types;
mod desktop_bridge_commands;
mod logging;
mod webview_trust;
mod window_actions;

pub(crate) use app_constants::*;
pub(crate) use app_types::{ShellState, StartupBridgeState};

fn main() {
    app_runtime::run();
}
