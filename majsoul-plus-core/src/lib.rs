//! Startup orchestration for the Majsoul Plus desktop shell.
//!
//! Windowing lives behind [`window_mode::WindowHost`]; everything here runs
//! without a webview.

pub mod config;
pub mod content;
pub mod instance;
pub mod lifecycle;
pub mod mirror;
pub mod paths;
pub mod provision;
pub mod server;
pub mod shell_locale;
pub mod switches;
pub mod trust;
pub mod window_mode;
