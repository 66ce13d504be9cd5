//! Process-wide webview feature switches.
//!
//! These must reach the webview runtime before the first window is built, so
//! they are rendered once from the user config and applied behind a one-shot
//! gate.

use std::sync::atomic::{AtomicBool, Ordering};

use url::Url;

use crate::config::UserConfig;

pub const WEBVIEW2_ARGS_ENV: &str = "WEBVIEW2_ADDITIONAL_BROWSER_ARGUMENTS";
pub const WEBKIT_COMPOSITING_ENV: &str = "WEBKIT_DISABLE_COMPOSITING_MODE";

const IN_PROCESS_GPU_SWITCH: &str = "--in-process-gpu";
const IGNORE_GPU_BLACKLIST_SWITCH: &str = "--ignore-gpu-blacklist";
const DISABLE_GPU_SWITCH: &str = "--disable-gpu";
const AUTOPLAY_POLICY_SWITCH: &str = "--autoplay-policy=no-user-gesture-required";

/// What the platform webview actually honours, evaluated once at startup.
///
/// | capability            | windows (WebView2) | macos (WKWebView) | linux (WebKitGTK) |
/// |-----------------------|--------------------|-------------------|-------------------|
/// | chromium arguments    | yes                | no                | no                |
/// | per-window proxy      | yes                | yes               | yes               |
/// | compositing toggle    | no                 | no                | yes               |
/// | file-open registration| yes                | no (OS event)     | yes               |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCapabilities {
    pub browser_arguments: bool,
    pub window_proxy: bool,
    pub compositing_toggle: bool,
    pub file_open_registration: bool,
}

impl PlatformCapabilities {
    pub fn for_os(os: &str) -> Self {
        match os {
            "windows" => Self {
                browser_arguments: true,
                window_proxy: true,
                compositing_toggle: false,
                file_open_registration: true,
            },
            "macos" => Self {
                browser_arguments: false,
                window_proxy: true,
                compositing_toggle: false,
                file_open_registration: false,
            },
            _ => Self {
                browser_arguments: false,
                window_proxy: true,
                compositing_toggle: true,
                file_open_registration: true,
            },
        }
    }

    pub fn current() -> Self {
        Self::for_os(std::env::consts::OS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSwitches {
    pub browser_args: Vec<String>,
    /// Applied per window through the webview builder.
    pub proxy: Option<Url>,
    pub disable_compositing: bool,
    /// Requested switches this platform's webview cannot honour.
    pub ignored: Vec<&'static str>,
}

/// `chromium.proxyUrl` accepts a bare `host:port`, which means plain HTTP.
pub fn proxy_endpoint(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let url = Url::parse(&candidate).ok()?;
    match url.scheme() {
        "http" | "socks5" if url.host_str().is_some() => Some(url),
        _ => None,
    }
}

impl FeatureSwitches {
    pub fn from_config(config: &UserConfig, capabilities: &PlatformCapabilities) -> Self {
        let chromium = &config.chromium;
        let mut switches = Self {
            browser_args: Vec::new(),
            proxy: None,
            disable_compositing: false,
            ignored: Vec::new(),
        };

        if let Some(raw) = config.proxy_url() {
            match proxy_endpoint(raw) {
                Some(url) if capabilities.window_proxy => switches.proxy = Some(url),
                Some(_) => switches.ignored.push("proxy"),
                None => {
                    log::warn!("[startup] unusable proxy url {raw:?}");
                    switches.ignored.push("proxy");
                }
            }
        }

        let mut chromium_args = Vec::new();
        if chromium.is_in_process_gpu_on {
            chromium_args.push(("in-process-gpu", IN_PROCESS_GPU_SWITCH));
        }
        if chromium.is_ignore_gpu_blacklist {
            chromium_args.push(("ignore-gpu-blacklist", IGNORE_GPU_BLACKLIST_SWITCH));
        }
        if chromium.is_hardware_acceleration_disable {
            if capabilities.browser_arguments {
                chromium_args.push(("disable-gpu", DISABLE_GPU_SWITCH));
            } else if capabilities.compositing_toggle {
                switches.disable_compositing = true;
            } else {
                switches.ignored.push("disable-hardware-acceleration");
            }
        }
        chromium_args.push(("autoplay-policy", AUTOPLAY_POLICY_SWITCH));

        for (name, arg) in chromium_args {
            if capabilities.browser_arguments {
                switches.browser_args.push(arg.to_string());
            } else {
                switches.ignored.push(name);
            }
        }
        switches
    }

    /// Environment entries understood by the platform webviews.
    pub fn webview_environment(&self) -> Vec<(&'static str, String)> {
        let mut entries = Vec::new();
        if !self.browser_args.is_empty() {
            entries.push((WEBVIEW2_ARGS_ENV, self.browser_args.join(" ")));
        }
        if self.disable_compositing {
            entries.push((WEBKIT_COMPOSITING_ENV, "1".to_string()));
        }
        entries
    }

    pub fn summary(&self) -> String {
        let mut parts = self.browser_args.clone();
        if let Some(proxy) = &self.proxy {
            parts.push(format!("proxy={proxy}"));
        }
        if self.disable_compositing {
            parts.push(format!("{WEBKIT_COMPOSITING_ENV}=1"));
        }
        parts.join(" ")
    }
}

#[derive(Debug)]
pub struct FeatureSwitchGate {
    switches: FeatureSwitches,
    applied: AtomicBool,
}

impl FeatureSwitchGate {
    pub fn new(switches: FeatureSwitches) -> Self {
        Self {
            switches,
            applied: AtomicBool::new(false),
        }
    }

    pub fn switches(&self) -> &FeatureSwitches {
        &self.switches
    }

    pub fn is_applied(&self) -> bool {
        self.applied.load(Ordering::Acquire)
    }

    /// Runs `apply` the first time only. Returns whether this call applied.
    pub fn ensure_applied<F>(&self, apply: F) -> bool
    where
        F: FnOnce(&FeatureSwitches),
    {
        if self
            .applied
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        apply(&self.switches);
        log::info!("[startup] feature switches applied: {}", self.switches.summary());
        if !self.switches.ignored.is_empty() {
            log::warn!(
                "[startup] not supported by this webview, ignored: {}",
                self.switches.ignored.join(", ")
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn config_with_everything_on() -> UserConfig {
        let mut config = UserConfig::default();
        config.chromium.proxy_url = "http://127.0.0.1:7890".to_string();
        config.chromium.is_in_process_gpu_on = true;
        config.chromium.is_ignore_gpu_blacklist = true;
        config.chromium.is_hardware_acceleration_disable = true;
        config
    }

    #[test]
    fn from_config_renders_all_switches_on_windows() {
        let switches = FeatureSwitches::from_config(
            &config_with_everything_on(),
            &PlatformCapabilities::for_os("windows"),
        );

        assert_eq!(
            switches.browser_args,
            vec![
                "--in-process-gpu",
                "--ignore-gpu-blacklist",
                "--disable-gpu",
                "--autoplay-policy=no-user-gesture-required",
            ]
        );
        assert_eq!(
            switches.proxy.as_ref().map(Url::as_str),
            Some("http://127.0.0.1:7890/")
        );
        assert!(switches.ignored.is_empty());
        assert!(!switches.disable_compositing);
    }

    #[test]
    fn from_config_keeps_proxy_and_reports_chromium_switches_ignored_on_linux() {
        let switches = FeatureSwitches::from_config(
            &config_with_everything_on(),
            &PlatformCapabilities::for_os("linux"),
        );

        assert!(switches.browser_args.is_empty());
        assert!(switches.proxy.is_some());
        assert!(switches.disable_compositing);
        assert_eq!(
            switches.ignored,
            vec!["in-process-gpu", "ignore-gpu-blacklist", "autoplay-policy"]
        );
        assert_eq!(
            switches.webview_environment(),
            vec![(WEBKIT_COMPOSITING_ENV, "1".to_string())]
        );
    }

    #[test]
    fn from_config_on_macos_only_applies_proxy() {
        let switches = FeatureSwitches::from_config(
            &config_with_everything_on(),
            &PlatformCapabilities::for_os("macos"),
        );

        assert!(switches.proxy.is_some());
        assert!(switches.webview_environment().is_empty());
        assert!(switches.ignored.contains(&"in-process-gpu"));
        assert!(switches.ignored.contains(&"disable-hardware-acceleration"));
    }

    #[test]
    fn from_config_always_sets_autoplay_policy_on_windows() {
        let switches = FeatureSwitches::from_config(
            &UserConfig::default(),
            &PlatformCapabilities::for_os("windows"),
        );
        assert_eq!(switches.browser_args, vec![AUTOPLAY_POLICY_SWITCH]);
        assert_eq!(
            switches.webview_environment(),
            vec![(WEBVIEW2_ARGS_ENV, AUTOPLAY_POLICY_SWITCH.to_string())]
        );
    }

    #[test]
    fn proxy_endpoint_accepts_bare_host_and_rejects_other_schemes() {
        assert_eq!(
            proxy_endpoint("127.0.0.1:1080").map(String::from),
            Some("http://127.0.0.1:1080/".to_string())
        );
        assert!(proxy_endpoint("socks5://127.0.0.1:1080").is_some());
        assert_eq!(proxy_endpoint("ftp://127.0.0.1:21"), None);
        assert_eq!(proxy_endpoint("   "), None);
    }

    #[test]
    fn platform_capabilities_only_register_file_open_off_apple() {
        assert!(!PlatformCapabilities::for_os("macos").file_open_registration);
        assert!(PlatformCapabilities::for_os("windows").file_open_registration);
        assert!(PlatformCapabilities::for_os("linux").file_open_registration);
    }

    #[test]
    fn ensure_applied_runs_exactly_once() {
        let gate = FeatureSwitchGate::new(FeatureSwitches::from_config(
            &UserConfig::default(),
            &PlatformCapabilities::for_os("linux"),
        ));
        let calls = Cell::new(0);

        assert!(gate.ensure_applied(|_| calls.set(calls.get() + 1)));
        assert!(!gate.ensure_applied(|_| calls.set(calls.get() + 1)));
        assert_eq!(calls.get(), 1);
        assert!(gate.is_applied());
    }
}
