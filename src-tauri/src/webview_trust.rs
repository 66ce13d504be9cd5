//! Certificate error hooks inside the game webview.
//!
//! The game page loads from the local asset server, whose certificate is not
//! issued by a public CA. Each platform webview reports the failing
//! certificate; it is let through only when its fingerprint matches
//! [`CertificateTrustOverride`]. Every other error keeps the webview's default
//! (blocking) behaviour.
//!
//! | platform | hook                                                              |
//! |----------|-------------------------------------------------------------------|
//! | windows  | `ICoreWebView2_14::ServerCertificateErrorDetected`                |
//! | linux    | `load-failed-with-tls-errors` + `allow_tls_certificate_for_host`  |
//! | macos    | none; wry owns the navigation delegate                            |

use majsoul_plus_core::{trust::CertificateTrustOverride, window_mode::WindowError};
use tauri::WebviewWindow;

use crate::logging::{append_desktop_log, DesktopLogCategory};

fn log(message: &str) {
    append_desktop_log(DesktopLogCategory::Runtime, message);
}

/// Must be installed before the window navigates to the asset server.
pub(crate) fn install_certificate_hook(
    window: &WebviewWindow,
    trust: CertificateTrustOverride,
) -> Result<(), WindowError> {
    window
        .with_webview(move |webview| {
            if let Err(error) = platform::install(webview, trust) {
                log(&format!("certificate hook unavailable: {error}"));
            }
        })
        .map_err(|error| WindowError::Platform(error.to_string()))
}

#[cfg(windows)]
mod platform {
    use majsoul_plus_core::trust::{CertificateTrustOverride, TrustDecision};
    use tauri::webview::PlatformWebview;
    use webview2_com::{
        take_pwstr,
        Microsoft::Web::WebView2::Win32::{
            ICoreWebView2ServerCertificateErrorDetectedEventArgs, ICoreWebView2_14,
            COREWEBVIEW2_SERVER_CERTIFICATE_ERROR_ACTION_ALWAYS_ALLOW,
            COREWEBVIEW2_SERVER_CERTIFICATE_ERROR_ACTION_DEFAULT,
        },
        ServerCertificateErrorDetectedEventHandler,
    };
    use windows::core::{Interface, PWSTR};

    use super::log;

    fn decide(
        args: &ICoreWebView2ServerCertificateErrorDetectedEventArgs,
        trust: &CertificateTrustOverride,
    ) -> windows::core::Result<()> {
        let mut uri = PWSTR::null();
        let mut pem = PWSTR::null();
        unsafe {
            args.RequestUri(&mut uri)?;
            args.ServerCertificate()?.ToPemEncoding(&mut pem)?;
        }
        let uri = take_pwstr(uri);
        let pem = take_pwstr(pem);

        let action = match trust.evaluate_pem(&pem) {
            TrustDecision::Accept => {
                log(&format!("trusted pinned certificate for {uri}"));
                COREWEBVIEW2_SERVER_CERTIFICATE_ERROR_ACTION_ALWAYS_ALLOW
            }
            TrustDecision::Default => {
                log(&format!("certificate error for {uri} left to the webview"));
                COREWEBVIEW2_SERVER_CERTIFICATE_ERROR_ACTION_DEFAULT
            }
        };
        unsafe { args.SetAction(action) }
    }

    pub(super) fn install(
        webview: PlatformWebview,
        trust: CertificateTrustOverride,
    ) -> Result<(), String> {
        let handler = ServerCertificateErrorDetectedEventHandler::create(Box::new(
            move |_sender, args| match args {
                Some(args) => decide(&args, &trust),
                None => Ok(()),
            },
        ));

        let mut token = 0;
        unsafe {
            let core = webview
                .controller()
                .CoreWebView2()
                .map_err(|error| error.to_string())?;
            // Older runtimes lack the interface; the page then fails closed.
            let core = core
                .cast::<ICoreWebView2_14>()
                .map_err(|error| format!("WebView2 runtime too old: {error}"))?;
            core.add_ServerCertificateErrorDetected(&handler, &mut token)
                .map_err(|error| error.to_string())?;
        }
        log("certificate hook installed (WebView2)");
        Ok(())
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use gtk::glib::{prelude::ObjectExt, GString};
    use majsoul_plus_core::trust::{CertificateTrustOverride, TrustDecision};
    use tauri::webview::PlatformWebview;
    use url::Url;
    use webkit2gtk::{WebContextExt, WebViewExt};

    use super::log;

    pub(super) fn install(
        webview: PlatformWebview,
        trust: CertificateTrustOverride,
    ) -> Result<(), String> {
        let webview = webview.inner();
        let context = webview
            .context()
            .ok_or_else(|| "webview has no web context".to_string())?;

        webview.connect_load_failed_with_tls_errors(move |webview, failing_uri, certificate, _| {
            let pem = certificate
                .property::<Option<GString>>("certificate-pem")
                .unwrap_or_default();
            if trust.evaluate_pem(&pem) != TrustDecision::Accept {
                log(&format!("certificate error for {failing_uri} left to the webview"));
                return false;
            }
            let Some(host) = Url::parse(failing_uri)
                .ok()
                .and_then(|url| url.host_str().map(str::to_owned))
            else {
                return false;
            };

            log(&format!("trusted pinned certificate for {host}"));
            context.allow_tls_certificate_for_host(certificate, &host);
            webview.load_uri(failing_uri);
            true
        });
        log("certificate hook installed (WebKitGTK)");
        Ok(())
    }
}

#[cfg(not(any(windows, target_os = "linux")))]
mod platform {
    use majsoul_plus_core::trust::CertificateTrustOverride;
    use tauri::webview::PlatformWebview;

    pub(super) fn install(
        _webview: PlatformWebview,
        _trust: CertificateTrustOverride,
    ) -> Result<(), String> {
        Err("this webview exposes no certificate error callback".to_string())
    }
}
