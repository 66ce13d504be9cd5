//! First-run population of the data directory.
//!
//! Content folders missing from the data directory are copied from the
//! bundled defaults. The HTTPS asset server needs `certificate/cert.crt` and
//! `certificate/key.pem`; a bundled pair is copied when present, otherwise a
//! self-signed `localhost` certificate is generated once and kept.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::{paths::AppPaths, trust::certificate_fingerprint, trust::leaf_certificate_from_pem};

/// Folders shipped under the bundled `bin/` resource directory.
pub const BUNDLED_FOLDERS: [&str; 4] = ["resourcepack", "extension", "tool", "certificate"];

const CERTIFICATE_HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        from: String,
        to: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to generate server certificate: {0}")]
    Certificate(#[from] rcgen::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub copied: Vec<String>,
    pub generated_certificate: bool,
}

pub fn provision_data_dir(
    paths: &AppPaths,
    bundled: Option<&Path>,
) -> Result<ProvisionReport, ProvisionError> {
    let mut report = ProvisionReport::default();

    for folder in BUNDLED_FOLDERS {
        let target = paths.data_dir.join(folder);
        if target.exists() {
            continue;
        }
        let Some(source) = bundled.map(|dir| dir.join(folder)).filter(|dir| dir.is_dir()) else {
            continue;
        };
        copy_dir(&source, &target)?;
        log::info!("[startup] copied bundled {folder} into {}", paths.data_dir.display());
        report.copied.push(folder.to_string());
    }

    for dir in [
        paths.resource_pack_dir(),
        paths.extension_dir(),
        paths.tool_dir(),
    ] {
        fs::create_dir_all(&dir).map_err(|source| write_error(&dir, source))?;
    }

    report.generated_certificate = ensure_server_certificate(paths)?;
    Ok(report)
}

/// Returns true when a new certificate was written.
pub fn ensure_server_certificate(paths: &AppPaths) -> Result<bool, ProvisionError> {
    let cert_path = paths.certificate_file();
    let key_path = paths.private_key_file();
    if cert_path.is_file() && key_path.is_file() {
        return Ok(false);
    }

    let hosts = CERTIFICATE_HOSTS.iter().map(|host| host.to_string()).collect::<Vec<_>>();
    let generated = rcgen::generate_simple_self_signed(hosts)?;

    if let Some(dir) = cert_path.parent() {
        fs::create_dir_all(dir).map_err(|source| write_error(dir, source))?;
    }
    fs::write(&key_path, generated.key_pair.serialize_pem())
        .map_err(|source| write_error(&key_path, source))?;
    fs::write(&cert_path, generated.cert.pem()).map_err(|source| write_error(&cert_path, source))?;

    log::info!(
        "[trust] generated local server certificate {}",
        certificate_fingerprint(generated.cert.der())
    );
    Ok(true)
}

/// Fingerprint of the certificate the local HTTPS server presents, if any.
pub fn local_certificate_fingerprint(paths: &AppPaths) -> Option<String> {
    let pem = fs::read_to_string(paths.certificate_file()).ok()?;
    leaf_certificate_from_pem(&pem).map(|der| certificate_fingerprint(&der))
}

fn write_error(path: &Path, source: io::Error) -> ProvisionError {
    ProvisionError::Write {
        path: path.display().to_string(),
        source,
    }
}

fn copy_dir(from: &Path, to: &Path) -> Result<(), ProvisionError> {
    let copy_error = |source: io::Error| ProvisionError::Copy {
        from: from.display().to_string(),
        to: to.display().to_string(),
        source,
    };

    fs::create_dir_all(to).map_err(copy_error)?;
    for entry in fs::read_dir(from).map_err(copy_error)? {
        let entry = entry.map_err(copy_error)?;
        let target: PathBuf = to.join(entry.file_name());
        if entry.file_type().map_err(copy_error)?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(copy_error)?;
        }
    }
    Ok(())
}
