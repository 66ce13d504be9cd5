//! Single-instance bookkeeping.
//!
//! Arbitration between OS processes is done by the shell's single-instance
//! plugin: a later launch forwards its argv and working directory to the
//! primary and exits with code 0. This module owns what the primary does with
//! that: the `isPrimary` flag and turning a forwarded invocation into an import
//! path.

use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

/// `[prog]`; anything after it is treated as an import request.
pub const BASE_INVOCATION_LEN: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedInvocation {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
}

impl ForwardedInvocation {
    pub fn new(argv: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            argv,
            cwd: cwd.into(),
        }
    }

    pub fn import_path(&self) -> Option<PathBuf> {
        import_path_from_args(&self.argv, &self.cwd)
    }
}

/// First extra positional argument, resolved against the invoking process's cwd.
pub fn import_path_from_args(argv: &[String], cwd: &Path) -> Option<PathBuf> {
    let raw = argv
        .iter()
        .skip(BASE_INVOCATION_LEN)
        .map(|arg| arg.trim())
        .find(|arg| !arg.is_empty() && !arg.starts_with('-'))?;

    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Some(path)
    } else {
        Some(cwd.join(path))
    }
}

#[derive(Debug, Default)]
pub struct ProcessInstanceState {
    is_primary: OnceLock<bool>,
}

impl ProcessInstanceState {
    /// Set once, after arbitration. Later calls keep the first verdict.
    pub fn settle(&self, is_primary: bool) -> bool {
        *self.is_primary.get_or_init(|| is_primary)
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary.get().copied().unwrap_or(false)
    }

    pub fn is_settled(&self) -> bool {
        self.is_primary.get().is_some()
    }
}

#[derive(Debug, Default)]
pub struct SingleInstanceCoordinator {
    state: ProcessInstanceState,
}

impl SingleInstanceCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_primary(&self) {
        if self.state.settle(true) {
            log::info!("[instance] this process owns the application");
        }
    }

    pub fn is_primary(&self) -> bool {
        self.state.is_primary()
    }

    pub fn accept_forwarded(&self, invocation: &ForwardedInvocation) -> Option<PathBuf> {
        if !self.is_primary() {
            log::warn!("[instance] ignoring forwarded invocation before arbitration settled");
            return None;
        }

        log::info!(
            "[instance] second launch forwarded {} argument(s) from {}",
            invocation.argv.len(),
            invocation.cwd.display()
        );
        invocation.import_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn import_path_from_args_ignores_base_invocation() {
        assert_eq!(import_path_from_args(&args(&["majsoul-plus"]), Path::new("/home")), None);
    }

    #[test]
    fn import_path_from_args_resolves_relative_paths_against_cwd() {
        assert_eq!(
            import_path_from_args(&args(&["majsoul-plus", "ext/foo.mspe"]), Path::new("/home/u")),
            Some(PathBuf::from("/home/u/ext/foo.mspe"))
        );
    }

    #[test]
    fn import_path_from_args_skips_flags() {
        assert_eq!(
            import_path_from_args(
                &args(&["majsoul-plus", "--inspect", "/data/foo.mspe"]),
                Path::new("/home/u")
            ),
            Some(PathBuf::from("/data/foo.mspe"))
        );
    }

    #[test]
    fn process_instance_state_settles_once() {
        let state = ProcessInstanceState::default();
        assert!(!state.is_settled());
        assert!(state.settle(true));
        assert!(state.settle(false));
        assert!(state.is_primary());
    }

    #[test]
    fn accept_forwarded_requires_primary() {
        let coordinator = SingleInstanceCoordinator::new();
        let invocation =
            ForwardedInvocation::new(args(&["majsoul-plus", "/data/foo.mspe"]), "/home/u");

        assert_eq!(coordinator.accept_forwarded(&invocation), None);
        coordinator.mark_primary();
        assert_eq!(
            coordinator.accept_forwarded(&invocation),
            Some(PathBuf::from("/data/foo.mspe"))
        );
    }
}
