//! Numeric kernel sources for the wgpu backend.
//!
//! A kernel directory holds one `<entry point>.wgsl` file per numeric
//! kernel plus an optional `sph_common.wgsl` that is prepended to each.

use std::fs;
use std::path::{Path, PathBuf};

use engine::Kernel;
use tracing::debug;

use crate::RunnerError;

/// Shared helpers prepended to every kernel source when present.
pub const COMMON_FILE: &str = "sph_common.wgsl";

/// Source file for `kernel` inside `dir`.
pub fn kernel_path(dir: &Path, kernel: Kernel) -> PathBuf {
    dir.join(format!("{}.wgsl", kernel.name()))
}

fn read(path: PathBuf) -> Result<String, RunnerError> {
    fs::read_to_string(&path).map_err(|source| RunnerError::Io { path, source })
}

/// Read the six numeric kernel sources from `dir`.
pub fn load_kernel_sources(dir: &Path) -> Result<Vec<(Kernel, String)>, RunnerError> {
    let common_path = dir.join(COMMON_FILE);
    let common = if common_path.exists() {
        read(common_path)?
    } else {
        String::new()
    };

    let mut sources = Vec::new();
    for kernel in Kernel::ALL.into_iter().filter(|k| !k.is_spatial()) {
        let path = kernel_path(dir, kernel);
        let body = read(path.clone())?;
        if !body.contains(&format!("fn {}(", kernel.name())) {
            return Err(RunnerError::Invalid(format!(
                "{} does not define entry point `{}`",
                path.display(),
                kernel.name()
            )));
        }
        debug!(kernel = kernel.name(), path = %path.display(), "kernel source loaded");
        sources.push((kernel, format!("{common}\n{body}")));
    }
    Ok(sources)
}
