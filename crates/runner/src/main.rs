//! `sph-run`: run a dam-break configuration on the GPU.
//!
//! Usage: `sph-run [CONFIG]` (default `configs/dam_break.json`).

use std::path::PathBuf;
use std::process::ExitCode;

use runner::{RunConfig, RunnerError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runner=info,engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("configs/dam_break.json"));

    match execute(config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                tracing::error!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "gpu")]
fn execute(config_path: PathBuf) -> Result<(), RunnerError> {
    tracing::info!(config = %config_path.display(), "loading run configuration");
    let config = RunConfig::load(&config_path)?;

    let mut backend = engine::WgpuBackend::new().map_err(|source| engine::EngineError::Device {
        phase: "configure",
        source,
    })?;
    let kernels_dir = config.resolve_kernels_dir(&config_path);
    for (kernel, source) in runner::kernels::load_kernel_sources(&kernels_dir)? {
        backend.register_source(kernel, source);
    }

    let mut engine = runner::build_engine(&config, backend)?;
    runner::run(&mut engine, &config)?;
    Ok(())
}

#[cfg(not(feature = "gpu"))]
fn execute(config_path: PathBuf) -> Result<(), RunnerError> {
    let config = RunConfig::load(&config_path)?;
    Err(RunnerError::Invalid(format!(
        "`{}` needs the wgpu backend; rebuild with the `gpu` feature",
        config.name
    )))
}
