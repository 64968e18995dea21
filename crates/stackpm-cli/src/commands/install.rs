use super::{block_on_session, print_summary, progress};
use miette::{IntoDiagnostic, Result};
use stackpm_core::{install, Config, InstallOptions, PkgConfig};
use tracing::debug;

pub fn run(config: &Config, pkg_config: &PkgConfig, specs: &[String], save_dev: bool) -> Result<()> {
    debug!(
        registry = %pkg_config.registry_url,
        concurrency = pkg_config.max_concurrent,
        specs = specs.len(),
        "install command invoked"
    );

    let reporter = progress::reporter(config.json_logs);
    let options = InstallOptions { save_dev };

    let summary = block_on_session(pkg_config, |ctx| async move {
        install(&ctx, &config.cwd, specs, &options, &reporter)
            .await
            .into_diagnostic()
    })?;

    print_summary(&summary, config.json_logs)
}
