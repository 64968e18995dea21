use super::{block_on_session, print_summary, progress};
use miette::{IntoDiagnostic, Result};
use stackpm_core::{uninstall, Config, PkgConfig};
use tracing::debug;

pub fn run(config: &Config, pkg_config: &PkgConfig, names: &[String]) -> Result<()> {
    debug!(names = ?names, "uninstall command invoked");

    let reporter = progress::reporter(config.json_logs);
    let summary = block_on_session(pkg_config, |ctx| async move {
        uninstall(&ctx, &config.cwd, names, &reporter)
            .await
            .into_diagnostic()
    })?;

    print_summary(&summary, config.json_logs)
}
