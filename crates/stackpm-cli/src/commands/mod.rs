pub mod audit;
pub mod install;
pub mod progress;
pub mod uninstall;
pub mod version;

use miette::{IntoDiagnostic, Result};
use stackpm_core::{InstallSummary, PkgConfig, PkgContext};
use std::future::Future;

/// Session settings: environment first, then command-line overrides.
pub fn pkg_config(registry: Option<&str>, concurrency: Option<u32>) -> Result<PkgConfig> {
    let mut config = PkgConfig::from_env().into_diagnostic()?;
    if let Some(url) = registry {
        config = config.with_registry_url(url);
    }
    if let Some(n) = concurrency {
        config = config.with_max_concurrent(n as usize);
    }
    Ok(config)
}

/// Build a session and drive `f` to completion on a fresh runtime.
pub fn block_on_session<F, Fut, T>(pkg_config: &PkgConfig, f: F) -> Result<T>
where
    F: FnOnce(PkgContext) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let ctx = PkgContext::new(pkg_config).into_diagnostic()?;
    runtime.block_on(f(ctx))
}

/// Print the outcome of an install run.
pub fn print_summary(summary: &InstallSummary, json: bool) -> Result<()> {
    if json {
        let line = serde_json::json!({
            "ok": summary.failed.is_empty(),
            "packages": summary.packages,
            "downloaded": summary.downloaded,
            "reused": summary.reused,
            "failed": summary.failed,
        });
        println!("{}", serde_json::to_string(&line).into_diagnostic()?);
        return Ok(());
    }

    println!(
        "{} packages ({} downloaded, {} up to date)",
        summary.packages, summary.downloaded, summary.reused
    );
    for path in &summary.failed {
        eprintln!("! {path}: install failed");
    }
    Ok(())
}
