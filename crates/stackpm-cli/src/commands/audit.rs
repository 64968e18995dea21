use super::block_on_session;
use miette::{IntoDiagnostic, Result};
use serde_json::Value;
use stackpm_core::{audit, Config, PkgConfig};
use tracing::debug;

pub fn run(config: &Config, pkg_config: &PkgConfig) -> Result<()> {
    debug!(registry = %pkg_config.registry_url, "audit command invoked");

    let report = block_on_session(pkg_config, |ctx| async move {
        audit(&ctx, &config.cwd).await.into_diagnostic()
    })?;

    if config.json_logs {
        println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
        return Ok(());
    }

    let lines = advisory_lines(&report);
    if lines.is_empty() {
        println!("No known vulnerabilities found");
    } else {
        for line in &lines {
            println!("{line}");
        }
        println!("\n{} advisories", lines.len());
    }
    Ok(())
}

/// One line per advisory in a bulk advisory response (`name -> [advisory]`).
fn advisory_lines(report: &Value) -> Vec<String> {
    let Some(packages) = report.as_object() else {
        return Vec::new();
    };

    packages
        .iter()
        .flat_map(|(name, advisories)| {
            advisories
                .as_array()
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .map(move |advisory| {
                    let severity = advisory["severity"].as_str().unwrap_or("unknown");
                    let title = advisory["title"].as_str().unwrap_or("(no title)");
                    match advisory["url"].as_str() {
                        Some(url) => format!("{severity:>8}  {name}: {title} ({url})"),
                        None => format!("{severity:>8}  {name}: {title}"),
                    }
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advisory_lines() {
        let report = serde_json::json!({
            "minimist": [
                { "id": 1, "severity": "critical", "title": "Prototype Pollution", "url": "https://example.test/1" }
            ],
            "lodash": [
                { "id": 2, "severity": "high", "title": "Command Injection" }
            ],
            "clean": []
        });

        let lines = advisory_lines(&report);
        assert_eq!(
            lines,
            vec![
                "    high  lodash: Command Injection".to_string(),
                "critical  minimist: Prototype Pollution (https://example.test/1)".to_string(),
            ]
        );
    }

    #[test]
    fn test_advisory_lines_unexpected_shape() {
        assert!(advisory_lines(&serde_json::json!([1, 2])).is_empty());
        assert!(advisory_lines(&serde_json::json!({ "a": "nope" })).is_empty());
    }
}
