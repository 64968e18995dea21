//! Terminal rendering of install progress events.

use stackpm_core::{Progress, ProgressReporter, Stage};

/// A reporter that writes events to the terminal.
///
/// With `json`, each event is one JSON line on stdout. Otherwise stage
/// changes and finished packages are written to stderr.
pub fn reporter(json: bool) -> ProgressReporter {
    if json {
        ProgressReporter::new(|event: Progress| {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{line}");
            }
        })
    } else {
        let mut lines = HumanLines::default();
        ProgressReporter::new(move |event: Progress| {
            if let Some(line) = lines.line_for(&event) {
                eprintln!("{line}");
            }
        })
    }
}

/// Turns the event stream into a short human-readable log.
#[derive(Debug, Default)]
struct HumanLines {
    stage: Option<Stage>,
}

impl HumanLines {
    fn line_for(&mut self, event: &Progress) -> Option<String> {
        let changed = self.stage != Some(event.stage);
        self.stage = Some(event.stage);

        match event.stage {
            Stage::Extracting => match (&event.name, &event.version, event.progress) {
                (Some(name), Some(version), Some(p)) if p >= 1.0 => {
                    Some(format!("  + {name}@{version}"))
                }
                _ if changed => Some("Extracting packages".to_string()),
                _ => None,
            },
            Stage::Uninstalling => event.name.as_ref().map(|name| format!("  - {name}")),
            Stage::Resolving if changed => Some("Resolving dependencies".to_string()),
            Stage::Finalizing if changed => Some("Writing lockfile".to_string()),
            Stage::Done if changed => Some("Done".to_string()),
            _ => None,
        }
    }
}
