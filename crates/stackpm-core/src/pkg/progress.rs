//! Progress events emitted by install and uninstall.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Pipeline stage a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Initialization,
    Resolving,
    Installing,
    Extracting,
    Finalizing,
    Uninstalling,
    Done,
}

impl Stage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialization => "Initialization",
            Self::Resolving => "Resolving",
            Self::Installing => "Installing",
            Self::Extracting => "Extracting",
            Self::Finalizing => "Finalizing",
            Self::Uninstalling => "Uninstalling",
            Self::Done => "Done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress event. Absent fields are left out when serialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    pub stage: Stage,
}

impl Progress {
    /// An event carrying only a stage.
    #[must_use]
    pub fn stage(stage: Stage) -> Self {
        Self {
            name: None,
            version: None,
            progress: None,
            stage,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Attach a completion fraction, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_progress(mut self, fraction: f64) -> Self {
        self.progress = Some(fraction.clamp(0.0, 1.0));
        self
    }
}

type Callback = Box<dyn FnMut(Progress) + Send>;

/// Delivers progress events to a caller-supplied callback.
///
/// Clones share the callback; calls are serialised so it is never entered
/// twice at once.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    callback: Option<Arc<Mutex<Callback>>>,
}

impl ProgressReporter {
    /// Wrap a callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut(Progress) + Send + 'static,
    {
        Self {
            callback: Some(Arc::new(Mutex::new(Box::new(callback)))),
        }
    }

    /// A reporter that drops every event.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Deliver one event.
    pub fn report(&self, event: Progress) {
        let Some(callback) = &self.callback else {
            return;
        };
        let mut guard = match callback.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        (*guard)(event);
    }

    /// Shorthand for a stage-only event.
    pub fn stage(&self, stage: Stage) {
        self.report(Progress::stage(stage));
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialises_without_absent_fields() {
        let json = serde_json::to_string(&Progress::stage(Stage::Done)).unwrap();
        assert_eq!(json, r#"{"stage":"Done"}"#);

        let event = Progress::stage(Stage::Extracting)
            .with_name("react")
            .with_version("18.2.0")
            .with_progress(1.0);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["name"], "react");
        assert_eq!(value["version"], "18.2.0");
        assert_eq!(value["progress"], 1.0);
        assert_eq!(value["stage"], "Extracting");
    }

    #[test]
    fn test_progress_is_clamped() {
        assert_eq!(Progress::stage(Stage::Extracting).with_progress(1.7).progress, Some(1.0));
        assert_eq!(Progress::stage(Stage::Extracting).with_progress(-0.2).progress, Some(0.0));
    }

    #[test]
    fn test_reporter_collects_from_clones() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = ProgressReporter::new(move |p: Progress| sink.lock().unwrap().push(p.stage));

        let clone = reporter.clone();
        reporter.stage(Stage::Initialization);
        clone.stage(Stage::Done);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Stage::Initialization, Stage::Done]
        );
    }

    #[test]
    fn test_none_reporter_is_silent() {
        ProgressReporter::none().stage(Stage::Done);
    }
}
