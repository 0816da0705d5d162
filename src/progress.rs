// src/progress.rs

//! Line-structured progress events.
//!
//! Every event is logged through `tracing`; a [`Reporter`] created with
//! [`Reporter::channel`] additionally forwards events to a consumer (the
//! binary prints them to stdout).

use std::fmt;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::types::Host;

const SUCCESS_MARK: char = '\u{2713}';
const ERROR_MARK: char = '\u{2717}';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    StageStarted { subsystem: String },
    StageFailed { subsystem: String },
    StageFinished { subsystem: String },
    CommandSucceeded { host: Host, message: String },
    CommandFailed { host: Host, message: String },
    ComponentsStopped { host: Host, components: Vec<String> },
}

impl ProgressEvent {
    fn is_error(&self) -> bool {
        matches!(
            self,
            ProgressEvent::StageFailed { .. } | ProgressEvent::CommandFailed { .. }
        )
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::StageStarted { subsystem } => {
                write!(f, "Deploying subsystem '{subsystem}'")
            }
            ProgressEvent::StageFailed { subsystem } => {
                write!(f, "Error deploying subsystem '{subsystem}'")
            }
            ProgressEvent::StageFinished { subsystem } => {
                write!(f, "Finished deploying subsystem '{subsystem}'")
            }
            ProgressEvent::CommandSucceeded { host, message } => {
                write!(f, "{host} {SUCCESS_MARK} {message}")
            }
            ProgressEvent::CommandFailed { host, message } => {
                write!(f, "{host} {ERROR_MARK} {message}")
            }
            ProgressEvent::ComponentsStopped { host, components } => {
                let (noun, verb) = if components.len() == 1 {
                    ("Component", "has")
                } else {
                    ("Components", "have")
                };
                write!(
                    f,
                    "{host} {SUCCESS_MARK} {noun} {} {verb} been stopped",
                    join_names(components)
                )
            }
        }
    }
}

/// Join names as "a", "a and b", "a, b and c".
pub fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

/// Cheap, cloneable handle used to publish [`ProgressEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl Reporter {
    /// A reporter that only logs.
    pub fn silent() -> Self {
        Self::default()
    }

    /// A reporter that logs and forwards every event to the returned receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if event.is_error() {
            error!(target: "shellfleet::progress", "{event}");
        } else {
            info!(target: "shellfleet::progress", "{event}");
        }

        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is listening any more; logging above
            // already recorded the event.
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Host {
        Host::new("node1", 22, "deploy")
    }

    #[test]
    fn joins_names_with_commas_and_final_and() {
        assert_eq!(join_names(&[]), "");
        assert_eq!(join_names(&["a".into()]), "a");
        assert_eq!(join_names(&["a".into(), "b".into()]), "a and b");
        assert_eq!(
            join_names(&["a".into(), "b".into(), "c".into()]),
            "a, b and c"
        );
    }

    #[test]
    fn stopped_components_use_singular_and_plural_phrasing() {
        let one = ProgressEvent::ComponentsStopped {
            host: host(),
            components: vec!["api".into()],
        };
        assert_eq!(
            one.to_string(),
            "deploy@node1:22 \u{2713} Component api has been stopped"
        );

        let many = ProgressEvent::ComponentsStopped {
            host: host(),
            components: vec!["api".into(), "db".into()],
        };
        assert_eq!(
            many.to_string(),
            "deploy@node1:22 \u{2713} Components api and db have been stopped"
        );
    }

    #[tokio::test]
    async fn channel_reporter_forwards_events() {
        let (reporter, mut rx) = Reporter::channel();
        reporter.emit(ProgressEvent::StageStarted {
            subsystem: "backend".into(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.to_string(), "Deploying subsystem 'backend'");
    }
}
