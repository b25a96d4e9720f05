//! Hooks invoked around each play cycle (relays, stream injection, signage).
//!
//! Every hook call goes through [`TriggerSet`], which isolates faults: an
//! error or a panic in one trigger is logged, recorded as a
//! [`TriggerFailure`] and the remaining triggers still run.

use std::{
    any::Any,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    process::Stdio,
};

use log::{debug, error, warn};
use thiserror::Error;
use tokio::process::Command;

use crate::{
    cap::Alert,
    config::{CommandTriggerConfig, Language},
    media::MediaInfo,
};

/// Errors returned by a trigger.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("failed to run {command}: {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Failed(String),
}

/// Point of the play cycle at which a trigger is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerStage {
    /// Before the alerts of a cycle are queued
    Init,
    /// When the lead-in starts airing
    Start,
    /// When the lead-out finishes airing
    Stop,
    /// After each alert is queued
    Each,
}

impl fmt::Display for TriggerStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            TriggerStage::Init => "init",
            TriggerStage::Start => "start",
            TriggerStage::Stop => "stop",
            TriggerStage::Each => "each",
        };
        f.write_str(stage)
    }
}

/// What a trigger knows about the cycle while an alert is queued.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext<'a> {
    pub languages: &'a Language,
    /// Position of the alert in the cycle, from 0
    pub position: usize,
    /// Number of alerts aired in the cycle so far, this one included
    pub aired: usize,
}

/// A side effect bound to the play cycle. Every hook defaults to a no-op.
pub trait Trigger: Send + Sync {
    fn name(&self) -> &str;

    fn alert_cycle_init(&self) -> Result<(), TriggerError> {
        Ok(())
    }

    fn alert_cycle_start(&self) -> Result<(), TriggerError> {
        Ok(())
    }

    fn alert_cycle_stop(&self) -> Result<(), TriggerError> {
        Ok(())
    }

    fn alert_cycle_each(
        &self,
        _alert: &Alert,
        _media: &MediaInfo,
        _context: &CycleContext,
    ) -> Result<(), TriggerError> {
        Ok(())
    }
}

/// Record of a failed trigger invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerFailure {
    pub trigger: String,
    pub stage: TriggerStage,
    pub message: String,
}

/// The triggers of the processor, invoked with fault isolation.
#[derive(Default)]
pub struct TriggerSet {
    triggers: Vec<Box<dyn Trigger>>,
}

impl TriggerSet {
    pub fn new(triggers: Vec<Box<dyn Trigger>>) -> Self {
        TriggerSet { triggers }
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn cycle_init(&self) -> Vec<TriggerFailure> {
        self.invoke(TriggerStage::Init, |trigger| trigger.alert_cycle_init())
    }

    pub fn cycle_start(&self) -> Vec<TriggerFailure> {
        self.invoke(TriggerStage::Start, |trigger| trigger.alert_cycle_start())
    }

    pub fn cycle_stop(&self) -> Vec<TriggerFailure> {
        self.invoke(TriggerStage::Stop, |trigger| trigger.alert_cycle_stop())
    }

    pub fn cycle_each(&self, alert: &Alert, media: &MediaInfo, context: &CycleContext) -> Vec<TriggerFailure> {
        self.invoke(TriggerStage::Each, |trigger| {
            trigger.alert_cycle_each(alert, media, context)
        })
    }

    fn invoke<F>(&self, stage: TriggerStage, call: F) -> Vec<TriggerFailure>
    where
        F: Fn(&dyn Trigger) -> Result<(), TriggerError>,
    {
        let mut failures = Vec::new();
        for trigger in &self.triggers {
            let message = match catch_unwind(AssertUnwindSafe(|| call(trigger.as_ref()))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };

            error!(
                "error during alert cycle {} trigger {}: {}",
                stage,
                trigger.name(),
                message
            );
            failures.push(TriggerFailure {
                trigger: trigger.name().to_owned(),
                stage,
                message,
            });
        }
        failures
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

/// Runs a configured command when a cycle starts and another when it stops.
#[derive(Debug, Clone)]
pub struct CommandTrigger {
    name: String,
    on_start: Vec<String>,
    on_stop: Vec<String>,
}

impl CommandTrigger {
    pub fn new(config: &CommandTriggerConfig) -> Self {
        CommandTrigger {
            name: config.name.clone(),
            on_start: config.on_start.clone(),
            on_stop: config.on_stop.clone(),
        }
    }

    /// Spawns `argv` without waiting for it; its exit status is logged.
    ///
    /// Must be called from within the tokio runtime.
    fn spawn(&self, argv: &[String]) -> Result<(), TriggerError> {
        let Some((program, args)) = argv.split_first() else {
            return Ok(());
        };
        debug!("trigger {} running {:?}", self.name, argv);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| TriggerError::Command {
                command: program.clone(),
                source,
            })?;

        let name = self.name.clone();
        let command = program.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => warn!("trigger {} command {} exited with {}", name, command, status),
                Err(e) => warn!("trigger {} command {} failed: {}", name, command, e),
            }
        });
        Ok(())
    }
}

impl Trigger for CommandTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn alert_cycle_start(&self) -> Result<(), TriggerError> {
        self.spawn(&self.on_start)
    }

    fn alert_cycle_stop(&self) -> Result<(), TriggerError> {
        self.spawn(&self.on_stop)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::cap::AlertXml;

    /// Trigger recording every invocation.
    #[derive(Default, Clone)]
    pub(crate) struct RecordingTrigger {
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl Trigger for RecordingTrigger {
        fn name(&self) -> &str {
            "recording"
        }

        fn alert_cycle_init(&self) -> Result<(), TriggerError> {
            self.calls.lock().unwrap().push("init".to_owned());
            Ok(())
        }

        fn alert_cycle_start(&self) -> Result<(), TriggerError> {
            self.calls.lock().unwrap().push("start".to_owned());
            Ok(())
        }

        fn alert_cycle_stop(&self) -> Result<(), TriggerError> {
            self.calls.lock().unwrap().push("stop".to_owned());
            Ok(())
        }

        fn alert_cycle_each(
            &self,
            alert: &Alert,
            _media: &MediaInfo,
            _context: &CycleContext,
        ) -> Result<(), TriggerError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("each {}", alert.identifier));
            Ok(())
        }
    }

    struct FailingTrigger;

    impl Trigger for FailingTrigger {
        fn name(&self) -> &str {
            "failing"
        }

        fn alert_cycle_start(&self) -> Result<(), TriggerError> {
            Err(TriggerError::Failed("relay unplugged".to_owned()))
        }

        fn alert_cycle_stop(&self) -> Result<(), TriggerError> {
            panic!("serial port vanished");
        }
    }

    struct CountingTrigger(Arc<AtomicUsize>);

    impl Trigger for CountingTrigger {
        fn name(&self) -> &str {
            "counting"
        }

        fn alert_cycle_stop(&self) -> Result<(), TriggerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_error_is_recorded_and_others_still_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let triggers = TriggerSet::new(vec![
            Box::new(FailingTrigger),
            Box::new(CountingTrigger(count.clone())),
        ]);

        let failures = triggers.cycle_start();
        assert_eq!(
            failures,
            vec![TriggerFailure {
                trigger: "failing".to_owned(),
                stage: TriggerStage::Start,
                message: "relay unplugged".to_owned(),
            }]
        );

        let failures = triggers.cycle_stop();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, TriggerStage::Stop);
        assert!(failures[0].message.contains("serial port vanished"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_hooks_are_noops() {
        struct Silent;
        impl Trigger for Silent {
            fn name(&self) -> &str {
                "silent"
            }
        }

        let triggers = TriggerSet::new(vec![Box::new(Silent)]);
        let alert = AlertXml::new("X001").parse();
        let languages = Language::default();
        let context = CycleContext {
            languages: &languages,
            position: 0,
            aired: 1,
        };

        assert!(triggers.cycle_init().is_empty());
        assert!(triggers.cycle_each(&alert, &MediaInfo::default(), &context).is_empty());
    }

    #[tokio::test]
    async fn test_command_trigger_missing_program() {
        let trigger = CommandTrigger::new(&CommandTriggerConfig {
            name: "relay".to_owned(),
            on_start: vec!["alertcast-no-such-relay".to_owned(), "on".to_owned()],
            on_stop: Vec::new(),
        });

        assert!(matches!(
            trigger.alert_cycle_start(),
            Err(TriggerError::Command { .. })
        ));
        assert!(trigger.alert_cycle_stop().is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_trigger_runs_command() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("relay-on");
        let trigger = CommandTrigger::new(&CommandTriggerConfig {
            name: "relay".to_owned(),
            on_start: vec!["touch".to_owned(), marker.display().to_string()],
            on_stop: Vec::new(),
        });

        trigger.alert_cycle_start().unwrap();

        for _ in 0..100 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(marker.exists());
    }
}
