//! Push-style receivers for build progress.

use sandcast_state::{BuildEvent, LogLevel};

/// Receives every build event as it arrives, in order.
///
/// Implemented for any `FnMut(&BuildEvent) + Send` closure.
pub trait BuildLogSink: Send {
    fn on_event(&mut self, event: &BuildEvent);
}

impl<F> BuildLogSink for F
where
    F: FnMut(&BuildEvent) + Send,
{
    fn on_event(&mut self, event: &BuildEvent) {
        self(event)
    }
}

/// Forwards build events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl BuildLogSink for TracingLogSink {
    fn on_event(&mut self, event: &BuildEvent) {
        match event {
            BuildEvent::StepStarted { index } => tracing::info!(step = index, "step started"),
            BuildEvent::Log(record) => match record.level {
                LogLevel::Debug => tracing::debug!(step = ?record.step, "{}", record.message),
                LogLevel::Info => tracing::info!(step = ?record.step, "{}", record.message),
                LogLevel::Warn => tracing::warn!(step = ?record.step, "{}", record.message),
                LogLevel::Error => tracing::error!(step = ?record.step, "{}", record.message),
            },
            BuildEvent::StepFailed {
                index, exit_code, ..
            } => tracing::error!(step = index, exit_code = ?exit_code, "step failed"),
            BuildEvent::Completed { artifact } => {
                tracing::info!(artifact = %artifact, "build completed")
            }
            BuildEvent::Failed { reason } => tracing::error!(reason = %reason, "build failed"),
        }
    }
}

/// Collects events into a vector.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    pub events: Vec<BuildEvent>,
}

impl BuildLogSink for CollectingSink {
    fn on_event(&mut self, event: &BuildEvent) {
        self.events.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandcast_state::LogRecord;

    #[test]
    fn test_closure_is_a_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = |e: &BuildEvent| seen.push(e.is_terminal());
            sink.on_event(&BuildEvent::StepStarted { index: 0 });
            sink.on_event(&BuildEvent::Failed {
                reason: "boom".to_string(),
            });
        }
        assert_eq!(seen, vec![false, true]);
    }

    #[test]
    fn test_tracing_sink_accepts_every_event() {
        let mut sink = TracingLogSink;
        sink.on_event(&BuildEvent::Log(LogRecord::info(Some(1), "RUN apt-get update")));
        sink.on_event(&BuildEvent::StepFailed {
            index: 1,
            exit_code: Some(100),
            output: "E: broken".to_string(),
        });
    }
}
