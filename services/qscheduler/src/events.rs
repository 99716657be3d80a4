//! Scheduler events forwarded to logs.

use qs_events::{EventFields, EventSink, TaskEvent, WithFields};
use tracing::{debug, warn};

/// Event sink that logs every event at debug level under the
/// `qscheduler::events` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn add_event(&mut self, event: TaskEvent) {
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, task_id = %event.task_id, "Failed to encode task event");
                return;
            }
        };
        debug!(
            target: "qscheduler::events",
            kind = %event.kind(),
            task_id = %event.task_id,
            worker_id = event.worker_id.as_ref().map(|w| w.as_str()),
            pool = event.fields.scheduler_id.as_deref(),
            event = %payload,
            "task event"
        );
    }

    fn with_fields(&mut self, fields: EventFields) -> WithFields<'_> {
        WithFields::new(self, fields)
    }
}
