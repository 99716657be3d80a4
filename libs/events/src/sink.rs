//! Event sinks.
//!
//! The scheduler and reconciler take a `&mut dyn EventSink` on every mutating
//! call. Callers pick where events go: discard them, buffer them for later
//! inspection, or forward them to logs.

use crate::{EventFields, TaskEvent};

/// Receives task events synchronously during scheduler mutations.
pub trait EventSink {
    /// Records an event.
    fn add_event(&mut self, event: TaskEvent);

    /// Returns a sink that stamps `fields` onto every event before
    /// forwarding it here.
    fn with_fields(&mut self, fields: EventFields) -> WithFields<'_>;
}

/// Sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn add_event(&mut self, _event: TaskEvent) {}

    fn with_fields(&mut self, fields: EventFields) -> WithFields<'_> {
        WithFields::new(self, fields)
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct BufferedEventSink {
    events: Vec<TaskEvent>,
}

impl BufferedEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far, oldest first.
    pub fn events(&self) -> &[TaskEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventSink for BufferedEventSink {
    fn add_event(&mut self, event: TaskEvent) {
        self.events.push(event);
    }

    fn with_fields(&mut self, fields: EventFields) -> WithFields<'_> {
        WithFields::new(self, fields)
    }
}

/// Sink wrapper that stamps context fields onto events.
///
/// Fields already present on an event win over the wrapper's, so the
/// innermost `with_fields` call takes precedence.
pub struct WithFields<'a> {
    inner: &'a mut dyn EventSink,
    fields: EventFields,
}

impl<'a> WithFields<'a> {
    pub fn new(inner: &'a mut dyn EventSink, fields: EventFields) -> Self {
        Self { inner, fields }
    }

    /// Fields stamped by this wrapper.
    pub fn fields(&self) -> &EventFields {
        &self.fields
    }
}

impl EventSink for WithFields<'_> {
    fn add_event(&mut self, mut event: TaskEvent) {
        event.fields = event.fields.or(&self.fields);
        self.inner.add_event(event);
    }

    fn with_fields(&mut self, fields: EventFields) -> WithFields<'_> {
        let fields = fields.or(&self.fields);
        WithFields::new(self, fields)
    }
}

impl std::fmt::Debug for WithFields<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WithFields")
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}
