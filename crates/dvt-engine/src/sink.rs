use dvt_schemas::{MonitorEvent, SessionId};

/// Where a session's events go. Implementations must not block: the worker
/// calls `emit` inline between adapter calls.
pub trait EventSink: Send + Sync {
    fn emit(&self, session: &SessionId, event: &MonitorEvent);
}
