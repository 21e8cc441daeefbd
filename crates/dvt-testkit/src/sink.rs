use std::sync::Mutex;

use dvt_engine::EventSink;
use dvt_schemas::{MonitorEvent, SessionId};
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Recorded {
    pub at: Instant,
    pub session: SessionId,
    pub event: MonitorEvent,
}

/// Keeps every emitted event with the tokio instant it was emitted at.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<Recorded>>,
    notify: Notify,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Recorded> {
        match self.records.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events(&self) -> Vec<MonitorEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }

    pub fn of_type(&self, event_type: &str) -> Vec<MonitorEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.of_type(event_type).len()
    }

    /// Resolves once `pred` holds over everything recorded so far.
    pub async fn wait_for(&self, pred: impl Fn(&[MonitorEvent]) -> bool) {
        loop {
            let notified = self.notify.notified();
            if pred(&self.events()) {
                return;
            }
            notified.await;
        }
    }

    pub async fn wait_for_count(&self, event_type: &str, n: usize) {
        self.wait_for(|events| {
            events.iter().filter(|e| e.event_type() == event_type).count() >= n
        })
        .await
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, session: &SessionId, event: &MonitorEvent) {
        let rec = Recorded {
            at: Instant::now(),
            session: *session,
            event: event.clone(),
        };
        match self.records.lock() {
            Ok(mut g) => g.push(rec),
            Err(poisoned) => poisoned.into_inner().push(rec),
        }
        self.notify.notify_waiters();
    }
}
