//! Live monitoring engine.
//!
//! A [`SessionManager`] owns one [`MonitorSession`] worker per device under
//! test. Each tick the worker polls the configured sources, folds the
//! observations into a [`Reconciler`] and reports discoveries through an
//! [`EventSink`] until everything expected is found, the timeout expires or
//! the session is stopped.

mod clock;
mod manager;
mod reconcile;
mod schedule;
mod session;
mod sink;

pub use clock::{format_elapsed, Clock, Renderer, SystemClock};
pub use manager::{SessionError, SessionInfo, SessionManager, StartError, StartRequest};
pub use reconcile::{FoundEntry, Reconciler, TickContext};
pub use schedule::IntervalSchedule;
pub use session::{EngineContext, EngineState, MonitorSession, SessionParams};
pub use sink::EventSink;
