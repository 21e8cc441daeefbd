//! `dvt monitor`: one headless session, events on stdout as JSON lines.

use std::io::Write;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use dvt_engine::{
    EngineContext, EngineState, EventSink, MonitorSession, SessionParams, SystemClock,
};
use dvt_schemas::{MonitorEvent, SessionId, TimeFilter};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{load_config, parse_cardinality, parse_device, wire_sources};

pub struct MonitorArgs {
    pub device: String,
    pub sensors: Option<u8>,
    pub ui: Option<String>,
    pub timeout_minutes: Option<u32>,
    pub historical: bool,
    pub window_minutes: Option<u32>,
    pub config_paths: Vec<String>,
}

/// Writes each event as one `{"event":..,"data":..}` line.
pub struct JsonLinesSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&self, session: &SessionId, event: &MonitorEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(err) => {
                warn!(session_id = %session, error = %err, "event not serializable");
                return;
            }
        };
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        if let Err(err) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            warn!(session_id = %session, error = %err, "stdout write failed");
        }
    }
}

pub type StdoutSink = JsonLinesSink<std::io::Stdout>;

pub async fn run(args: MonitorArgs) -> Result<ExitCode> {
    let cfg = load_config(&args.config_paths)?;
    let device_id = parse_device(&args.device)?;
    let cardinality = parse_cardinality(args.sensors, &cfg)?;
    let timeout_minutes = args
        .timeout_minutes
        .unwrap_or(cfg.engine.default_timeout_minutes);
    if timeout_minutes == 0 {
        anyhow::bail!("--timeout-minutes must be at least 1");
    }

    let params = SessionParams {
        device_id,
        location: args
            .ui
            .unwrap_or_else(|| cfg.engine.default_location.clone()),
        cardinality,
        timeout_minutes,
    };
    let filter = time_filter(
        args.historical,
        args.window_minutes,
        cfg.engine.default_time_filter,
    );

    let ctx = EngineContext {
        sources: wire_sources(&cfg),
        settings: cfg.engine.clone(),
        clock: Arc::new(SystemClock),
    };

    let id = SessionId::new();
    let cancel = CancellationToken::new();
    let (_filter_tx, filter_rx) = watch::channel(filter);
    let sink: Arc<dyn EventSink> = Arc::new(StdoutSink::new(std::io::stdout()));
    info!(session_id = %id, device = %params.device_id, "monitor starting");

    let session = MonitorSession::new(id, params, ctx, sink, filter_rx, cancel.clone());
    let worker = tokio::spawn(session.run());

    let stopper = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received; stopping session");
            stopper.cancel();
        }
    });

    let state = worker.await?;
    cancel.cancel();
    eprintln!("state={}", state_name(state));
    Ok(match state {
        EngineState::Completed => ExitCode::SUCCESS,
        _ => ExitCode::from(1),
    })
}

fn time_filter(historical: bool, window_minutes: Option<u32>, default: TimeFilter) -> TimeFilter {
    TimeFilter {
        historical_mode: historical || default.historical_mode,
        time_window_minutes: window_minutes.unwrap_or(default.time_window_minutes),
    }
}

fn state_name(state: EngineState) -> &'static str {
    match state {
        EngineState::Running => "running",
        EngineState::Completed => "completed",
        EngineState::TimedOut => "timed_out",
        EngineState::Stopped => "stopped",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvt_schemas::MonitoringError;

    #[test]
    fn sink_writes_one_json_line_per_event() {
        let sink = JsonLinesSink::new(Vec::<u8>::new());
        let id = SessionId::new();
        for msg in ["telemetry: timed out: 30s", "lastval: unavailable: 503"] {
            sink.emit(
                &id,
                &MonitorEvent::MonitoringError(MonitoringError {
                    error: msg.to_string(),
                }),
            );
        }

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "monitoring_error");
        assert_eq!(first["data"]["error"], "telemetry: timed out: 30s");
    }

    #[test]
    fn window_flag_overrides_default_window() {
        let f = time_filter(false, Some(30), TimeFilter::default());
        assert_eq!(f, TimeFilter::live(30));

        let f = time_filter(true, None, TimeFilter::default());
        assert!(f.historical_mode);
        assert_eq!(f.time_window_minutes, TimeFilter::DEFAULT_WINDOW_MINUTES);
    }
}
