use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dvt_schemas::{Observation, SourceTag};
use dvt_sources::{AlarmFlagSource, ObservationSource, SourceError, SourceQuery};

type Reply = Result<Vec<Observation>, SourceError>;

fn locked<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Observation source that plays queued replies first, then repeats its
/// fallback forever.
#[derive(Debug)]
pub struct ScriptedSource {
    tag: SourceTag,
    delay: Option<Duration>,
    queued: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    queries: Mutex<Vec<SourceQuery>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    /// Answers with no observations.
    pub fn new(tag: SourceTag) -> Self {
        Self {
            tag,
            delay: None,
            queued: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(Vec::new())),
            queries: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(tag: SourceTag, observations: Vec<Observation>) -> Self {
        Self::new(tag).with_fallback(Ok(observations))
    }

    pub fn failing(tag: SourceTag, err: SourceError) -> Self {
        Self::new(tag).with_fallback(Err(err))
    }

    pub fn with_fallback(self, reply: Reply) -> Self {
        *locked(&self.fallback) = reply;
        self
    }

    /// Every reply takes `delay` of tokio time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a one-shot reply ahead of the fallback.
    pub fn then(self, reply: Reply) -> Self {
        locked(&self.queued).push_back(reply);
        self
    }

    pub fn set_fallback(&self, reply: Reply) {
        *locked(&self.fallback) = reply;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<SourceQuery> {
        locked(&self.queries).clone()
    }
}

#[async_trait]
impl ObservationSource for ScriptedSource {
    fn tag(&self) -> SourceTag {
        self.tag
    }

    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<Observation>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        locked(&self.queries).push(query.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reply) = locked(&self.queued).pop_front() {
            return reply;
        }
        locked(&self.fallback).clone()
    }
}

/// Alarm corroborator with a fixed answer per alarm id.
#[derive(Debug)]
pub struct ScriptedFlags {
    name: &'static str,
    answers: Mutex<BTreeMap<String, Observation>>,
    failure: Mutex<Option<SourceError>>,
    requests: Mutex<Vec<Vec<String>>>,
}

impl ScriptedFlags {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            answers: Mutex::new(BTreeMap::new()),
            failure: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn answering(self, observation: Observation) -> Self {
        locked(&self.answers).insert(observation.id.clone(), observation);
        self
    }

    pub fn failing(self, err: SourceError) -> Self {
        *locked(&self.failure) = Some(err);
        self
    }

    /// Alarm ids asked about, one entry per call.
    pub fn requests(&self) -> Vec<Vec<String>> {
        locked(&self.requests).clone()
    }
}

#[async_trait]
impl AlarmFlagSource for ScriptedFlags {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn check_alarms(
        &self,
        _device_id: &str,
        alarm_ids: &[String],
    ) -> Result<Vec<Observation>, SourceError> {
        locked(&self.requests).push(alarm_ids.to_vec());
        if let Some(err) = locked(&self.failure).clone() {
            return Err(err);
        }
        let answers = locked(&self.answers);
        Ok(alarm_ids
            .iter()
            .filter_map(|id| answers.get(id).cloned())
            .collect())
    }
}
