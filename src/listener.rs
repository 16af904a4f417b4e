//! Completion event classification.
//!
//! Third-party games report progress as loosely shaped statement events. The
//! listener is split in two: a pure classifier (`CompletionPolicy` +
//! [`CompletionListener::classify`]) and an effect step that hands qualifying
//! signals to the engine for the current step.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ProgressionError;
use crate::progression::{MarkOutcome, ProgressionEngine, StepView};
use crate::store::KeyValueStore;

const COMPLETED_VERB: &str = "completed";
const CHOICE_INTERACTION: &str = "choice";

// --- Event model -------------------------------------------------------------

/// A completion event. Every field is optional; a missing or mistyped piece
/// only fails the policy checks that read it.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompletionEvent {
    #[serde(deserialize_with = "lenient")]
    pub verb: Option<Verb>,
    #[serde(deserialize_with = "lenient")]
    pub result: Option<EventResult>,
    #[serde(deserialize_with = "lenient")]
    pub object: Option<EventObject>,
}

/// Either a bare verb name or a statement verb object whose `id` ends with
/// the name (`http://adlnet.gov/expapi/verbs/completed`).
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Verb {
    Name(String),
    Object { id: String },
}

impl Verb {
    pub fn name(&self) -> &str {
        match self {
            Verb::Name(name) => name,
            Verb::Object { id } => id.rsplit('/').next().unwrap_or(id),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventResult {
    #[serde(deserialize_with = "lenient")]
    pub score: Option<Score>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Score {
    #[serde(deserialize_with = "lenient")]
    pub raw: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub scaled: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventObject {
    #[serde(deserialize_with = "lenient")]
    pub definition: Option<Definition>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Definition {
    #[serde(deserialize_with = "lenient")]
    pub interaction_type: Option<String>,
    pub correct_responses_pattern: Option<Value>,
    #[serde(deserialize_with = "lenient")]
    pub extensions: Option<Extensions>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Extensions {
    #[serde(rename = "subContentId", alias = "http://h5p.org/x-api/h5p-subContentId")]
    pub sub_content_id: Option<Value>,
}

/// Deserialize a field, reading a value of the wrong shape as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl CompletionEvent {
    /// Parse an event from JSON. Accepts the flat event shape, a bare
    /// statement, or a dispatcher envelope `{ "data": { "statement": .. } }`.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let mut value: Value = serde_json::from_str(raw)?;
        if let Some(statement) = value.pointer_mut("/data/statement").map(Value::take) {
            value = statement;
        }
        serde_json::from_value(value)
    }

    pub fn verb_name(&self) -> Option<&str> {
        self.verb.as_ref().map(Verb::name)
    }

    pub fn raw_score(&self) -> Option<f64> {
        self.score().and_then(|s| s.raw)
    }

    pub fn scaled_score(&self) -> Option<f64> {
        self.score().and_then(|s| s.scaled)
    }

    pub fn definition(&self) -> Option<&Definition> {
        self.object.as_ref().and_then(|o| o.definition.as_ref())
    }

    pub fn interaction_type(&self) -> Option<&str> {
        self.definition().and_then(|d| d.interaction_type.as_deref())
    }

    pub fn has_correct_responses_pattern(&self) -> bool {
        self.definition()
            .and_then(|d| d.correct_responses_pattern.as_ref())
            .is_some_and(|p| !p.is_null())
    }

    pub fn has_sub_content_id(&self) -> bool {
        self.definition()
            .and_then(|d| d.extensions.as_ref())
            .and_then(|e| e.sub_content_id.as_ref())
            .is_some_and(|id| !id.is_null())
    }

    fn score(&self) -> Option<&Score> {
        self.result.as_ref().and_then(|r| r.score.as_ref())
    }
}

// --- Policy ------------------------------------------------------------------

/// Decides whether an event means "the current step is done".
pub trait CompletionPolicy {
    fn qualifies(&self, event: &CompletionEvent) -> bool;
}

impl<F> CompletionPolicy for F
where
    F: Fn(&CompletionEvent) -> bool,
{
    fn qualifies(&self, event: &CompletionEvent) -> bool {
        self(event)
    }
}

/// Empirical rule set for the stock game vocabulary. An event qualifies when
/// any of these hold:
///
/// 1. verb is `completed`, a raw score is present, and scaled score is exactly 1;
/// 2. the definition has a correct-responses pattern and its interaction type
///    is not `choice`;
/// 3. a raw score is present, scaled score is exactly 1, and the event is not
///    tagged with a sub-content id.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPolicy;

impl CompletionPolicy for DefaultPolicy {
    fn qualifies(&self, event: &CompletionEvent) -> bool {
        let has_raw = event.raw_score().is_some();
        let full_marks = event.scaled_score() == Some(1.0);

        let completed_verb =
            event.verb_name() == Some(COMPLETED_VERB) && has_raw && full_marks;
        let free_response = event.has_correct_responses_pattern()
            && event.interaction_type() != Some(CHOICE_INTERACTION);
        let whole_activity = has_raw && full_marks && !event.has_sub_content_id();

        completed_verb || free_response || whole_activity
    }
}

// --- Listener ----------------------------------------------------------------

/// Output of classification.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepCompletionSignal {
    pub raw_score: Option<f64>,
}

pub struct CompletionListener<P = DefaultPolicy> {
    policy: P,
}

impl Default for CompletionListener<DefaultPolicy> {
    fn default() -> Self {
        Self::new(DefaultPolicy)
    }
}

impl<P: CompletionPolicy> CompletionListener<P> {
    pub fn new(policy: P) -> Self {
        Self { policy }
    }

    pub fn classify(&self, event: &CompletionEvent) -> Option<StepCompletionSignal> {
        self.policy
            .qualifies(event)
            .then(|| StepCompletionSignal { raw_score: event.raw_score() })
    }

    /// Classify `event` and, on a match, mark the engine's current step.
    pub fn handle<V: StepView, S: KeyValueStore>(
        &self,
        engine: &mut ProgressionEngine<V, S>,
        event: &CompletionEvent,
    ) -> Result<Option<MarkOutcome>, ProgressionError> {
        let Some(signal) = self.classify(event) else {
            debug!(verb = ?event.verb_name(), "event does not qualify");
            return Ok(None);
        };
        let step = engine.current_step();
        info!(step, raw_score = ?signal.raw_score, "qualifying completion event");
        engine.mark_step_complete(step, signal.raw_score).map(Some)
    }

    /// Like [`handle`](Self::handle) for raw JSON. Unparseable payloads are
    /// treated as non-qualifying.
    pub fn handle_json<V: StepView, S: KeyValueStore>(
        &self,
        engine: &mut ProgressionEngine<V, S>,
        raw: &str,
    ) -> Result<Option<MarkOutcome>, ProgressionError> {
        match CompletionEvent::from_json(raw) {
            Ok(event) => self.handle(engine, &event),
            Err(err) => {
                debug!(error = %err, "malformed completion event ignored");
                Ok(None)
            }
        }
    }
}
