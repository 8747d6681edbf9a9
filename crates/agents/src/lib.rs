pub mod escalation;
pub mod providers;
pub mod responder;

use std::env;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use enquiry_core::{
    ChatInput, ChatReply, ClassificationResult, ContextSnapshot, EnquiryError, Exchange, Intent,
    KnowledgeBase, ResponseBundle, ResponseSource, SharedRng,
};
use enquiry_ml::{load_classifier, ClassifierKind, IntentClassifier};
use enquiry_nlp::TextNormalizer;
use enquiry_observability::AppMetrics;
use enquiry_storage::{
    ContextStore, ContextTracker, StoreLimits, DEFAULT_HISTORY_CAP, DEFAULT_SESSION_TTL_SECONDS,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub use escalation::{EscalationPolicy, EscalationReason};
pub use providers::{
    ChainError, ProviderChain, ProviderError, ProviderReply, ProviderSettings, RetryPolicy,
    TextProvider,
};
pub use responder::{hedge, ResponseSelector, TEMPLATE_APOLOGY};

/// Shown when every configured provider failed.
pub const PROVIDER_APOLOGY: &str =
    "Sorry, I am having trouble connecting to my knowledge base right now.";
/// Confidence reported for a provider-generated answer.
pub const EXTERNAL_CONFIDENCE: f32 = 0.9;

const EXTERNAL_SUGGESTION_PICKS: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct AgentSettings {
    pub classifier: ClassifierKind,
    pub rng_seed: Option<u64>,
    pub limits: StoreLimits,
    pub escalation: EscalationPolicy,
}

impl AgentSettings {
    pub fn from_env() -> Self {
        let defaults = EscalationPolicy::default();
        Self {
            classifier: ClassifierKind::from_env(),
            rng_seed: env::var("ENQUIRY_RNG_SEED")
                .ok()
                .and_then(|value| value.parse::<u64>().ok()),
            limits: StoreLimits {
                ttl: Duration::seconds(
                    env::var("ENQUIRY_SESSION_TTL_SECONDS")
                        .ok()
                        .and_then(|value| value.parse::<i64>().ok())
                        .unwrap_or(DEFAULT_SESSION_TTL_SECONDS),
                ),
                history_cap: env::var("ENQUIRY_HISTORY_CAP")
                    .ok()
                    .and_then(|value| value.parse::<usize>().ok())
                    .unwrap_or(DEFAULT_HISTORY_CAP),
            },
            escalation: EscalationPolicy {
                confidence_threshold: env::var("ENQUIRY_ESCALATION_CONFIDENCE")
                    .ok()
                    .and_then(|value| value.parse::<f32>().ok())
                    .unwrap_or(defaults.confidence_threshold),
                word_limit: env::var("ENQUIRY_ESCALATION_WORD_LIMIT")
                    .ok()
                    .and_then(|value| value.parse::<usize>().ok())
                    .unwrap_or(defaults.word_limit),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextView {
    #[serde(flatten)]
    pub snapshot: ContextSnapshot,
    pub recent: Vec<Exchange>,
}

/// Runs one chat turn: normalize, classify, answer locally, escalate when the
/// policy asks for it, then record the exchange.
pub struct EnquiryAgent<S: ContextStore> {
    normalizer: TextNormalizer,
    classifier: Arc<dyn IntentClassifier>,
    selector: ResponseSelector,
    tracker: ContextTracker<S>,
    escalation: EscalationPolicy,
    providers: ProviderChain,
    metrics: Arc<AppMetrics>,
    rng: SharedRng,
    external_suggestions: Vec<String>,
    college_name: String,
    college_location: String,
}

impl<S: ContextStore> EnquiryAgent<S> {
    pub fn new(
        knowledge: &KnowledgeBase,
        store: S,
        settings: AgentSettings,
        providers: ProviderChain,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        let rng = SharedRng::from_seed_option(settings.rng_seed);
        let normalizer = TextNormalizer::new(&knowledge.vocabulary);
        let classifier = load_classifier(settings.classifier, &knowledge.intents, &normalizer);

        Self {
            selector: ResponseSelector::new(
                knowledge.intents.clone(),
                knowledge.college.template_fields(),
                rng.clone(),
            ),
            tracker: ContextTracker::new(store, knowledge.context.clone(), rng.clone()),
            escalation: settings.escalation,
            external_suggestions: knowledge.context.default_suggestions.clone(),
            college_name: knowledge.college.name.clone(),
            college_location: knowledge.college.location.clone(),
            normalizer,
            classifier,
            providers,
            metrics,
            rng,
        }
    }

    pub fn classifier_name(&self) -> &'static str {
        self.classifier.model_name()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.names()
    }

    /// Sessions currently held, including ones not yet swept.
    pub fn session_count(&self) -> usize {
        self.tracker.store().len()
    }

    pub fn metrics(&self) -> &Arc<AppMetrics> {
        &self.metrics
    }

    pub fn normalizer(&self) -> &TextNormalizer {
        &self.normalizer
    }

    pub fn classify(&self, message: &str) -> Result<ClassificationResult, EnquiryError> {
        self.classifier.classify(&self.normalizer.normalize(message))
    }

    #[instrument(skip(self, input))]
    pub async fn handle_chat(&self, input: ChatInput) -> Result<ChatReply, EnquiryError> {
        let started = Instant::now();
        self.metrics.inc_request();

        let message = input.message.trim();
        if message.is_empty() {
            self.metrics.inc_rejected();
            return Err(EnquiryError::EmptyMessage);
        }

        let session_id = input
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let normalized = self.normalizer.normalize(message);
        let result = self.classifier.classify(&normalized)?;
        if result.intent == Intent::Unknown {
            self.metrics.inc_unknown_intent();
        }

        let mut bundle = ResponseBundle {
            response: self.selector.respond(&result),
            suggestions: self.selector.follow_ups(result.intent),
            intent: result.intent,
            confidence: result.confidence,
            source: ResponseSource::Local,
            provider: None,
        };

        if !self.providers.is_empty() {
            if let Some(reason) = self.escalation.assess(message, &result) {
                self.metrics.inc_escalation();
                info!(session_id = %session_id, reason = ?reason, "escalating to external provider");
                bundle = self.escalate(message, &result).await;
            }
        }

        let now = Utc::now();
        self.tracker
            .update_context(&session_id, message, &bundle.response, result.intent, now);

        self.metrics.observe_latency(started.elapsed());
        info!(
            session_id = %session_id,
            intent = result.intent.as_str(),
            confidence = bundle.confidence,
            source = ?bundle.source,
            "chat handled"
        );

        Ok(ChatReply {
            bundle,
            session_id,
            timestamp: now,
        })
    }

    pub fn reset(&self, session_id: &str) -> bool {
        self.tracker.reset(session_id)
    }

    pub fn suggestions(&self, session_id: &str) -> Vec<String> {
        self.tracker.suggestions(session_id, Utc::now())
    }

    pub fn context(&self, session_id: &str, recent_limit: usize) -> Option<ContextView> {
        let now = Utc::now();
        let snapshot = self.tracker.snapshot(session_id, now)?;
        Some(ContextView {
            snapshot,
            recent: self.tracker.recent(session_id, recent_limit, now),
        })
    }

    async fn escalate(&self, message: &str, result: &ClassificationResult) -> ResponseBundle {
        let suggestions = self
            .rng
            .sample(&self.external_suggestions, EXTERNAL_SUGGESTION_PICKS);

        match self.providers.generate(&self.prompt(message)).await {
            Ok(reply) => {
                for failed in &reply.failed {
                    self.metrics.inc_provider_failure(failed);
                }
                self.metrics.inc_external_reply(&reply.provider);
                ResponseBundle {
                    response: reply.text,
                    suggestions,
                    intent: result.intent,
                    confidence: EXTERNAL_CONFIDENCE,
                    source: ResponseSource::External,
                    provider: Some(reply.provider),
                }
            }
            Err(error) => {
                for (name, _) in &error.failures {
                    self.metrics.inc_provider_failure(name);
                }
                self.metrics.inc_degraded();
                warn!(error = %error, timed_out = error.timed_out, "escalation failed");
                ResponseBundle {
                    response: PROVIDER_APOLOGY.to_string(),
                    suggestions,
                    intent: result.intent,
                    confidence: result.confidence,
                    source: ResponseSource::Degraded,
                    provider: None,
                }
            }
        }
    }

    fn prompt(&self, message: &str) -> String {
        format!(
            "You are the admissions assistant for {}, located in {}. \
             Answer the prospective student's question clearly and in a few sentences.\n\n\
             Question: {}",
            self.college_name, self.college_location, message
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use enquiry_storage::MemoryContextStore;

    use super::*;

    struct CannedProvider {
        reply: Option<&'static str>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl TextProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(prompt.contains("Question:"));
            self.reply
                .map(str::to_string)
                .ok_or(ProviderError::EmptyResponse)
        }
    }

    fn agent_with(providers: ProviderChain) -> EnquiryAgent<MemoryContextStore> {
        let knowledge = KnowledgeBase::builtin().unwrap();
        let settings = AgentSettings {
            rng_seed: Some(42),
            ..AgentSettings::default()
        };
        EnquiryAgent::new(
            &knowledge,
            MemoryContextStore::with_limits(settings.limits),
            settings,
            providers,
            AppMetrics::shared(),
        )
    }

    fn canned(reply: Option<&'static str>) -> (ProviderChain, Arc<CannedProvider>) {
        let provider = Arc::new(CannedProvider {
            reply,
            calls: AtomicU32::new(0),
        });
        let retry = RetryPolicy {
            max_attempts: 2,
            base_delay: StdDuration::from_millis(1),
        };
        let chain = ProviderChain::new(vec![provider.clone()], retry, StdDuration::from_secs(5));
        (chain, provider)
    }

    fn input(session: &str, message: &str) -> ChatInput {
        ChatInput {
            session_id: Some(session.to_string()),
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn greeting_is_answered_locally() {
        let agent = agent_with(ProviderChain::empty());
        let reply = agent.handle_chat(input("s1", "hello")).await.unwrap();

        assert_eq!(reply.bundle.intent, Intent::Greeting);
        assert_eq!(reply.bundle.source, ResponseSource::Local);
        assert_eq!(reply.session_id, "s1");

        let knowledge = KnowledgeBase::builtin().unwrap();
        let fields = knowledge.college.template_fields();
        let greetings: Vec<String> = knowledge
            .intents
            .spec(Intent::Greeting)
            .unwrap()
            .responses
            .iter()
            .map(|template| enquiry_core::render(template, &fields).unwrap())
            .collect();
        let body = reply
            .bundle
            .response
            .strip_prefix(hedge(reply.bundle.confidence).unwrap_or_default())
            .unwrap();
        assert!(greetings.iter().any(|greeting| greeting == body), "{body}");
        assert!(!reply.bundle.suggestions.is_empty());
        assert!(reply.bundle.suggestions.len() <= 3);
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let agent = agent_with(ProviderChain::empty());
        let error = agent.handle_chat(input("s1", "   ")).await.unwrap_err();
        assert_eq!(error, EnquiryError::EmptyMessage);
        assert_eq!(agent.metrics().snapshot().rejected_total, 1);
        assert!(agent.context("s1", 5).is_none());
    }

    #[tokio::test]
    async fn missing_session_id_gets_generated() {
        let agent = agent_with(ProviderChain::empty());
        let reply = agent
            .handle_chat(ChatInput {
                session_id: None,
                message: "hi".into(),
            })
            .await
            .unwrap();
        assert!(Uuid::parse_str(&reply.session_id).is_ok());
    }

    #[tokio::test]
    async fn unknown_without_providers_stays_local() {
        let agent = agent_with(ProviderChain::empty());
        let reply = agent.handle_chat(input("s1", "asdf qwer zxcv")).await.unwrap();
        assert_eq!(reply.bundle.intent, Intent::Unknown);
        assert_eq!(reply.bundle.confidence, 0.0);
        assert_eq!(reply.bundle.source, ResponseSource::Local);
        assert!(reply.bundle.suggestions.is_empty());
    }

    #[tokio::test]
    async fn unknown_escalates_to_provider() {
        let (chain, provider) = canned(Some("An external answer."));
        let agent = agent_with(chain);
        let reply = agent.handle_chat(input("s1", "asdf qwer zxcv")).await.unwrap();

        assert_eq!(reply.bundle.source, ResponseSource::External);
        assert_eq!(reply.bundle.response, "An external answer.");
        assert_eq!(reply.bundle.confidence, EXTERNAL_CONFIDENCE);
        assert_eq!(reply.bundle.provider.as_deref(), Some("canned"));
        assert_eq!(reply.bundle.suggestions.len(), 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(agent.metrics().snapshot().external_replies_total, 1);
    }

    #[tokio::test]
    async fn comparison_escalates_even_when_classified() {
        let (chain, provider) = canned(Some("Both have strengths."));
        let agent = agent_with(chain);
        let reply = agent
            .handle_chat(input(
                "s1",
                "compare the placement record of engineering vs management",
            ))
            .await
            .unwrap();
        assert_eq!(reply.bundle.source, ResponseSource::External);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_providers_degrade_to_apology() {
        let (chain, _) = canned(None);
        let agent = agent_with(chain);
        let reply = agent.handle_chat(input("s1", "asdf qwer zxcv")).await.unwrap();

        assert_eq!(reply.bundle.source, ResponseSource::Degraded);
        assert_eq!(reply.bundle.response, PROVIDER_APOLOGY);
        let snapshot = agent.metrics().snapshot();
        assert_eq!(snapshot.degraded_total, 1);
        assert_eq!(snapshot.provider_failures_total, 1);
    }

    #[tokio::test]
    async fn turns_are_recorded_in_context() {
        let agent = agent_with(ProviderChain::empty());
        agent.handle_chat(input("s1", "hello")).await.unwrap();
        agent
            .handle_chat(input("s1", "what is the tuition fee"))
            .await
            .unwrap();

        let view = agent.context("s1", 5).unwrap();
        assert_eq!(view.snapshot.message_count, 2);
        assert_eq!(view.recent.len(), 2);
        assert_eq!(view.recent[1].user_message, "what is the tuition fee");
        assert!(view.snapshot.asked_topics.contains(&"fees".to_string()));
        assert!(!agent
            .suggestions("s1")
            .contains(&"Tell me about the fee structure".to_string()));

        assert!(agent.reset("s1"));
        assert!(agent.context("s1", 5).is_none());
    }
}
