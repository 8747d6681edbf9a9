use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use enquiry_core::{ContextSnapshot, ContextTables, Exchange, Intent, SharedRng};

use crate::{ContextStore, SessionContext};

/// Per-session interests, asked topics and follow-up suggestions on top of a
/// [`ContextStore`].
pub struct ContextTracker<S: ContextStore> {
    store: S,
    tables: ContextTables,
    rng: SharedRng,
}

impl<S: ContextStore> ContextTracker<S> {
    pub fn new(store: S, tables: ContextTables, rng: SharedRng) -> Self {
        Self { store, tables, rng }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn update_context(
        &self,
        session_id: &str,
        user_message: &str,
        bot_response: &str,
        intent: Intent,
        now: DateTime<Utc>,
    ) -> SessionContext {
        let interests = self.extract_interests(user_message);
        let topics = self.extract_topics(user_message);
        let exchange = Exchange {
            user_message: user_message.to_string(),
            bot_response: bot_response.to_string(),
            intent,
            at: now,
        };

        let mut pending = Some(exchange);
        self.store.update(session_id, now, &mut |session: &mut SessionContext| {
            if let Some(exchange) = pending.take() {
                session.history.push_back(exchange);
            }
            session.message_count += 1;
            session.interests.extend(interests.iter().cloned());
            session.asked_topics.extend(topics.iter().cloned());
        })
    }

    pub fn extract_interests(&self, message: &str) -> BTreeSet<String> {
        matching_buckets(&self.tables.interests, message)
    }

    pub fn extract_topics(&self, message: &str) -> BTreeSet<String> {
        matching_buckets(&self.tables.topics, message)
    }

    pub fn suggestions(&self, session_id: &str, now: DateTime<Utc>) -> Vec<String> {
        let Some(session) = self.store.get(session_id, now) else {
            return self.tables.opening_suggestions.clone();
        };

        let mut unasked: Vec<&String> = self
            .tables
            .topic_suggestions
            .keys()
            .filter(|topic| !session.asked_topics.contains(*topic))
            .collect();
        self.rng.shuffle(&mut unasked);

        let mut suggestions: Vec<String> = unasked
            .into_iter()
            .take(self.tables.max_topic_suggestions)
            .filter_map(|topic| self.tables.topic_suggestions.get(topic).cloned())
            .collect();

        for rule in &self.tables.interest_suggestions {
            if session.interests.contains(&rule.interest)
                && !session.asked_topics.contains(&rule.unless_topic)
            {
                suggestions.push(rule.suggestion.clone());
            }
        }

        if suggestions.is_empty() {
            suggestions = self.tables.default_suggestions.clone();
        }
        suggestions.truncate(self.tables.max_suggestions);
        suggestions
    }

    pub fn reset(&self, session_id: &str) -> bool {
        self.store.reset(session_id)
    }

    pub fn snapshot(&self, session_id: &str, now: DateTime<Utc>) -> Option<ContextSnapshot> {
        self.store.get(session_id, now).map(|session| ContextSnapshot {
            history_length: session.history.len(),
            interests: session.interests.iter().cloned().collect(),
            asked_topics: session.asked_topics.iter().cloned().collect(),
            message_count: session.message_count,
            last_activity: session.last_activity,
            idle_seconds: (now - session.last_activity).num_seconds(),
            session_id: session.session_id,
        })
    }

    /// The last `limit` exchanges, oldest first.
    pub fn recent(&self, session_id: &str, limit: usize, now: DateTime<Utc>) -> Vec<Exchange> {
        let Some(session) = self.store.get(session_id, now) else {
            return Vec::new();
        };
        let skip = session.history.len().saturating_sub(limit);
        session.history.into_iter().skip(skip).collect()
    }
}

fn matching_buckets(
    buckets: &BTreeMap<String, Vec<String>>,
    message: &str,
) -> BTreeSet<String> {
    let lowered = message.to_lowercase();
    buckets
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|keyword| lowered.contains(keyword.as_str())))
        .map(|(bucket, _)| bucket.clone())
        .collect()
}
