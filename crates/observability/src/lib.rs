use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Process-wide counters. Each bump is mirrored to the `metrics` facade so an
/// installed recorder sees the same numbers the health endpoint reports.
#[derive(Debug, Default)]
pub struct AppMetrics {
    requests_total: AtomicU64,
    rejected_total: AtomicU64,
    unknown_intent_total: AtomicU64,
    escalations_total: AtomicU64,
    external_replies_total: AtomicU64,
    provider_failures_total: AtomicU64,
    degraded_total: AtomicU64,
    total_latency_millis: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub rejected_total: u64,
    pub unknown_intent_total: u64,
    pub escalations_total: u64,
    pub external_replies_total: u64,
    pub provider_failures_total: u64,
    pub degraded_total: u64,
    pub avg_latency_millis: f64,
}

impl AppMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("enquiry_requests_total").increment(1);
    }

    /// Message refused before classification (empty input).
    pub fn inc_rejected(&self) {
        self.rejected_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("enquiry_rejected_total").increment(1);
    }

    pub fn inc_unknown_intent(&self) {
        self.unknown_intent_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("enquiry_unknown_intent_total").increment(1);
    }

    pub fn inc_escalation(&self) {
        self.escalations_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("enquiry_escalations_total").increment(1);
    }

    pub fn inc_external_reply(&self, provider: &str) {
        self.external_replies_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("enquiry_external_replies_total", "provider" => provider.to_string())
            .increment(1);
    }

    pub fn inc_provider_failure(&self, provider: &str) {
        self.provider_failures_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("enquiry_provider_failures_total", "provider" => provider.to_string())
            .increment(1);
    }

    pub fn inc_degraded(&self) {
        self.degraded_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("enquiry_degraded_total").increment(1);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        metrics::histogram!("enquiry_chat_latency_seconds").record(duration.as_secs_f64());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests_total.load(Ordering::Relaxed);
        let latency = self.total_latency_millis.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests_total: requests,
            rejected_total: self.rejected_total.load(Ordering::Relaxed),
            unknown_intent_total: self.unknown_intent_total.load(Ordering::Relaxed),
            escalations_total: self.escalations_total.load(Ordering::Relaxed),
            external_replies_total: self.external_replies_total.load(Ordering::Relaxed),
            provider_failures_total: self.provider_failures_total.load(Ordering::Relaxed),
            degraded_total: self.degraded_total.load(Ordering::Relaxed),
            avg_latency_millis: if requests == 0 {
                0.0
            } else {
                latency as f64 / requests as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,enquiry_api=info,enquiry_agents=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .init();
    });
}
