use crate::syncer::SyncOutcome;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct SyncMetrics {
    attempts: Family<TargetLabels, Counter>,
    outcomes: Family<OutcomeLabels, Counter>,
    pushes: Family<PushLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct TargetLabels {
    target: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabels {
    target: String,
    outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PushLabels {
    target: String,
    result: String,
}

impl SyncMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let attempts = Family::default();
        prom.register(
            "attempts",
            "Count of sync cycles started per data plane",
            attempts.clone(),
        );

        let outcomes = Family::default();
        prom.register(
            "outcomes",
            "Count of sync cycle outcomes per data plane",
            outcomes.clone(),
        );

        let pushes = Family::default();
        prom.register(
            "pushes",
            "Count of configuration pushes per data plane",
            pushes.clone(),
        );

        Self {
            attempts,
            outcomes,
            pushes,
        }
    }

    pub(crate) fn attempt(&self, target: &str) {
        self.attempts
            .get_or_create(&TargetLabels {
                target: target.to_string(),
            })
            .inc();
    }

    pub(crate) fn outcome(&self, target: &str, outcome: SyncOutcome) {
        self.outcomes
            .get_or_create(&OutcomeLabels {
                target: target.to_string(),
                outcome: outcome.as_str().to_string(),
            })
            .inc();
    }

    pub(crate) fn push(&self, target: &str, ok: bool) {
        self.pushes
            .get_or_create(&PushLabels {
                target: target.to_string(),
                result: if ok { "ok" } else { "error" }.to_string(),
            })
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn outcome_count(&self, target: &str, outcome: SyncOutcome) -> u64 {
        self.outcomes
            .get_or_create(&OutcomeLabels {
                target: target.to_string(),
                outcome: outcome.as_str().to_string(),
            })
            .get()
    }
}
