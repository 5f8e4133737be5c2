//! Tunables for the import pipeline.

use std::time::Duration;

use crate::classify::ClassifierRules;
use crate::retry::RetryPolicy;

/// Defaults applied to tests created from quiz files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDefaults {
    pub duration_minutes: u32,
    pub passing_score: u32,
    pub max_attempts: u32,
}

impl Default for TestDefaults {
    fn default() -> Self {
        Self {
            duration_minutes: 60,
            passing_score: 70,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Wall-clock time one invocation may spend before handing off to a
    /// continuation. Keep it under the host's request timeout.
    pub time_budget: Duration,
    /// Retries for transient Drive/storage errors within one task.
    pub retry: RetryPolicy,
    pub rules: ClassifierRules,
    /// How long a driver holds a run before another may take it over.
    pub lock_lease: Duration,
    /// Quiz exports larger than this are rejected.
    pub max_quiz_bytes: usize,
    pub test_defaults: TestDefaults,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            time_budget: Duration::from_secs(250),
            retry: RetryPolicy::exponential(3),
            rules: ClassifierRules::default(),
            lock_lease: Duration::from_secs(300),
            max_quiz_bytes: 2 * 1024 * 1024,
            test_defaults: TestDefaults::default(),
        }
    }
}

impl ImportConfig {
    pub fn time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = budget;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn rules(mut self, rules: ClassifierRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }
}
