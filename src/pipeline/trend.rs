//! Headline "total vs. recent period" counters

use super::types::Category;
use serde::{Deserialize, Serialize};

/// Cumulative count plus the count attributed to the most recent period
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendMetric {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub last: u64,
}

impl TrendMetric {
    fn bump(&mut self) {
        self.total += 1;
        self.last += 1;
    }
}

/// Shape served by the count endpoint; `bad_requests` is tracked locally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendSnapshot {
    #[serde(default)]
    pub all: TrendMetric,
    #[serde(default)]
    pub errors: TrendMetric,
    #[serde(default)]
    pub bad_requests: TrendMetric,
}

/// Which categories count toward the `errors` trend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// 5xx only
    #[default]
    ServerErrorsOnly,
    /// 4xx and 5xx
    ClientAndServerErrors,
}

impl ErrorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorPolicy::ServerErrorsOnly => "5xx",
            ErrorPolicy::ClientAndServerErrors => "4xx+5xx",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "5xx" => Some(ErrorPolicy::ServerErrorsOnly),
            "4xx+5xx" => Some(ErrorPolicy::ClientAndServerErrors),
            _ => None,
        }
    }

    pub fn counts_as_error(&self, category: Category) -> bool {
        match self {
            ErrorPolicy::ServerErrorsOnly => category == Category::Error,
            ErrorPolicy::ClientAndServerErrors => {
                matches!(category, Category::Error | Category::BadRequest)
            }
        }
    }
}

/// Additive trend counter; never recomputed on the live path
#[derive(Debug, Clone, Default)]
pub struct TrendCounter {
    snapshot: TrendSnapshot,
    policy: ErrorPolicy,
}

impl TrendCounter {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self {
            snapshot: TrendSnapshot::default(),
            policy,
        }
    }

    pub fn seed(&mut self, snapshot: TrendSnapshot) {
        self.snapshot = snapshot;
    }

    pub fn record(&mut self, category: Category) {
        self.snapshot.all.bump();
        if category == Category::BadRequest {
            self.snapshot.bad_requests.bump();
        }
        self.record_error(category);
    }

    /// Bump the `errors` trend if the policy counts `category`; returns whether it did
    pub fn record_error(&mut self, category: Category) -> bool {
        if self.policy.counts_as_error(category) {
            self.snapshot.errors.bump();
            true
        } else {
            false
        }
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    pub fn snapshot(&self) -> TrendSnapshot {
        self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_adds_to_seed() {
        let mut counter = TrendCounter::new(ErrorPolicy::ServerErrorsOnly);
        counter.seed(TrendSnapshot {
            all: TrendMetric { total: 100, last: 7 },
            errors: TrendMetric { total: 3, last: 1 },
            bad_requests: TrendMetric::default(),
        });

        counter.record(Category::Success);
        counter.record(Category::Error);
        counter.record(Category::BadRequest);

        let snap = counter.snapshot();
        assert_eq!(snap.all, TrendMetric { total: 103, last: 10 });
        assert_eq!(snap.errors, TrendMetric { total: 4, last: 2 });
        assert_eq!(snap.bad_requests, TrendMetric { total: 1, last: 1 });
    }

    #[test]
    fn test_client_and_server_policy() {
        let mut counter = TrendCounter::new(ErrorPolicy::ClientAndServerErrors);
        counter.record(Category::BadRequest);
        counter.record(Category::Error);
        counter.record(Category::Redirect);
        counter.record(Category::Provisional);

        let snap = counter.snapshot();
        assert_eq!(snap.all.total, 4);
        assert_eq!(snap.errors.total, 2);
        assert_eq!(snap.bad_requests.total, 1);
    }

    #[test]
    fn test_reseed_resets_last() {
        let mut counter = TrendCounter::default();
        counter.record(Category::Error);
        counter.seed(TrendSnapshot::default());
        assert_eq!(counter.snapshot(), TrendSnapshot::default());
    }

    #[test]
    fn test_decode_count_endpoint_shape() {
        let json = r#"{"all":{"total":10,"last":2},"errors":{"total":1,"last":0}}"#;
        let snap: TrendSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.all.total, 10);
        assert_eq!(snap.errors.last, 0);
        assert_eq!(snap.bad_requests, TrendMetric::default());
    }

    #[test]
    fn test_policy_names() {
        for policy in [ErrorPolicy::ServerErrorsOnly, ErrorPolicy::ClientAndServerErrors] {
            assert_eq!(ErrorPolicy::from_str(policy.as_str()), Some(policy));
        }
        assert_eq!(ErrorPolicy::from_str("all"), None);
    }
}
