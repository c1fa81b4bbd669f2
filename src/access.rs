use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::bucket::bucket;

const FULL_ROLLOUT: u8 = 100;

/// AccessControl decides whether a subject (a user or a tenant) may see a flag.
///
/// The blocked list always wins over the allowed list. When neither list is populated the
/// decision is a pure percentage rollout keyed on the subject's [bucket].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControl {
    #[serde(default)]
    allowed: BTreeSet<String>,
    #[serde(default)]
    blocked: BTreeSet<String>,
    #[serde(default = "full_rollout")]
    rollout_percentage: u8,
}

fn full_rollout() -> u8 {
    FULL_ROLLOUT
}

/// The outcome of [AccessControl::evaluate].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
    /// The subject's bucket, present only when the percentage rollout decided.
    pub bucket: Option<u8>,
}

impl AccessDecision {
    fn allow(reason: impl Into<String>) -> Self {
        AccessDecision {
            allowed: true,
            reason: reason.into(),
            bucket: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        AccessDecision {
            allowed: false,
            reason: reason.into(),
            bucket: None,
        }
    }
}

impl AccessControl {
    /// Creates an access control with empty lists rolled out to `rollout_percentage`
    /// percent of subjects. Values above 100 are clamped.
    pub fn new(rollout_percentage: u8) -> Self {
        AccessControl {
            allowed: BTreeSet::new(),
            blocked: BTreeSet::new(),
            rollout_percentage: rollout_percentage.min(FULL_ROLLOUT),
        }
    }

    /// Access control that lets every subject through.
    pub fn unrestricted() -> Self {
        AccessControl::new(FULL_ROLLOUT)
    }

    /// Access control that keeps every subject out.
    pub fn restricted() -> Self {
        AccessControl::new(0)
    }

    pub fn allowed(&self) -> &BTreeSet<String> {
        &self.allowed
    }

    pub fn blocked(&self) -> &BTreeSet<String> {
        &self.blocked
    }

    pub fn rollout_percentage(&self) -> u8 {
        self.rollout_percentage.min(FULL_ROLLOUT)
    }

    /// Returns a copy with `id` on the allowed list and off the blocked list.
    pub fn allow_for(&self, id: impl Into<String>) -> Self {
        let id = id.into();
        let mut next = self.clone();
        next.blocked.remove(&id);
        next.allowed.insert(id);
        next
    }

    /// Returns a copy with `id` on the blocked list and off the allowed list.
    pub fn block_for(&self, id: impl Into<String>) -> Self {
        let id = id.into();
        let mut next = self.clone();
        next.allowed.remove(&id);
        next.blocked.insert(id);
        next
    }

    /// Returns a copy rolled out to `percentage` percent of subjects.
    pub fn with_rollout_percentage(&self, percentage: u8) -> Self {
        AccessControl {
            rollout_percentage: percentage.min(FULL_ROLLOUT),
            ..self.clone()
        }
    }

    /// Returns true if this access control could deny anybody: either list is populated or the
    /// rollout is below 100%.
    pub fn has_restrictions(&self) -> bool {
        !self.allowed.is_empty()
            || !self.blocked.is_empty()
            || self.rollout_percentage() != FULL_ROLLOUT
    }

    /// Decides access for `subject_id` on the flag `flag_key`.
    pub fn evaluate(&self, subject_id: &str, flag_key: &str) -> AccessDecision {
        if self.blocked.contains(subject_id) {
            return AccessDecision::deny("Access is blocked");
        }
        if self.allowed.contains(subject_id) {
            return AccessDecision::allow("Access is allowed");
        }

        let threshold = self.rollout_percentage();
        let has_lists = !self.allowed.is_empty() || !self.blocked.is_empty();

        if !has_lists && threshold == 0 {
            return AccessDecision::deny("Access restricted to all");
        }
        if !has_lists && threshold == FULL_ROLLOUT {
            return AccessDecision::allow("Access unrestricted to all");
        }
        if has_lists {
            // an allow list makes the lists exhaustive; a bare block list only carves out
            return if self.allowed.is_empty() {
                AccessDecision::allow("Access is not blocked")
            } else {
                AccessDecision::deny("Access is not in allowed list")
            };
        }

        let subject_bucket = bucket(flag_key, subject_id);
        let mut decision = if subject_bucket < threshold {
            AccessDecision::allow(format!(
                "Id is in rollout: {}% < {}%",
                subject_bucket, threshold
            ))
        } else {
            AccessDecision::deny(format!(
                "Id is not in rollout: {}% >= {}%",
                subject_bucket, threshold
            ))
        };
        decision.bucket = Some(subject_bucket);
        decision
    }
}

impl Default for AccessControl {
    fn default() -> Self {
        AccessControl::unrestricted()
    }
}
