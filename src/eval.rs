use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use log::debug;
use serde::Serialize;
use serde_json::Value;

use crate::access::AccessControl;
use crate::context::EvaluationContext;
use crate::error::{EvaluationError, SubjectKind};
use crate::flag::{FlagConfiguration, OFF_VARIATION, ON_VARIATION};
use crate::mode::EvaluationMode;
use crate::rule::first_matching_rule;
use crate::schedule::SchedulePhase;
use crate::window::WindowStatus;

/// Reason reported when more than one evaluator enabled the flag.
pub const ALL_CONDITIONS_MET: &str = "All configured conditions met for feature flag activation";

/// EvaluationResult is the decision for one flag and one context.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub is_enabled: bool,
    /// Name of the variation to serve.
    pub variation: String,
    /// Human-readable account of which rule decided.
    pub reason: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl EvaluationResult {
    pub fn enabled(variation: impl Into<String>, reason: impl Into<String>) -> Self {
        EvaluationResult {
            is_enabled: true,
            variation: variation.into(),
            reason: reason.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn disabled(variation: impl Into<String>, reason: impl Into<String>) -> Self {
        EvaluationResult {
            is_enabled: false,
            variation: variation.into(),
            reason: reason.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl Default for EvaluationResult {
    fn default() -> Self {
        EvaluationResult::disabled(OFF_VARIATION, "")
    }
}

/// Evaluator is one rule of the evaluation pipeline.
///
/// The pipeline asks every evaluator whether it applies to a flag and context, then runs the
/// applicable ones in ascending [Evaluator::priority] order.
pub trait Evaluator: Send + Sync {
    /// Short name recorded in result metadata.
    fn name(&self) -> &'static str;

    /// Lower runs first.
    fn priority(&self) -> u8;

    fn can_process(&self, flag: &FlagConfiguration, context: &EvaluationContext) -> bool;

    fn evaluate(
        &self,
        flag: &FlagConfiguration,
        context: &EvaluationContext,
        at: DateTime<Utc>,
    ) -> Result<EvaluationResult, EvaluationError>;
}

/// Decides user or tenant access through the flag's [AccessControl].
///
/// Applies when the flag runs in the matching targeted or percentage mode, and also whenever
/// the access control restricts anybody, whatever the flag's modes.
pub struct RolloutEvaluator {
    subject: SubjectKind,
}

impl RolloutEvaluator {
    pub fn user() -> Self {
        RolloutEvaluator {
            subject: SubjectKind::User,
        }
    }

    pub fn tenant() -> Self {
        RolloutEvaluator {
            subject: SubjectKind::Tenant,
        }
    }

    fn access<'a>(&self, flag: &'a FlagConfiguration) -> &'a AccessControl {
        match self.subject {
            SubjectKind::User => flag.user_access(),
            SubjectKind::Tenant => flag.tenant_access(),
        }
    }

    fn modes(&self) -> [EvaluationMode; 2] {
        match self.subject {
            SubjectKind::User => [
                EvaluationMode::UserTargeted,
                EvaluationMode::UserRolloutPercentage,
            ],
            SubjectKind::Tenant => [
                EvaluationMode::TenantTargeted,
                EvaluationMode::TenantRolloutPercentage,
            ],
        }
    }

    fn subject_id<'a>(&self, context: &'a EvaluationContext) -> Option<&'a str> {
        match self.subject {
            SubjectKind::User => context.user_id(),
            SubjectKind::Tenant => context.tenant_id(),
        }
    }
}

impl Evaluator for RolloutEvaluator {
    fn name(&self) -> &'static str {
        match self.subject {
            SubjectKind::User => "userRollout",
            SubjectKind::Tenant => "tenantRollout",
        }
    }

    fn priority(&self) -> u8 {
        match self.subject {
            SubjectKind::Tenant => 1,
            SubjectKind::User => 2,
        }
    }

    fn can_process(&self, flag: &FlagConfiguration, _context: &EvaluationContext) -> bool {
        self.modes().iter().any(|mode| flag.modes().contains(*mode))
            || self.access(flag).has_restrictions()
    }

    fn evaluate(
        &self,
        flag: &FlagConfiguration,
        context: &EvaluationContext,
        _at: DateTime<Utc>,
    ) -> Result<EvaluationResult, EvaluationError> {
        let id = self
            .subject_id(context)
            .ok_or_else(|| EvaluationError::MissingSubject {
                flag_key: flag.key.clone(),
                subject: self.subject,
            })?;

        let decision = self.access(flag).evaluate(id, &flag.key);
        let result = if decision.allowed {
            EvaluationResult::enabled(flag.pick_variation(context.subject_id()), decision.reason)
        } else {
            EvaluationResult::disabled(flag.default_variation(), decision.reason)
        };

        Ok(match decision.bucket {
            Some(bucket) => result.with_metadata("bucket", bucket),
            None => result,
        })
    }
}

/// Gates a [EvaluationMode::Scheduled] flag on its activation schedule.
pub struct ScheduleEvaluator;

impl Evaluator for ScheduleEvaluator {
    fn name(&self) -> &'static str {
        "schedule"
    }

    fn priority(&self) -> u8 {
        3
    }

    fn can_process(&self, flag: &FlagConfiguration, _context: &EvaluationContext) -> bool {
        flag.modes().contains(EvaluationMode::Scheduled)
    }

    fn evaluate(
        &self,
        flag: &FlagConfiguration,
        context: &EvaluationContext,
        at: DateTime<Utc>,
    ) -> Result<EvaluationResult, EvaluationError> {
        Ok(match flag.schedule().phase_at(at) {
            SchedulePhase::NotYetEnabled => {
                EvaluationResult::disabled(flag.default_variation(), "Enable date not reached")
            }
            SchedulePhase::Active => EvaluationResult::enabled(
                flag.pick_variation(context.subject_id()),
                "Schedule active",
            ),
            SchedulePhase::Disabled => {
                EvaluationResult::disabled(flag.default_variation(), "Disable date passed")
            }
        })
    }
}

/// Gates a [EvaluationMode::TimeWindow] flag on its operational window.
pub struct WindowEvaluator;

impl Evaluator for WindowEvaluator {
    fn name(&self) -> &'static str {
        "timeWindow"
    }

    fn priority(&self) -> u8 {
        4
    }

    fn can_process(&self, flag: &FlagConfiguration, _context: &EvaluationContext) -> bool {
        flag.modes().contains(EvaluationMode::TimeWindow)
    }

    fn evaluate(
        &self,
        flag: &FlagConfiguration,
        context: &EvaluationContext,
        at: DateTime<Utc>,
    ) -> Result<EvaluationResult, EvaluationError> {
        Ok(match flag.window().status_at(at, context.time_zone()) {
            WindowStatus::Within => EvaluationResult::enabled(
                flag.pick_variation(context.subject_id()),
                "Within time window",
            ),
            WindowStatus::OutsideTime => {
                EvaluationResult::disabled(flag.default_variation(), "Outside time window")
            }
            WindowStatus::OutsideDays => {
                EvaluationResult::disabled(flag.default_variation(), "Outside allowed days")
            }
        })
    }
}

/// Serves the variation of the first targeting rule the context matches.
pub struct TargetingEvaluator;

impl Evaluator for TargetingEvaluator {
    fn name(&self) -> &'static str {
        "targeting"
    }

    fn priority(&self) -> u8 {
        5
    }

    fn can_process(&self, flag: &FlagConfiguration, _context: &EvaluationContext) -> bool {
        !flag.rules().is_empty()
    }

    fn evaluate(
        &self,
        flag: &FlagConfiguration,
        context: &EvaluationContext,
        _at: DateTime<Utc>,
    ) -> Result<EvaluationResult, EvaluationError> {
        if context.subject_id().is_none() {
            return Ok(EvaluationResult::disabled(
                flag.default_variation(),
                "No subject to target",
            ));
        }

        Ok(match first_matching_rule(flag.rules(), context) {
            Some((index, rule)) => EvaluationResult::enabled(
                rule.variation.clone(),
                format!("Matched targeting rule on {}", rule.attribute),
            )
            .with_metadata("ruleIndex", index),
            None => {
                EvaluationResult::disabled(flag.default_variation(), "No targeting rule matched")
            }
        })
    }
}

/// Serves the explicit `Off` and `On` states. Always the last rule to run.
pub struct TerminalEvaluator;

impl Evaluator for TerminalEvaluator {
    fn name(&self) -> &'static str {
        "terminal"
    }

    fn priority(&self) -> u8 {
        99
    }

    fn can_process(&self, flag: &FlagConfiguration, _context: &EvaluationContext) -> bool {
        flag.modes().is_terminal()
    }

    fn evaluate(
        &self,
        flag: &FlagConfiguration,
        _context: &EvaluationContext,
        _at: DateTime<Utc>,
    ) -> Result<EvaluationResult, EvaluationError> {
        Ok(if flag.modes().contains(EvaluationMode::On) {
            EvaluationResult::enabled(ON_VARIATION, "Explicitly enabled")
        } else {
            EvaluationResult::disabled(flag.default_variation(), "Explicitly disabled")
        })
    }
}

/// Pipeline runs the applicable evaluators in priority order.
///
/// The first evaluator that disables the flag decides. If every applicable evaluator enables
/// it, the last one's variation is served; when several agreed their reasons are replaced by
/// [ALL_CONDITIONS_MET]. A pipeline in which no evaluator applies yields no result.
pub struct Pipeline {
    evaluators: Vec<Box<dyn Evaluator>>,
}

impl Pipeline {
    pub fn new(evaluators: Vec<Box<dyn Evaluator>>) -> Self {
        let evaluators = evaluators
            .into_iter()
            .sorted_by_key(|evaluator| evaluator.priority())
            .collect();
        Pipeline { evaluators }
    }

    /// The full rule set: tenant rollout, user rollout, schedule, time window, targeting
    /// rules, then the terminal state.
    pub fn standard() -> Self {
        Pipeline::new(vec![
            Box::new(RolloutEvaluator::tenant()),
            Box::new(RolloutEvaluator::user()),
            Box::new(ScheduleEvaluator),
            Box::new(WindowEvaluator),
            Box::new(TargetingEvaluator),
            Box::new(TerminalEvaluator),
        ])
    }

    pub fn evaluate(
        &self,
        flag: &FlagConfiguration,
        context: &EvaluationContext,
        at: DateTime<Utc>,
    ) -> Result<Option<EvaluationResult>, EvaluationError> {
        let mut last_enabled: Option<EvaluationResult> = None;
        let mut contributors: Vec<&'static str> = Vec::new();

        for evaluator in self
            .evaluators
            .iter()
            .filter(|evaluator| evaluator.can_process(flag, context))
        {
            let result = evaluator.evaluate(flag, context, at)?;
            debug!(
                "{} evaluator on flag {}: enabled={} ({})",
                evaluator.name(),
                flag.key,
                result.is_enabled,
                result.reason
            );

            if !result.is_enabled {
                return Ok(Some(result.with_metadata("evaluator", evaluator.name())));
            }
            contributors.push(evaluator.name());
            last_enabled = Some(result);
        }

        Ok(last_enabled.map(|result| {
            if contributors.len() == 1 {
                result.with_metadata("evaluator", contributors[0])
            } else {
                EvaluationResult {
                    reason: ALL_CONDITIONS_MET.to_string(),
                    ..result
                }
                .with_metadata("evaluators", contributors)
            }
        }))
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::Variations;
    use crate::rule::{Operator, TargetingRule};
    use crate::schedule::ActivationSchedule;
    use crate::window::OperationalWindow;
    use crate::ContextBuilder;
    use assert_json_diff::assert_json_eq;
    use chrono::{NaiveTime, TimeZone};
    use serde_json::json;
    use spectral::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use test_case::test_case;

    // 2024-03-04 is a Monday
    fn monday(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap()
    }

    fn hm(hour: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, 0, 0).unwrap()
    }

    fn alice() -> EvaluationContext {
        ContextBuilder::for_user("alice").build()
    }

    fn run(
        flag: &FlagConfiguration,
        context: &EvaluationContext,
        at: DateTime<Utc>,
    ) -> EvaluationResult {
        Pipeline::standard()
            .evaluate(flag, context, at)
            .unwrap()
            .unwrap()
    }

    struct Scripted {
        name: &'static str,
        priority: u8,
        enabled: bool,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn boxed(
            name: &'static str,
            priority: u8,
            enabled: bool,
        ) -> (Box<dyn Evaluator>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let evaluator: Box<dyn Evaluator> = Box::new(Scripted {
                name,
                priority,
                enabled,
                calls: calls.clone(),
            });
            (evaluator, calls)
        }
    }

    impl Evaluator for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn can_process(&self, _flag: &FlagConfiguration, _context: &EvaluationContext) -> bool {
            true
        }

        fn evaluate(
            &self,
            _flag: &FlagConfiguration,
            _context: &EvaluationContext,
            _at: DateTime<Utc>,
        ) -> Result<EvaluationResult, EvaluationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(if self.enabled {
                EvaluationResult::enabled(self.name, format!("{} says yes", self.name))
            } else {
                EvaluationResult::disabled("off", format!("{} says no", self.name))
            })
        }
    }

    #[test]
    fn disabled_result_short_circuits() {
        let (deny, deny_calls) = Scripted::boxed("deny", 1, false);
        let (allow, allow_calls) = Scripted::boxed("allow", 2, true);
        // registration order must not matter
        let pipeline = Pipeline::new(vec![allow, deny]);

        let flag = FlagConfiguration::new("flag", EvaluationMode::On);
        let result = pipeline.evaluate(&flag, &alice(), monday(12)).unwrap().unwrap();

        assert_that!(result.is_enabled).is_false();
        assert_that!(result.reason.as_str()).is_equal_to("deny says no");
        assert_that!(deny_calls.load(Ordering::SeqCst)).is_equal_to(1);
        assert_that!(allow_calls.load(Ordering::SeqCst)).is_equal_to(0);
    }

    #[test]
    fn agreeing_evaluators_combine_reason_and_keep_last_variation() {
        let (first, _) = Scripted::boxed("first", 1, true);
        let (second, _) = Scripted::boxed("second", 2, true);
        let pipeline = Pipeline::new(vec![second, first]);

        let flag = FlagConfiguration::new("flag", EvaluationMode::On);
        let result = pipeline.evaluate(&flag, &alice(), monday(12)).unwrap().unwrap();

        assert_that!(result.is_enabled).is_true();
        assert_that!(result.variation.as_str()).is_equal_to("second");
        assert_that!(result.reason.as_str()).is_equal_to(ALL_CONDITIONS_MET);
        assert_that!(result.metadata.get("evaluators"))
            .contains_value(&json!(["first", "second"]));
    }

    #[test]
    fn no_applicable_evaluator_yields_nothing() {
        let pipeline = Pipeline::new(vec![Box::new(ScheduleEvaluator)]);
        let flag = FlagConfiguration::new("flag", EvaluationMode::On);
        assert_that!(pipeline.evaluate(&flag, &alice(), monday(12)).unwrap()).is_none();
    }

    #[test]
    fn on_flag_serves_on() {
        let flag = FlagConfiguration::new("flag", EvaluationMode::On);
        let result = run(&flag, &EvaluationContext::anonymous(), monday(12));
        assert_that!(result.is_enabled).is_true();
        assert_that!(result.variation.as_str()).is_equal_to("on");
        assert_that!(result.reason.as_str()).is_equal_to("Explicitly enabled");
    }

    #[test]
    fn off_flag_serves_default() {
        let flag = FlagConfiguration::new("flag", EvaluationMode::Off)
            .with_variations(Variations::new("control"));
        let result = run(&flag, &alice(), monday(12));
        assert_that!(result.is_enabled).is_false();
        assert_that!(result.variation.as_str()).is_equal_to("control");
        assert_that!(result.reason.as_str()).is_equal_to("Explicitly disabled");
    }

    #[test]
    fn zero_percent_user_rollout_denies() {
        let flag = FlagConfiguration::new("flag", EvaluationMode::UserRolloutPercentage)
            .with_user_access(AccessControl::new(0));
        let result = run(&flag, &alice(), monday(12));
        assert_that!(result.is_enabled).is_false();
        assert_that!(result.reason.as_str()).is_equal_to("Access restricted to all");
    }

    #[test]
    fn percentage_rollout_records_bucket() {
        // "new-checkout"/"alice" is bucket 40
        let flag = FlagConfiguration::new("new-checkout", EvaluationMode::UserRolloutPercentage)
            .with_user_access(AccessControl::new(50));
        let result = run(&flag, &alice(), monday(12));
        assert_that!(result.is_enabled).is_true();
        assert_that!(result.metadata.get("bucket")).contains_value(&json!(40));
    }

    #[test]
    fn rollout_without_subject_is_an_error() {
        let flag = FlagConfiguration::new("flag", EvaluationMode::TenantRolloutPercentage)
            .with_tenant_access(AccessControl::new(50));
        let err = Pipeline::standard()
            .evaluate(&flag, &alice(), monday(12))
            .unwrap_err();
        match err {
            EvaluationError::MissingSubject { flag_key, subject } => {
                assert_that!(flag_key.as_str()).is_equal_to("flag");
                assert_that!(subject).is_equal_to(SubjectKind::Tenant);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn access_restriction_applies_to_on_flag() {
        let flag = FlagConfiguration::new("flag", EvaluationMode::On)
            .with_user_access(AccessControl::unrestricted().block_for("mallory"));

        let mallory = ContextBuilder::for_user("mallory").build();
        let result = run(&flag, &mallory, monday(12));
        assert_that!(result.is_enabled).is_false();
        assert_that!(result.reason.as_str()).is_equal_to("Access is blocked");

        let result = run(&flag, &alice(), monday(12));
        assert_that!(result.is_enabled).is_true();
        assert_that!(result.variation.as_str()).is_equal_to("on");
        assert_that!(result.reason.as_str()).is_equal_to(ALL_CONDITIONS_MET);
    }

    #[test]
    fn allow_list_does_not_revive_off_flag() {
        let flag = FlagConfiguration::new("flag", EvaluationMode::Off)
            .with_user_access(AccessControl::restricted().allow_for("alice"));
        let result = run(&flag, &alice(), monday(12));
        assert_that!(result.is_enabled).is_false();
        assert_that!(result.reason.as_str()).is_equal_to("Explicitly disabled");
    }

    #[test_case(12, true, "Within time window")]
    #[test_case(20, false, "Outside time window")]
    fn business_hours_window(hour: u32, enabled: bool, reason: &str) {
        let flag = FlagConfiguration::new("flag", EvaluationMode::TimeWindow)
            .with_window(OperationalWindow::new(hm(9), hm(17), "UTC"));
        let result = run(&flag, &alice(), monday(hour));
        assert_that!(result.is_enabled).is_equal_to(enabled);
        assert_that!(result.reason.as_str()).is_equal_to(reason);
    }

    #[test]
    fn window_reads_context_time_zone() {
        let flag = FlagConfiguration::new("flag", EvaluationMode::TimeWindow)
            .with_window(OperationalWindow::new(hm(9), hm(17), "UTC"));
        // 12:00 UTC is 21:00 in Tokyo
        let context = ContextBuilder::for_user("alice").time_zone("Asia/Tokyo").build();
        let result = run(&flag, &context, monday(12));
        assert_that!(result.is_enabled).is_false();
    }

    #[test_case(8, false, "Enable date not reached")]
    #[test_case(9, true, "Schedule active")]
    #[test_case(17, false, "Disable date passed")]
    fn schedule_boundaries(hour: u32, enabled: bool, reason: &str) {
        let flag = FlagConfiguration::new("flag", EvaluationMode::Scheduled)
            .with_schedule(ActivationSchedule::new(monday(9), monday(17)));
        let result = run(&flag, &alice(), monday(hour));
        assert_that!(result.is_enabled).is_equal_to(enabled);
        assert_that!(result.reason.as_str()).is_equal_to(reason);
    }

    #[test]
    fn schedule_and_window_must_both_hold() {
        let flag = FlagConfiguration::new("flag", EvaluationMode::Scheduled)
            .with_mode(EvaluationMode::TimeWindow)
            .with_schedule(ActivationSchedule::starting(monday(0)))
            .with_window(OperationalWindow::new(hm(9), hm(17), "UTC"));

        let result = run(&flag, &alice(), monday(12));
        assert_that!(result.is_enabled).is_true();
        assert_that!(result.reason.as_str()).is_equal_to(ALL_CONDITIONS_MET);

        let result = run(&flag, &alice(), monday(20));
        assert_that!(result.is_enabled).is_false();
        assert_that!(result.reason.as_str()).is_equal_to("Outside time window");
        assert_that!(result.metadata.get("evaluator")).contains_value(&json!("timeWindow"));
    }

    #[test]
    fn targeting_first_match_wins() {
        let flag = FlagConfiguration::new("flag", EvaluationMode::TimeWindow)
            .with_rule(TargetingRule::new("plan", Operator::Equals, vec!["pro"], "gold"))
            .with_rule(TargetingRule::new("plan", Operator::Contains, vec!["pr"], "silver"));
        let context = ContextBuilder::for_user("alice").set_string("plan", "Pro").build();

        let result = run(&flag, &context, monday(12));
        assert_that!(result.is_enabled).is_true();
        assert_that!(result.variation.as_str()).is_equal_to("gold");
        assert_that!(result.metadata.get("ruleIndex")).contains_value(&json!(0));
    }

    #[test]
    fn targeting_miss_disables_with_default_variation() {
        let flag = FlagConfiguration::new("flag", EvaluationMode::TimeWindow)
            .with_rule(TargetingRule::new("plan", Operator::Equals, vec!["pro"], "gold"))
            .with_variations(Variations::new("standard"));

        let free = ContextBuilder::for_user("alice").set_string("plan", "free").build();
        let result = run(&flag, &free, monday(12));
        assert_that!(result.is_enabled).is_false();
        assert_that!(result.variation.as_str()).is_equal_to("standard");

        let anonymous = ContextBuilder::new().set_string("plan", "pro").build();
        let result = run(&flag, &anonymous, monday(12));
        assert_that!(result.is_enabled).is_false();
        assert_that!(result.reason.as_str()).is_equal_to("No subject to target");
    }

    #[test]
    fn result_serializes_camel_case() {
        let result = EvaluationResult::enabled("on", "Explicitly enabled")
            .with_metadata("evaluator", "terminal");
        assert_json_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "isEnabled": true,
                "variation": "on",
                "reason": "Explicitly enabled",
                "metadata": {"evaluator": "terminal"}
            })
        );

        assert_json_eq!(
            serde_json::to_value(EvaluationResult::default()).unwrap(),
            json!({"isEnabled": false, "variation": "off", "reason": ""})
        );
    }
}
