use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::access::AccessControl;
use crate::bucket::{bucket, BUCKET_COUNT};
use crate::flag_value::FlagValue;
use crate::mode::{EvaluationMode, ModeSet};
use crate::rule::TargetingRule;
use crate::schedule::ActivationSchedule;
use crate::window::OperationalWindow;

/// Variation served by the `On` terminal state.
pub const ON_VARIATION: &str = "on";
/// Variation served when nothing else applies.
pub const OFF_VARIATION: &str = "off";

/// FlagScope separates flags that share a key: a global flag is distinct from the flag of the
/// same key belonging to one version of one application.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum FlagScope {
    Global,
    Application {
        name: String,
        version: semver::Version,
    },
}

impl FlagScope {
    pub fn application(name: impl Into<String>, version: semver::Version) -> Self {
        FlagScope::Application {
            name: name.into(),
            version,
        }
    }
}

impl Default for FlagScope {
    fn default() -> Self {
        FlagScope::Global
    }
}

impl fmt::Display for FlagScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagScope::Global => f.write_str("global"),
            FlagScope::Application { name, version } => write!(f, "app:{}:{}", name, version),
        }
    }
}

/// Variations is the table of named payloads a flag can serve, plus the name served by default.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Variations {
    default: String,
    #[serde(default)]
    values: BTreeMap<String, FlagValue>,
}

impl Variations {
    pub fn new(default: impl Into<String>) -> Self {
        Variations {
            default: default.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    pub fn get(&self, name: &str) -> Option<&FlagValue> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Picks a variation for `subject_id` by spreading buckets evenly over the variation names
    /// in sorted order. Anonymous subjects and empty tables get the default.
    pub fn pick(&self, flag_key: &str, subject_id: Option<&str>) -> &str {
        let subject_id = match subject_id {
            Some(id) if !self.values.is_empty() => id,
            _ => return &self.default,
        };
        let index = bucket(flag_key, subject_id) as usize * self.values.len() / BUCKET_COUNT as usize;
        self.values
            .keys()
            .nth(index)
            .map(String::as_str)
            .unwrap_or(&self.default)
    }
}

impl Default for Variations {
    fn default() -> Self {
        Variations::new(OFF_VARIATION)
    }
}

/// FlagConfiguration is the complete, immutable description of how one flag is evaluated.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagConfiguration {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,

    pub(crate) modes: ModeSet,
    #[serde(default)]
    pub(crate) schedule: ActivationSchedule,
    #[serde(default)]
    pub(crate) window: OperationalWindow,
    #[serde(default)]
    pub(crate) user_access: AccessControl,
    #[serde(default)]
    pub(crate) tenant_access: AccessControl,
    #[serde(default)]
    pub(crate) rules: Vec<TargetingRule>,
    #[serde(default)]
    pub(crate) variations: Variations,
}

impl FlagConfiguration {
    /// Creates the minimal configuration for `key`: a single mode, no schedule or window
    /// restrictions, unrestricted access, no rules and an empty variation table.
    pub fn new(key: impl Into<String>, mode: EvaluationMode) -> Self {
        FlagConfiguration {
            key: key.into(),
            name: String::new(),
            description: String::new(),
            modes: ModeSet::new(mode),
            schedule: ActivationSchedule::unscheduled(),
            window: OperationalWindow::always_open(),
            user_access: AccessControl::unrestricted(),
            tenant_access: AccessControl::unrestricted(),
            rules: Vec::new(),
            variations: Variations::default(),
        }
    }

    pub fn with_mode(mut self, mode: EvaluationMode) -> Self {
        self.modes.insert(mode);
        self
    }

    pub fn with_schedule(mut self, schedule: ActivationSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_window(mut self, window: OperationalWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_user_access(mut self, access: AccessControl) -> Self {
        self.user_access = access;
        self
    }

    pub fn with_tenant_access(mut self, access: AccessControl) -> Self {
        self.tenant_access = access;
        self
    }

    pub fn with_rule(mut self, rule: TargetingRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_variations(mut self, variations: Variations) -> Self {
        self.variations = variations;
        self
    }

    pub fn modes(&self) -> &ModeSet {
        &self.modes
    }

    pub fn schedule(&self) -> &ActivationSchedule {
        &self.schedule
    }

    pub fn window(&self) -> &OperationalWindow {
        &self.window
    }

    pub fn user_access(&self) -> &AccessControl {
        &self.user_access
    }

    pub fn tenant_access(&self) -> &AccessControl {
        &self.tenant_access
    }

    pub fn rules(&self) -> &[TargetingRule] {
        &self.rules
    }

    pub fn variations(&self) -> &Variations {
        &self.variations
    }

    pub fn default_variation(&self) -> &str {
        self.variations.default_name()
    }

    pub fn pick_variation(&self, subject_id: Option<&str>) -> String {
        self.variations.pick(&self.key, subject_id).to_string()
    }
}
