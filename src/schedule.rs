use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ActivationSchedule is the half-open interval `[enable_on, disable_on)` during which a
/// scheduled flag is active.
///
/// An unscheduled flag uses the minimum and maximum representable instants, which keeps every
/// comparison total without optional fields.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationSchedule {
    #[serde(default = "earliest", with = "lower_bound")]
    pub enable_on: DateTime<Utc>,
    #[serde(default = "latest", with = "upper_bound")]
    pub disable_on: DateTime<Utc>,
}

fn earliest() -> DateTime<Utc> {
    DateTime::<Utc>::MIN_UTC
}

fn latest() -> DateTime<Utc> {
    DateTime::<Utc>::MAX_UTC
}

// The sentinels are outside the range RFC 3339 can express, so they travel as null.
macro_rules! sentinel_bound {
    ($name:ident, $sentinel:expr) => {
        mod $name {
            use chrono::{DateTime, Utc};
            use serde::{Deserialize, Deserializer, Serializer};

            pub fn serialize<S: Serializer>(
                value: &DateTime<Utc>,
                serializer: S,
            ) -> Result<S::Ok, S::Error> {
                if *value == $sentinel {
                    serializer.serialize_none()
                } else {
                    serializer.serialize_some(value)
                }
            }

            pub fn deserialize<'de, D: Deserializer<'de>>(
                deserializer: D,
            ) -> Result<DateTime<Utc>, D::Error> {
                Ok(Option::<DateTime<Utc>>::deserialize(deserializer)?.unwrap_or($sentinel))
            }
        }
    };
}

sentinel_bound!(lower_bound, DateTime::<Utc>::MIN_UTC);
sentinel_bound!(upper_bound, DateTime::<Utc>::MAX_UTC);

/// Where an instant falls relative to an [ActivationSchedule].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulePhase {
    NotYetEnabled,
    Active,
    Disabled,
}

impl ActivationSchedule {
    pub fn new(enable_on: DateTime<Utc>, disable_on: DateTime<Utc>) -> Self {
        ActivationSchedule {
            enable_on,
            disable_on,
        }
    }

    pub fn unscheduled() -> Self {
        ActivationSchedule {
            enable_on: DateTime::<Utc>::MIN_UTC,
            disable_on: DateTime::<Utc>::MAX_UTC,
        }
    }

    /// Active from `enable_on` with no end.
    pub fn starting(enable_on: DateTime<Utc>) -> Self {
        ActivationSchedule {
            enable_on,
            disable_on: DateTime::<Utc>::MAX_UTC,
        }
    }

    /// Active until `disable_on`.
    pub fn until(disable_on: DateTime<Utc>) -> Self {
        ActivationSchedule {
            enable_on: DateTime::<Utc>::MIN_UTC,
            disable_on,
        }
    }

    pub fn is_unscheduled(&self) -> bool {
        self.enable_on == DateTime::<Utc>::MIN_UTC && self.disable_on == DateTime::<Utc>::MAX_UTC
    }

    pub fn phase_at(&self, at: DateTime<Utc>) -> SchedulePhase {
        if self.is_unscheduled() {
            return SchedulePhase::Active;
        }
        if at < self.enable_on {
            SchedulePhase::NotYetEnabled
        } else if at < self.disable_on {
            SchedulePhase::Active
        } else {
            SchedulePhase::Disabled
        }
    }
}

impl Default for ActivationSchedule {
    fn default() -> Self {
        ActivationSchedule::unscheduled()
    }
}
