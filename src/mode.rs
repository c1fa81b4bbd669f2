use std::fmt;

use serde::{Deserialize, Serialize};

/// EvaluationMode names one of the strategies a flag can be evaluated with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum EvaluationMode {
    /// The flag is explicitly disabled for everybody.
    Off,
    /// The flag is explicitly enabled for everybody.
    On,
    /// The flag is active between its enable and disable instants.
    Scheduled,
    /// The flag is active during its operational window.
    TimeWindow,
    /// The flag is decided by the user allow/block lists.
    UserTargeted,
    /// The flag is rolled out to a percentage of users.
    UserRolloutPercentage,
    /// The flag is decided by the tenant allow/block lists.
    TenantTargeted,
    /// The flag is rolled out to a percentage of tenants.
    TenantRolloutPercentage,
}

impl EvaluationMode {
    const ALL: [EvaluationMode; 8] = [
        EvaluationMode::Off,
        EvaluationMode::On,
        EvaluationMode::Scheduled,
        EvaluationMode::TimeWindow,
        EvaluationMode::UserTargeted,
        EvaluationMode::UserRolloutPercentage,
        EvaluationMode::TenantTargeted,
        EvaluationMode::TenantRolloutPercentage,
    ];

    /// Returns true for `Off` and `On`, which exclude every other mode.
    pub fn is_terminal(self) -> bool {
        matches!(self, EvaluationMode::Off | EvaluationMode::On)
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

const TERMINAL_BITS: u8 = 0b11;

/// ModeSet is the non-empty set of modes active on a flag.
///
/// Adding `Off` or `On` clears every other mode; adding any other mode clears `Off` and `On`.
/// Removing the last mode leaves the set at `Off`, so the set is never empty.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "Vec<EvaluationMode>", into = "Vec<EvaluationMode>")]
pub struct ModeSet(u8);

impl ModeSet {
    /// Creates a set holding only `mode`.
    pub fn new(mode: EvaluationMode) -> Self {
        ModeSet(mode.bit())
    }

    pub fn contains(&self, mode: EvaluationMode) -> bool {
        self.0 & mode.bit() != 0
    }

    pub fn insert(&mut self, mode: EvaluationMode) {
        if mode.is_terminal() {
            self.0 = mode.bit();
        } else {
            self.0 = (self.0 & !TERMINAL_BITS) | mode.bit();
        }
    }

    /// Returns a copy of this set with `mode` inserted.
    pub fn with(mut self, mode: EvaluationMode) -> Self {
        self.insert(mode);
        self
    }

    pub fn remove(&mut self, mode: EvaluationMode) {
        self.0 &= !mode.bit();
        if self.0 == 0 {
            self.0 = EvaluationMode::Off.bit();
        }
    }

    /// Returns true when the set is exactly `Off` or exactly `On`.
    pub fn is_terminal(&self) -> bool {
        self.0 & TERMINAL_BITS != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = EvaluationMode> + '_ {
        EvaluationMode::ALL
            .iter()
            .copied()
            .filter(move |mode| self.contains(*mode))
    }
}

impl Default for ModeSet {
    fn default() -> Self {
        ModeSet::new(EvaluationMode::Off)
    }
}

impl From<EvaluationMode> for ModeSet {
    fn from(mode: EvaluationMode) -> Self {
        ModeSet::new(mode)
    }
}

impl From<Vec<EvaluationMode>> for ModeSet {
    fn from(modes: Vec<EvaluationMode>) -> Self {
        modes.into_iter().collect()
    }
}

impl FromIterator<EvaluationMode> for ModeSet {
    fn from_iter<I: IntoIterator<Item = EvaluationMode>>(iter: I) -> Self {
        let mut set: Option<ModeSet> = None;
        for mode in iter {
            match set.as_mut() {
                Some(set) => set.insert(mode),
                None => set = Some(ModeSet::new(mode)),
            }
        }
        set.unwrap_or_default()
    }
}

impl From<ModeSet> for Vec<EvaluationMode> {
    fn from(set: ModeSet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Debug for ModeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
