//! Stage definition for phase-ordered pipeline execution.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Ordering key for init steps.
///
/// Lower phases run first. The named phases mirror the numeric prefixes of
/// classic `NN-name.sh` init script directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Phase(pub u32);

impl Phase {
    pub const ENVIRONMENT: Phase = Phase(10);
    pub const PACKAGES: Phase = Phase(20);
    pub const SYSTEM: Phase = Phase(30);
    pub const FINALIZE: Phase = Phase(90);

    const NAMED: [(&'static str, Phase); 4] = [
        ("environment", Phase::ENVIRONMENT),
        ("packages", Phase::PACKAGES),
        ("system", Phase::SYSTEM),
        ("finalize", Phase::FINALIZE),
    ];

    /// Resolve a symbolic phase name.
    pub fn from_name(name: &str) -> Option<Phase> {
        Self::NAMED
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, p)| *p)
    }

    pub fn name(&self) -> Option<&'static str> {
        Self::NAMED.iter().find(|(_, p)| p == self).map(|(n, _)| *n)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({})", name, self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

impl Serialize for Phase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> Deserialize<'de> for Phase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u32),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(Phase(n)),
            Repr::Name(name) => Phase::from_name(&name)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown phase '{}'", name))),
        }
    }
}

/// A stage contains every task of one phase.
///
/// Stages are executed in ascending phase order, and each stage's tasks are
/// executed sequentially in declaration order. Later tasks may depend on
/// filesystem state left by earlier ones, so there is no parallel mode.
///
/// Generic over task type T to allow different pipeline implementations.
#[derive(Debug, Clone)]
pub struct Stage<T> {
    pub phase: Phase,
    pub tasks: Vec<T>,
}

impl<T> Stage<T> {
    pub fn new(phase: Phase, tasks: Vec<T>) -> Self {
        Self { phase, tasks }
    }
}
