// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task identifiers and family-prefix helpers

/// Returns a string slice truncated to at most `n` characters.
pub fn short(s: &str, n: usize) -> &str {
    if s.len() <= n {
        s
    } else {
        &s[..n]
    }
}

/// Define a newtype ID over `SmolStr`.
///
/// `new()` generates `{prefix}{nanoid(19)}`; externally-assigned
/// identifiers (front-end task ids) come in through `from_string` and
/// carry no prefix requirement. The wrapper serializes transparently and
/// compares against plain string slices.
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($prefix:literal);
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub smol_str::SmolStr);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new random ID with the type prefix.
            pub fn new() -> Self {
                let id = format!("{}{}", Self::PREFIX, nanoid::nanoid!(19));
                Self(smol_str::SmolStr::new(&id))
            }

            /// Wrap an existing identifier (parsing, external ids).
            pub fn from_string(id: impl Into<smol_str::SmolStr>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::from_string(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::from_string(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

crate::define_id! {
    /// Identifier of one orchestrated run.
    ///
    /// A multi-step workflow launches one run per step; the runs share the
    /// base task id as a family prefix (`<base>.step<N>`), which is what
    /// bulk cancellation keys on.
    pub struct TaskId("task-");
}

/// Separator between the family base and the step suffix.
const STEP_SEP: &str = ".step";

impl TaskId {
    /// Derive the run identity for one workflow step.
    pub fn step_run(&self, step: u32) -> TaskId {
        TaskId::from_string(format!("{}{}{}", self.0, STEP_SEP, step))
    }

    /// The family base shared by all step runs of one workflow.
    pub fn family(&self) -> &str {
        match self.0.find(STEP_SEP) {
            Some(idx) => &self.0[..idx],
            None => &self.0,
        }
    }

    /// Whether this id belongs to the given task family.
    ///
    /// Separator-aware: `demo-421` is not in family `demo-42`.
    pub fn in_family(&self, family: &str) -> bool {
        self.family() == family
    }

    /// Step number encoded in a step-run id, if any.
    pub fn step(&self) -> Option<u32> {
        let idx = self.0.find(STEP_SEP)?;
        self.0[idx + STEP_SEP.len()..].parse().ok()
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
