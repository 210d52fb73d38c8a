//! Actor attribution for audited operations.
//!
//! Every operation that ends up in the audit ledger takes an explicit
//! `Actor` rather than reading ambient session state, so attribution is
//! visible at the call site and trivially testable.

use serde::{Deserialize, Serialize};

/// The person (or system) performing an attributable operation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub name: String,
    pub role: String,
}

impl Actor {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
        }
    }

    /// Rendering used to stamp ledger entries, e.g. `"a. sari (admission)"`.
    pub fn stamp(&self) -> String {
        format!("{} ({})", self.name, self.role)
    }
}
