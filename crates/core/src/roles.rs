//! Clinical job roles.
//!
//! An order targets exactly one role; only actors holding that role may
//! claim it from the worklist.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobRole {
    /// Ordering or reviewing physician.
    Doctor,
    Nurse,
    /// Radiology (imaging) worklist.
    Ris,
    /// Laboratory worklist.
    Lis,
}

impl JobRole {
    pub fn as_str(self) -> &'static str {
        match self {
            JobRole::Doctor => "DOCTOR",
            JobRole::Nurse => "NURSE",
            JobRole::Ris => "RIS",
            JobRole::Lis => "LIS",
        }
    }
}

impl fmt::Display for JobRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
