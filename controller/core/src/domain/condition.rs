// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Status Conditions
//!
//! A condition is a named boolean flag with reason and message, kept in an
//! entity's status. [`Conditioned`] is implemented once per entity type so the
//! condition helper in `crate::application::condition_status` can operate on
//! any of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reason recorded on a condition that went false.
pub const REASON_ERROR: &str = "Error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionType {
    /// A version number has been assigned to a `ModelTemplateVersion`
    Assigned,
    /// The serving config of a `ModelTemplateVersion` has been rendered
    Configured,
    /// `ModelTemplate.status.default_version` points at an assigned version
    DefaultVersionResolved,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Assigned => "assigned",
            Self::Configured => "configured",
            Self::DefaultVersionResolved => "defaultVersionResolved",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_update_time: DateTime<Utc>,
    pub last_transition_time: DateTime<Utc>,
}

/// Entity with a status-and-conditions shape.
pub trait Conditioned {
    fn conditions(&self) -> &[Condition];
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions()
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    fn is_condition_true(&self, condition_type: ConditionType) -> bool {
        self.condition(condition_type)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }

    /// Whether the persisted condition already has this truth value and message.
    fn condition_matches(
        &self,
        condition_type: ConditionType,
        is_true: bool,
        message: &str,
    ) -> bool {
        self.condition(condition_type)
            .map(|c| c.status == ConditionStatus::from_bool(is_true) && c.message == message)
            .unwrap_or(false)
    }

    /// Set the condition in place. Returns `false` when nothing changed.
    fn set_condition(
        &mut self,
        condition_type: ConditionType,
        is_true: bool,
        reason: &str,
        message: &str,
    ) -> bool {
        let status = ConditionStatus::from_bool(is_true);
        let now = Utc::now();
        let conditions = self.conditions_mut();

        match conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            Some(existing) => {
                if existing.status == status
                    && existing.reason == reason
                    && existing.message == message
                {
                    return false;
                }
                if existing.status != status {
                    existing.last_transition_time = now;
                }
                existing.status = status;
                existing.reason = reason.to_string();
                existing.message = message.to_string();
                existing.last_update_time = now;
            }
            None => conditions.push(Condition {
                condition_type,
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_update_time: now,
                last_transition_time: now,
            }),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Subject {
        conditions: Vec<Condition>,
    }

    impl Conditioned for Subject {
        fn conditions(&self) -> &[Condition] {
            &self.conditions
        }
        fn conditions_mut(&mut self) -> &mut Vec<Condition> {
            &mut self.conditions
        }
    }

    #[test]
    fn test_absent_condition_is_not_true() {
        let subject = Subject::default();
        assert!(!subject.is_condition_true(ConditionType::Assigned));
        assert!(!subject.condition_matches(ConditionType::Assigned, false, ""));
    }

    #[test]
    fn test_set_condition_reports_changes() {
        let mut subject = Subject::default();
        assert!(subject.set_condition(ConditionType::Assigned, true, "", ""));
        assert!(!subject.set_condition(ConditionType::Assigned, true, "", ""));
        assert!(subject.is_condition_true(ConditionType::Assigned));

        assert!(subject.set_condition(ConditionType::Assigned, false, REASON_ERROR, "lost"));
        assert_eq!(subject.conditions.len(), 1);
        assert!(subject.condition_matches(ConditionType::Assigned, false, "lost"));
    }

    #[test]
    fn test_transition_time_only_moves_on_status_flip() {
        let mut subject = Subject::default();
        subject.set_condition(ConditionType::Configured, false, REASON_ERROR, "first");
        let transitioned = subject.conditions[0].last_transition_time;

        subject.set_condition(ConditionType::Configured, false, REASON_ERROR, "second");
        assert_eq!(subject.conditions[0].last_transition_time, transitioned);
        assert_eq!(subject.conditions[0].message, "second");
    }
}
