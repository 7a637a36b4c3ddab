//! Service order (OCS) lifecycle state machine.
//!
//! Orders are created on the server and only ever hydrated and transitioned
//! by the client:
//!
//! ```text
//! ORDERED -> ACCEPTED -> IN_PROGRESS -> RESULT_READY -> CONFIRMED
//!    \__________\_____________\______________\________-> CANCELLED
//! ```
//!
//! Each transition is authorised for a specific actor, and every successful
//! transition appends exactly one [`HistoryEntry`]. A failed attempt leaves
//! status and history untouched.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::order_result::{normalize_cancel_reason, validate_result};
use crate::roles::JobRole;
use crate::types::{DbId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Ordered,
    Accepted,
    InProgress,
    ResultReady,
    Confirmed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Ordered => "ORDERED",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::InProgress => "IN_PROGRESS",
            OrderStatus::ResultReady => "RESULT_READY",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The user attempting a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: DbId,
    pub role: JobRole,
}

impl Actor {
    pub fn new(id: DbId, role: JobRole) -> Self {
        Self { id, role }
    }
}

/// One audit-trail entry. Never mutated or reordered once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: Timestamp,
    pub actor: DbId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A requested order transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OrderCommand {
    Accept,
    Start,
    SubmitResult { result: serde_json::Value },
    Confirm { accepted: bool },
    Cancel {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl OrderCommand {
    /// Status the order ends up in if the command succeeds.
    pub fn target(&self) -> OrderStatus {
        match self {
            OrderCommand::Accept => OrderStatus::Accepted,
            OrderCommand::Start => OrderStatus::InProgress,
            OrderCommand::SubmitResult { .. } => OrderStatus::ResultReady,
            OrderCommand::Confirm { .. } => OrderStatus::Confirmed,
            OrderCommand::Cancel { .. } => OrderStatus::Cancelled,
        }
    }

    /// Path segment of the server endpoint for this transition.
    pub fn endpoint(&self) -> &'static str {
        match self {
            OrderCommand::Accept => "accept",
            OrderCommand::Start => "start",
            OrderCommand::SubmitResult { .. } => "result",
            OrderCommand::Confirm { .. } => "confirm",
            OrderCommand::Cancel { .. } => "cancel",
        }
    }
}

/// Result of a transition that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Status changed and one history entry was appended.
    Applied,
    /// Identical retry by the same actor; nothing changed.
    AlreadyApplied,
}

/// Wire form of an order as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: DbId,
    pub requester: DbId,
    pub target_role: JobRole,
    pub status: OrderStatus,
    #[serde(default)]
    pub assignee: Option<DbId>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub outcome: Option<bool>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// A service order hydrated from a server snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    inner: OrderSnapshot,
}

impl Order {
    /// Build an order from a server snapshot.
    ///
    /// Rejects snapshots whose history is not a chronological chain starting
    /// at `ORDERED` and ending in the current status, or whose fields do not
    /// match that status.
    pub fn hydrate(snapshot: OrderSnapshot) -> Result<Self, CoreError> {
        validate_history(&snapshot)?;
        validate_fields(&snapshot)?;
        Ok(Self { inner: snapshot })
    }

    pub fn order_id(&self) -> DbId {
        self.inner.order_id
    }

    pub fn requester(&self) -> DbId {
        self.inner.requester
    }

    pub fn target_role(&self) -> JobRole {
        self.inner.target_role
    }

    pub fn status(&self) -> OrderStatus {
        self.inner.status
    }

    pub fn assignee(&self) -> Option<DbId> {
        self.inner.assignee
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.inner.result.as_ref()
    }

    pub fn outcome(&self) -> Option<bool> {
        self.inner.outcome
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.inner.cancel_reason.as_deref()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.inner.history
    }

    pub fn snapshot(&self) -> &OrderSnapshot {
        &self.inner
    }

    /// Check whether `actor` may run `command` without changing anything.
    pub fn check(
        &self,
        actor: &Actor,
        command: &OrderCommand,
    ) -> Result<TransitionOutcome, CoreError> {
        if self.is_identical_retry(actor, command) {
            return Ok(TransitionOutcome::AlreadyApplied);
        }

        let status = self.inner.status;
        if status.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Order {} is already {status}",
                self.inner.order_id
            )));
        }

        match command {
            OrderCommand::Accept => {
                if let Some(assignee) = self.inner.assignee {
                    return Err(CoreError::Conflict(format!(
                        "Order {} is already claimed by {assignee}",
                        self.inner.order_id
                    )));
                }
                self.expect_status(OrderStatus::Ordered, command)?;
                if actor.role != self.inner.target_role {
                    return Err(CoreError::Forbidden(format!(
                        "Order {} targets {}, actor {} is {}",
                        self.inner.order_id, self.inner.target_role, actor.id, actor.role
                    )));
                }
            }
            OrderCommand::Start => {
                self.expect_status(OrderStatus::Accepted, command)?;
                self.expect_assignee(actor, "start work on")?;
            }
            OrderCommand::SubmitResult { result } => {
                self.expect_status(OrderStatus::InProgress, command)?;
                self.expect_assignee(actor, "submit a result for")?;
                validate_result(self.inner.target_role, result)?;
            }
            OrderCommand::Confirm { .. } => {
                self.expect_status(OrderStatus::ResultReady, command)?;
                if actor.id != self.inner.requester || Some(actor.id) == self.inner.assignee {
                    return Err(CoreError::Forbidden(format!(
                        "Only the requester of order {} may confirm its result",
                        self.inner.order_id
                    )));
                }
            }
            OrderCommand::Cancel { reason } => {
                let is_party =
                    actor.id == self.inner.requester || Some(actor.id) == self.inner.assignee;
                if !is_party {
                    return Err(CoreError::Forbidden(format!(
                        "Actor {} may not cancel order {}",
                        actor.id, self.inner.order_id
                    )));
                }
                normalize_cancel_reason(reason.clone())?;
            }
        }

        Ok(TransitionOutcome::Applied)
    }

    /// Run `command` as `actor` at time `at`.
    ///
    /// On error the order is left exactly as it was.
    pub fn apply(
        &mut self,
        actor: &Actor,
        command: OrderCommand,
        at: Timestamp,
    ) -> Result<TransitionOutcome, CoreError> {
        if self.check(actor, &command)? == TransitionOutcome::AlreadyApplied {
            return Ok(TransitionOutcome::AlreadyApplied);
        }

        if let Some(last) = self.inner.history.last() {
            if at < last.at {
                return Err(CoreError::Validation(format!(
                    "Transition time {at} precedes the last history entry ({})",
                    last.at
                )));
            }
        }

        let from = self.inner.status;
        let to = command.target();
        let mut reason = None;

        match command {
            OrderCommand::Accept => self.inner.assignee = Some(actor.id),
            OrderCommand::Start => {}
            OrderCommand::SubmitResult { result } => self.inner.result = Some(result),
            OrderCommand::Confirm { accepted } => self.inner.outcome = Some(accepted),
            OrderCommand::Cancel { reason: given } => {
                reason = normalize_cancel_reason(given)?;
                self.inner.cancel_reason = reason.clone();
            }
        }

        self.inner.status = to;
        self.inner.history.push(HistoryEntry {
            at,
            actor: actor.id,
            from,
            to,
            reason,
        });

        Ok(TransitionOutcome::Applied)
    }

    fn is_identical_retry(&self, actor: &Actor, command: &OrderCommand) -> bool {
        let target = command.target();
        self.inner.status == target
            && self
                .inner
                .history
                .last()
                .is_some_and(|last| last.to == target && last.actor == actor.id)
    }

    fn expect_status(&self, expected: OrderStatus, command: &OrderCommand) -> Result<(), CoreError> {
        if self.inner.status == expected {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "Cannot move order {} from {} to {}",
                self.inner.order_id,
                self.inner.status,
                command.target()
            )))
        }
    }

    fn expect_assignee(&self, actor: &Actor, action: &str) -> Result<(), CoreError> {
        if self.inner.assignee == Some(actor.id) {
            Ok(())
        } else {
            Err(CoreError::Forbidden(format!(
                "Only the claiming actor may {action} order {}",
                self.inner.order_id
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot validation
// ---------------------------------------------------------------------------

fn validate_history(snapshot: &OrderSnapshot) -> Result<(), CoreError> {
    let mut expected_from = OrderStatus::Ordered;
    let mut previous_at: Option<Timestamp> = None;

    for (index, entry) in snapshot.history.iter().enumerate() {
        if entry.from != expected_from {
            return Err(CoreError::Validation(format!(
                "Order {} history entry {index} starts at {} but previous status was {expected_from}",
                snapshot.order_id, entry.from
            )));
        }
        if !is_allowed_edge(entry.from, entry.to) {
            return Err(CoreError::Validation(format!(
                "Order {} history entry {index} has invalid transition {} -> {}",
                snapshot.order_id, entry.from, entry.to
            )));
        }
        if previous_at.is_some_and(|prev| entry.at < prev) {
            return Err(CoreError::Validation(format!(
                "Order {} history entry {index} is out of chronological order",
                snapshot.order_id
            )));
        }
        expected_from = entry.to;
        previous_at = Some(entry.at);
    }

    if expected_from != snapshot.status {
        return Err(CoreError::Validation(format!(
            "Order {} status {} does not match its history (ends at {expected_from})",
            snapshot.order_id, snapshot.status
        )));
    }

    Ok(())
}

fn is_allowed_edge(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Ordered, Accepted)
            | (Accepted, InProgress)
            | (InProgress, ResultReady)
            | (ResultReady, Confirmed)
    ) || (to == Cancelled && !from.is_terminal())
}

fn validate_fields(snapshot: &OrderSnapshot) -> Result<(), CoreError> {
    use OrderStatus::*;
    let claimed = matches!(
        snapshot.status,
        Accepted | InProgress | ResultReady | Confirmed
    );
    if claimed && snapshot.assignee.is_none() {
        return Err(CoreError::Validation(format!(
            "Order {} is {} but has no assignee",
            snapshot.order_id, snapshot.status
        )));
    }
    if matches!(snapshot.status, ResultReady | Confirmed) && snapshot.result.is_none() {
        return Err(CoreError::Validation(format!(
            "Order {} is {} but has no result",
            snapshot.order_id, snapshot.status
        )));
    }
    if snapshot.status == Confirmed && snapshot.outcome.is_none() {
        return Err(CoreError::Validation(format!(
            "Order {} is confirmed without an outcome",
            snapshot.order_id
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
