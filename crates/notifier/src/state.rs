//! Delivery state machine.
//!
//! ```text
//! PENDING ──disable──▶ DISABLED
//!    │────deliver───▶ DELIVERED
//!    └────reject────▶ REJECTED
//! ```
//!
//! All three targets are terminal. The aggregate of a multi-recipient dispatch
//! is one state per notification; per-recipient failures only show up in the
//! notification's log.

use chrono::{DateTime, Utc};
use thiserror::Error;

use herald_common::types::{DeliveryState, DispatchOutcome, Notification};

/// A requested state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The channel is administratively disabled; nothing was sent.
    Disable { reason: String },
    /// At least one recipient acknowledged.
    Deliver { at: DateTime<Utc> },
    /// Nothing was acknowledged, or the attempt failed.
    Reject { reason: String },
}

impl Transition {
    pub fn target(&self) -> DeliveryState {
        match self {
            Transition::Disable { .. } => DeliveryState::Disabled,
            Transition::Deliver { .. } => DeliveryState::Delivered,
            Transition::Reject { .. } => DeliveryState::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot move from terminal state {from} to {to}")]
pub struct TransitionError {
    pub from: DeliveryState,
    pub to: DeliveryState,
}

/// Pure transition logic for notification delivery.
pub struct DeliveryStateMachine;

impl DeliveryStateMachine {
    /// The state reached by applying `transition` to `current`.
    pub fn next(
        current: DeliveryState,
        transition: &Transition,
    ) -> Result<DeliveryState, TransitionError> {
        let to = transition.target();
        if current.is_terminal() {
            return Err(TransitionError { from: current, to });
        }
        Ok(to)
    }

    /// Apply `transition` to `notification`, recording its reason or timestamp.
    ///
    /// Reasons are appended to the log before the state changes.
    pub fn apply(
        notification: &mut Notification,
        transition: Transition,
    ) -> Result<DeliveryState, TransitionError> {
        let next = Self::next(notification.state, &transition)?;

        match transition {
            Transition::Disable { reason } | Transition::Reject { reason } => {
                notification.note(reason);
            }
            Transition::Deliver { at } => {
                notification.sent_at = Some(at);
            }
        }
        notification.state = next;

        tracing::info!(
            notification_id = %notification.id,
            state = %next,
            "Notification state changed"
        );
        Ok(next)
    }

    /// Settle a finished attempt sequence into one transition.
    ///
    /// Any transport error rejects the whole notification. Otherwise one
    /// acknowledged send anywhere delivers it, stamped with `now`.
    pub fn settle(outcomes: &[DispatchOutcome], now: DateTime<Utc>) -> Transition {
        let errors: Vec<String> = outcomes
            .iter()
            .filter_map(|o| o.error.as_ref().map(|e| format!("{}: {}", o.address, e)))
            .collect();

        if !errors.is_empty() {
            return Transition::Reject {
                reason: format!("send failed ({})", errors.join("; ")),
            };
        }

        if outcomes.iter().any(|o| o.delivered) {
            return Transition::Deliver { at: now };
        }

        if outcomes.is_empty() {
            Transition::Reject {
                reason: "no recipients were contacted".to_string(),
            }
        } else {
            Transition::Reject {
                reason: format!(
                    "no acknowledgment from provider for {} attempt(s)",
                    outcomes.len()
                ),
            }
        }
    }
}
