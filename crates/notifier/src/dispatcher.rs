//! Channel dispatcher: one end-to-end delivery attempt for a notification.
//!
//! 1. Disabled channel → `DISABLED`, no recipient is contacted
//! 2. Resolve group recipients; with none, send once to the direct address
//! 3. Send to each address in resolver order, collecting per-recipient outcomes
//! 4. Settle the outcomes into `DELIVERED` or `REJECTED`
//!
//! `dispatch` never returns an error: transport and lookup failures are
//! written to the notification's log and end in `REJECTED`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use herald_common::config::{ChannelSettings, ConfigSource};
use herald_common::types::{DeliveryState, DispatchOutcome, Notification};

use crate::recipients::RecipientResolver;
use crate::state::{DeliveryStateMachine, Transition};
use crate::transport::ChannelTransport;

/// Result of one `dispatch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// State of the notification after the call.
    pub state: DeliveryState,
    /// Per-recipient attempts, in send order.
    pub outcomes: Vec<DispatchOutcome>,
}

/// Delivers notifications over one channel.
pub struct ChannelDispatcher {
    settings: ChannelSettings,
    resolver: RecipientResolver,
    transport: Arc<dyn ChannelTransport>,
}

impl ChannelDispatcher {
    /// Build a dispatcher, reading channel configuration from `config` once.
    pub fn new(
        config: Option<&dyn ConfigSource>,
        resolver: RecipientResolver,
        transport: Arc<dyn ChannelTransport>,
    ) -> Self {
        Self {
            settings: ChannelSettings::snapshot(config),
            resolver,
            transport,
        }
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    /// Perform one delivery attempt, updating `notification` in place.
    ///
    /// Notifications that already reached a terminal state are left alone.
    pub async fn dispatch(&self, notification: &mut Notification) -> DispatchReport {
        if notification.state.is_terminal() {
            tracing::warn!(
                notification_id = %notification.id,
                state = %notification.state,
                "Notification already settled, not dispatching"
            );
            return DispatchReport {
                state: notification.state,
                outcomes: Vec::new(),
            };
        }

        if !self.settings.enabled {
            let reason = format!("{} channel is disabled", self.transport.channel());
            self.settle(notification, Transition::Disable { reason });
            return DispatchReport {
                state: notification.state,
                outcomes: Vec::new(),
            };
        }

        let addresses = match self.recipients(notification).await {
            Ok(addresses) => addresses,
            Err(reason) => {
                self.settle(notification, Transition::Reject { reason });
                return DispatchReport {
                    state: notification.state,
                    outcomes: Vec::new(),
                };
            }
        };

        let sender = self.settings.credentials.sender_address.as_str();
        let mut outcomes = Vec::with_capacity(addresses.len());

        for address in addresses {
            let result = self.transport.send(&notification.text, sender, &address).await;
            let outcome = match result {
                Ok(receipt) if receipt.is_acknowledged() => {
                    let message_id = receipt.message_id.unwrap_or_default();
                    tracing::info!(
                        notification_id = %notification.id,
                        recipient = %address,
                        message_id = %message_id,
                        "Message acknowledged"
                    );
                    notification.note(format!("sent to {address} (message {message_id})"));
                    DispatchOutcome {
                        address,
                        message_id: Some(message_id),
                        delivered: true,
                        error: None,
                    }
                }
                Ok(receipt) => {
                    tracing::warn!(
                        notification_id = %notification.id,
                        recipient = %address,
                        status = ?receipt.status,
                        "Provider returned no acknowledgment"
                    );
                    notification.note(format!("no acknowledgment for {address}"));
                    DispatchOutcome {
                        address,
                        message_id: None,
                        delivered: false,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        notification_id = %notification.id,
                        recipient = %address,
                        error = %e,
                        "Send failed"
                    );
                    notification.note(format!("send to {address} failed: {e}"));
                    DispatchOutcome {
                        address,
                        message_id: None,
                        delivered: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let transition = DeliveryStateMachine::settle(&outcomes, Utc::now());
        self.settle(notification, transition);

        DispatchReport {
            state: notification.state,
            outcomes,
        }
    }

    /// `dispatch` bounded by `limit`; expiry rejects the notification.
    pub async fn dispatch_with_timeout(
        &self,
        notification: &mut Notification,
        limit: Duration,
    ) -> DispatchReport {
        let result = tokio::time::timeout(limit, self.dispatch(notification)).await;
        match result {
            Ok(report) => report,
            Err(_) => {
                let reason = format!("dispatch timed out after {}s", limit.as_secs_f64());
                self.settle(notification, Transition::Reject { reason });
                DispatchReport {
                    state: notification.state,
                    outcomes: Vec::new(),
                }
            }
        }
    }

    /// Group recipients, or the single direct address when there are none.
    async fn recipients(&self, notification: &Notification) -> Result<Vec<String>, String> {
        let target = &notification.target;

        let addresses = self
            .resolver
            .resolve(target)
            .await
            .map_err(|e| format!("recipient resolution failed: {e}"))?;
        if !addresses.is_empty() {
            return Ok(addresses);
        }

        if !target.groups.is_empty() {
            tracing::debug!(
                notification_id = %notification.id,
                "Recipient groups have no addressable members, using direct address"
            );
        }

        match self.resolver.fallback_address(target).await {
            Ok(Some(address)) => Ok(vec![address]),
            Ok(None) => Err(format!("no {} address to send to", self.resolver.field())),
            Err(e) => Err(format!("recipient resolution failed: {e}")),
        }
    }

    fn settle(&self, notification: &mut Notification, transition: Transition) {
        if let Err(e) = DeliveryStateMachine::apply(notification, transition) {
            tracing::error!(
                notification_id = %notification.id,
                error = %e,
                "Dropped state transition"
            );
        }
    }
}
