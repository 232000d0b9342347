//! Notification delivery: recipient resolution, the delivery state machine,
//! channel transports and the dispatcher that ties them together.

pub mod dispatcher;
pub mod recipients;
pub mod state;
pub mod transport;

pub use dispatcher::{ChannelDispatcher, DispatchReport};
pub use recipients::{GroupMembership, MembershipError, RecipientResolver};
pub use state::{DeliveryStateMachine, Transition, TransitionError};
pub use transport::{ChannelTransport, DeliveryReceipt, TransportError, TwilioWhatsAppTransport};
