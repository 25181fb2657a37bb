//! Ranging source interface

use crate::core::RangingPolicy;
use crate::hardware::{RangingEvent, SourceResult};
use tokio::sync::mpsc;

/// Receiving end of a subscription's event stream
pub type EventReceiver = mpsc::UnboundedReceiver<RangingEvent>;

/// Sending end handed to whatever drives the radio
pub type EventSender = mpsc::UnboundedSender<RangingEvent>;

/// Abstraction over the radio layer that discovers anchors and reports ranges
///
/// Implementations deliver events asynchronously over the returned channel, usually
/// from a background context. At most one subscription is live at a time.
pub trait RangingSource: Send {
    /// Open a subscription with the given connection-selection policy
    fn subscribe(&mut self, policy: &RangingPolicy) -> SourceResult<EventReceiver>;

    /// Release the current subscription and its radio resources
    fn unsubscribe(&mut self) -> SourceResult<()>;

    /// Whether a subscription is currently open
    fn is_subscribed(&self) -> bool;
}
