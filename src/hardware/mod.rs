//! Ranging source boundary
//!
//! The radio layer that discovers anchors and measures distances lives outside this
//! crate. It is modelled as a [`RangingSource`] that streams [`RangingEvent`]s over a
//! channel once subscribed.

pub mod source;
pub mod mock;
pub mod error;

pub use source::{EventReceiver, EventSender, RangingSource};
pub use mock::{MockRangingHandle, MockRangingSource};
pub use error::{SourceError, SourceResult};

use crate::core::{DisconnectEvent, RangeSample};

/// Event delivered by an active subscription
#[derive(Debug, Clone, PartialEq)]
pub enum RangingEvent {
    /// New distance (and angle) report for an anchor
    Range(RangeSample),
    /// Anchor dropped by the radio layer
    Disconnected(DisconnectEvent),
    /// Stream-level failure; the subscription may need to be reopened
    Fault(SourceError),
}
