//! Engine event notifications
//!
//! The engine reports state transitions on an unbounded channel so observers
//! never stall the completion path. Backpressure events are edge-triggered:
//! one is emitted when the transmit path stops accepting frames and one when
//! it resumes, never for every refused send.

use dmux_protocol::ChannelId;

/// Notifications emitted by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The remote powered the link on and receive is armed
    LinkUp,
    /// The remote powered the link off; in-flight work was cancelled
    LinkDown,
    /// The remote announced a channel
    ChannelOpened { channel: ChannelId },
    /// The remote withdrew a channel
    ChannelClosed { channel: ChannelId },
    /// The transmit path stopped (`stopped: true`) or resumed accepting
    /// frames
    Backpressure { stopped: bool },
    /// An inbound frame was discarded
    FrameDropped { reason: String },
    /// A recoverable engine error outside a caller's call stack
    Error { source: &'static str, message: String },
}

impl EngineEvent {
    /// The channel this event concerns, if any.
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            EngineEvent::ChannelOpened { channel } | EngineEvent::ChannelClosed { channel } => {
                Some(*channel)
            }
            _ => None,
        }
    }

    /// Whether this event marks a link power transition.
    pub fn is_link_event(&self) -> bool {
        matches!(self, EngineEvent::LinkUp | EngineEvent::LinkDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_accessor_covers_channel_events() {
        let opened = EngineEvent::ChannelOpened {
            channel: ChannelId(4),
        };
        assert_eq!(opened.channel(), Some(ChannelId(4)));
        assert_eq!(EngineEvent::LinkUp.channel(), None);
    }

    #[test]
    fn link_events_identified() {
        assert!(EngineEvent::LinkDown.is_link_event());
        assert!(!EngineEvent::Backpressure { stopped: true }.is_link_event());
    }
}
