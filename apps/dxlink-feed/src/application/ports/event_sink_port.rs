//! Feed Event Sink Port
//!
//! A connection task owns its sink and calls it for every feed event, in
//! arrival order, from the task itself. Sinks must not block.

use tokio::sync::mpsc;

use crate::domain::streaming::FeedEvent;

/// Receiver of events produced by a feed connection.
pub trait FeedEventSink: Send + 'static {
    /// Handle one event.
    fn handle(&mut self, event: FeedEvent);
}

impl FeedEventSink for mpsc::UnboundedSender<FeedEvent> {
    fn handle(&mut self, event: FeedEvent) {
        // Receiver gone means the owner stopped listening.
        let _ = self.send(event);
    }
}
