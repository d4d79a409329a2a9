//! Notification delivery.

use carousel_protocol::Notification;
use log::debug;
use tokio::sync::mpsc;

/// Receives notifications from the carousel receiver.
///
/// `notify` is called from the processing thread, in the order the
/// triggering sections were received.
pub trait NotificationSink: Send {
    fn notify(&mut self, notification: Notification);
}

impl NotificationSink for mpsc::UnboundedSender<Notification> {
    fn notify(&mut self, notification: Notification) {
        if self.send(notification).is_err() {
            debug!("Notification receiver dropped, discarding notification");
        }
    }
}

impl NotificationSink for Vec<Notification> {
    fn notify(&mut self, notification: Notification) {
        self.push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carousel_protocol::{ModuleListUpdatedMessage, PmtMessage};

    #[tokio::test]
    async fn test_channel_sink_preserves_order() {
        let (mut tx, mut rx) = mpsc::unbounded_channel();
        tx.notify(Notification::Pmt(PmtMessage { components: vec![] }));
        tx.notify(Notification::ModuleListUpdated(ModuleListUpdatedMessage {
            component_id: 0x40,
            modules: vec![],
            data_event_id: 0,
            return_to_entry_flag: None,
        }));
        drop(tx);

        assert!(matches!(rx.recv().await, Some(Notification::Pmt(_))));
        assert!(matches!(rx.recv().await, Some(Notification::ModuleListUpdated(_))));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (mut tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        tx.notify(Notification::Pmt(PmtMessage { components: vec![] }));
    }
}
