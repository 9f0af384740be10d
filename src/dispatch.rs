// ECG Telemetry — Telemetry Dispatcher
//
// Best-effort, at-most-once delivery: a payload goes out only while a peer is
// connected and subscribed, otherwise it is dropped on the floor. A late ECG
// sample is worthless, so nothing is queued or retried.

use crate::events::Reading;
use crate::link::LinkStatus;
use crate::wire::WireFormat;

/// Pushes one characteristic value to the connected peer.
pub trait Notifier: Send {
    fn notify(&mut self, payload: &[u8]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// No connected, subscribed peer; payload discarded.
    Discarded,
    /// The stack rejected the notify; payload discarded.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub sent: u32,
    pub discarded: u32,
    pub failed: u32,
}

pub struct TelemetryDispatcher<N> {
    notifier: N,
    link: LinkStatus,
    format: WireFormat,
    scratch: Vec<u8>,
    stats: DispatchStats,
}

impl<N: Notifier> TelemetryDispatcher<N> {
    pub fn new(notifier: N, link: LinkStatus, format: WireFormat, capacity: usize) -> Self {
        Self {
            notifier,
            link,
            format,
            scratch: Vec::with_capacity(format.max_payload_len(capacity)),
            stats: DispatchStats::default(),
        }
    }

    /// Serialize `readings` and notify, if a peer is listening.
    pub fn flush(&mut self, readings: &[Reading]) -> DispatchOutcome {
        if readings.is_empty() {
            return DispatchOutcome::Discarded;
        }

        if !self.link.can_notify() {
            self.stats.discarded = self.stats.discarded.wrapping_add(1);
            return DispatchOutcome::Discarded;
        }

        self.format.encode(readings, &mut self.scratch);
        match self.notifier.notify(&self.scratch) {
            Ok(()) => {
                self.stats.sent = self.stats.sent.wrapping_add(1);
                DispatchOutcome::Sent
            }
            Err(e) => {
                self.stats.failed = self.stats.failed.wrapping_add(1);
                log::warn!("Notify of {} bytes failed: {:?}", self.scratch.len(), e);
                DispatchOutcome::Failed
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{Advertiser, ConnectionCallbacks, ConnectionStateMachine};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<Vec<u8>>>>);

    impl Notifier for Capture {
        fn notify(&mut self, payload: &[u8]) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
    }

    struct Rejecting;

    impl Notifier for Rejecting {
        fn notify(&mut self, _payload: &[u8]) -> anyhow::Result<()> {
            anyhow::bail!("ESP_ERR_INVALID_STATE")
        }
    }

    struct NoopAdvertiser;

    impl Advertiser for NoopAdvertiser {
        fn start_advertising(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn connected_and_subscribed() -> ConnectionStateMachine<NoopAdvertiser> {
        let m = ConnectionStateMachine::new(NoopAdvertiser);
        m.start_advertising().unwrap();
        m.on_connect(1);
        m.on_subscription_changed(true);
        m
    }

    #[test]
    fn sends_when_connected_and_subscribed() {
        let m = connected_and_subscribed();
        let capture = Capture::default();
        let mut d = TelemetryDispatcher::new(capture.clone(), m.status(), WireFormat::BinaryBatch, 2);

        let outcome = d.flush(&[Reading::Value(1), Reading::Value(2)]);
        assert_eq!(outcome, DispatchOutcome::Sent);
        assert_eq!(*capture.0.lock().unwrap(), vec![vec![1, 0, 2, 0]]);
        assert_eq!(d.stats().sent, 1);
    }

    #[test]
    fn no_op_unless_connected_and_subscribed() {
        let m = ConnectionStateMachine::new(NoopAdvertiser);
        let capture = Capture::default();
        let mut d = TelemetryDispatcher::new(capture.clone(), m.status(), WireFormat::Text, 1);
        let batch = [Reading::Value(512)];

        // Idle, stale subscription.
        m.on_subscription_changed(true);
        assert_eq!(d.flush(&batch), DispatchOutcome::Discarded);

        // Advertising.
        m.start_advertising().unwrap();
        assert_eq!(d.flush(&batch), DispatchOutcome::Discarded);

        // Connected but unsubscribed.
        m.on_subscription_changed(false);
        m.on_connect(3);
        assert_eq!(d.flush(&batch), DispatchOutcome::Discarded);

        assert!(capture.0.lock().unwrap().is_empty());
        assert_eq!(d.stats().discarded, 3);
    }

    #[test]
    fn stack_errors_are_counted_not_retried() {
        let m = connected_and_subscribed();
        let mut d = TelemetryDispatcher::new(Rejecting, m.status(), WireFormat::Text, 1);
        assert_eq!(d.flush(&[Reading::LeadsOff]), DispatchOutcome::Failed);
        assert_eq!(d.flush(&[Reading::LeadsOff]), DispatchOutcome::Failed);
        assert_eq!(
            d.stats(),
            DispatchStats {
                sent: 0,
                discarded: 0,
                failed: 2
            }
        );
    }

    #[test]
    fn disconnect_blocks_until_reconnected() {
        let m = connected_and_subscribed();
        let capture = Capture::default();
        let mut d = TelemetryDispatcher::new(capture.clone(), m.status(), WireFormat::Text, 1);

        m.on_disconnect(1, 0x13);
        assert_eq!(d.flush(&[Reading::Value(10)]), DispatchOutcome::Discarded);

        m.on_connect(2);
        assert_eq!(d.flush(&[Reading::Value(11)]), DispatchOutcome::Sent);
        assert_eq!(*capture.0.lock().unwrap(), vec![b"11".to_vec()]);
    }
}
