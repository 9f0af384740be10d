// ECG Telemetry — Connection State Machine
//
//   Idle ──start_advertising──▶ Advertising ──on_connect──▶ Connected
//                                    ▲                           │
//                                    └──────on_disconnect────────┘
//                                          (re-advertises)
//
// The subscription flag is written by the peer's CCCD write and is tracked
// next to, not inside, the connection state. It belongs to one connection
// and is cleared when that connection ends.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::events::{ConnectionId, ConnectionState, LinkEvent};

/// (Re)starts advertising on the wireless stack.
pub trait Advertiser: Send {
    fn start_advertising(&mut self) -> anyhow::Result<()>;
}

/// Callbacks the wireless collaborator invokes from its own context.
pub trait ConnectionCallbacks: Send + Sync {
    fn on_connect(&self, conn: ConnectionId);
    fn on_disconnect(&self, conn: ConnectionId, reason: u8);
    fn on_connect_failed(&self, err: u8);
    fn on_subscription_changed(&self, enabled: bool);
}

// ---------------------------------------------------------------------------
// Shared link status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub state: ConnectionState,
    pub conn: Option<ConnectionId>,
    pub subscribed: bool,
    pub advertise_count: u32,
}

impl LinkSnapshot {
    pub fn can_notify(&self) -> bool {
        self.state == ConnectionState::Connected && self.subscribed
    }
}

/// Cloneable handle to the link status. Written only by the state machine,
/// read by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct LinkStatus(Arc<Mutex<LinkSnapshot>>);

impl LinkStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LinkSnapshot> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        *self.lock()
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.lock().state == ConnectionState::Connected
    }

    pub fn is_subscribed(&self) -> bool {
        self.lock().subscribed
    }

    pub fn can_notify(&self) -> bool {
        self.lock().can_notify()
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.lock().conn
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub struct ConnectionStateMachine<A> {
    status: LinkStatus,
    advertiser: Mutex<A>,
}

impl<A: Advertiser> ConnectionStateMachine<A> {
    pub fn new(advertiser: A) -> Self {
        Self {
            status: LinkStatus::new(),
            advertiser: Mutex::new(advertiser),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status.clone()
    }

    /// Enter (or re-enter) Advertising and ask the stack to advertise. The
    /// state changes even when the stack call fails so no dispatch can slip
    /// through; the error is returned for logging.
    pub fn start_advertising(&self) -> anyhow::Result<()> {
        {
            let mut link = self.status.lock();
            link.state = ConnectionState::Advertising;
            link.conn = None;
            link.advertise_count = link.advertise_count.wrapping_add(1);
        }
        log::info!("Advertising");
        self.advertiser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .start_advertising()
    }

    /// Feed an event from the wireless stack through the matching callback.
    pub fn handle(&self, event: LinkEvent) {
        match event {
            LinkEvent::Connected(conn) => self.on_connect(conn),
            LinkEvent::ConnectFailed(err) => self.on_connect_failed(err),
            LinkEvent::Disconnected { conn, reason } => self.on_disconnect(conn, reason),
            LinkEvent::Subscription(enabled) => self.on_subscription_changed(enabled),
        }
    }
}

impl<A: Advertiser> ConnectionCallbacks for ConnectionStateMachine<A> {
    fn on_connect(&self, conn: ConnectionId) {
        let mut link = self.status.lock();
        match link.state {
            ConnectionState::Advertising => {
                link.state = ConnectionState::Connected;
                link.conn = Some(conn);
                log::info!("Device connected (conn {})", conn);
            }
            ConnectionState::Idle => {
                log::warn!("Connect (conn {}) before advertising started — ignored", conn);
            }
            ConnectionState::Connected => {
                log::warn!(
                    "Second connection (conn {}) while conn {:?} is active — ignored",
                    conn,
                    link.conn
                );
            }
        }
    }

    fn on_disconnect(&self, conn: ConnectionId, reason: u8) {
        {
            let mut link = self.status.lock();
            if link.state != ConnectionState::Connected || link.conn != Some(conn) {
                log::warn!(
                    "Disconnect for conn {} in state {:?} — ignored",
                    conn,
                    link.state
                );
                return;
            }
            // Peers are unbonded: their CCCD ends with the link.
            link.subscribed = false;
        }

        log::info!("Device disconnected (conn {}, reason 0x{:02x})", conn, reason);
        if let Err(e) = self.start_advertising() {
            log::error!("Re-advertising failed: {:?}", e);
        }
    }

    fn on_connect_failed(&self, err: u8) {
        log::error!("Connection failed (err 0x{:02x})", err);
    }

    fn on_subscription_changed(&self, enabled: bool) {
        self.status.lock().subscribed = enabled;
        log::info!("ECG notifications {}", if enabled { "enabled" } else { "disabled" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Clone, Default)]
    struct CountingAdvertiser {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    impl Advertiser for CountingAdvertiser {
        fn start_advertising(&mut self) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("controller busy");
            }
            Ok(())
        }
    }

    fn machine() -> (ConnectionStateMachine<CountingAdvertiser>, Arc<AtomicU32>) {
        let adv = CountingAdvertiser::default();
        let calls = adv.calls.clone();
        (ConnectionStateMachine::new(adv), calls)
    }

    #[test]
    fn starts_idle() {
        let (m, calls) = machine();
        assert_eq!(m.status().state(), ConnectionState::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn full_cycle() {
        let (m, calls) = machine();
        let status = m.status();

        m.start_advertising().unwrap();
        assert_eq!(status.state(), ConnectionState::Advertising);

        m.on_connect(7);
        assert_eq!(status.state(), ConnectionState::Connected);
        assert_eq!(status.connection(), Some(7));

        m.on_disconnect(7, 0x13);
        assert_eq!(status.state(), ConnectionState::Advertising);
        assert_eq!(status.connection(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(status.snapshot().advertise_count, 2);
    }

    #[test]
    fn connect_before_advertising_is_ignored() {
        let (m, _) = machine();
        m.on_connect(1);
        assert_eq!(m.status().state(), ConnectionState::Idle);
    }

    #[test]
    fn stale_disconnect_is_ignored() {
        let (m, calls) = machine();
        m.start_advertising().unwrap();
        m.on_disconnect(3, 0x08);
        assert_eq!(m.status().state(), ConnectionState::Advertising);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        m.on_connect(4);
        m.on_disconnect(5, 0x08);
        assert_eq!(m.status().state(), ConnectionState::Connected);
    }

    #[test]
    fn subscription_is_orthogonal() {
        let (m, _) = machine();
        let status = m.status();

        // Peer may subscribe before the connection is reported.
        m.on_subscription_changed(true);
        assert!(status.is_subscribed());
        assert!(!status.can_notify());

        m.start_advertising().unwrap();
        m.on_connect(1);
        assert!(status.can_notify());

        m.on_subscription_changed(false);
        assert!(!status.can_notify());
        assert_eq!(status.state(), ConnectionState::Connected);
    }

    #[test]
    fn advertise_failure_still_blocks_dispatch() {
        let adv = CountingAdvertiser {
            fail: true,
            ..Default::default()
        };
        let m = ConnectionStateMachine::new(adv);
        assert!(m.start_advertising().is_err());
        assert_eq!(m.status().state(), ConnectionState::Advertising);
        m.on_connect(2);
        m.on_disconnect(2, 0x16);
        assert_eq!(m.status().state(), ConnectionState::Advertising);
    }

    #[test]
    fn events_route_to_callbacks() {
        let (m, _) = machine();
        m.start_advertising().unwrap();
        m.handle(LinkEvent::ConnectFailed(0x3e));
        assert_eq!(m.status().state(), ConnectionState::Advertising);
        m.handle(LinkEvent::Connected(9));
        m.handle(LinkEvent::Subscription(true));
        assert!(m.status().can_notify());
        m.handle(LinkEvent::Disconnected { conn: 9, reason: 0x13 });
        assert!(!m.status().can_notify());
    }

    #[test]
    fn new_peer_starts_unsubscribed() {
        let (m, _) = machine();
        let status = m.status();
        m.start_advertising().unwrap();
        m.on_connect(1);
        m.on_subscription_changed(true);
        assert!(status.can_notify());

        m.on_disconnect(1, 0x13);
        assert!(!status.is_subscribed());

        m.on_connect(2);
        assert!(!status.can_notify());
        m.on_subscription_changed(true);
        assert!(status.can_notify());
    }

    #[test]
    fn ignored_disconnect_keeps_subscription() {
        let (m, _) = machine();
        m.start_advertising().unwrap();
        m.on_connect(1);
        m.on_subscription_changed(true);
        m.on_disconnect(5, 0x08);
        assert!(m.status().can_notify());
    }
}
