//! Network link state.
//!
//! The board's network driver reports link events to a [`LinkState`], which
//! the application shares with whatever needs to know whether the wire is up
//! and which address the device got.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Start,
    Connected,
    GotIp(IpAddr),
    Disconnected,
    Stop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Link {
    up: bool,
    ip: Option<IpAddr>,
}

/// Tracks whether the network link is up and has an address.
#[derive(Debug, Clone)]
pub struct LinkState {
    tx: Arc<watch::Sender<Link>>,
}

impl LinkState {
    pub fn new() -> Self {
        Self { tx: Arc::new(watch::Sender::new(Link::default())) }
    }

    pub fn on_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Start => info!("link started"),
            LinkEvent::Connected => info!("link connected"),
            LinkEvent::GotIp(ip) => {
                info!(%ip, "link got address");
                self.tx.send_modify(|link| *link = Link { up: true, ip: Some(ip) });
            }
            LinkEvent::Disconnected => {
                warn!("link disconnected");
                self.tx.send_modify(|link| *link = Link::default());
            }
            LinkEvent::Stop => {
                info!("link stopped");
                self.tx.send_modify(|link| *link = Link::default());
            }
        }
    }

    /// True once an address was assigned and until the link goes down.
    pub fn is_connected(&self) -> bool {
        self.tx.borrow().up
    }

    pub fn local_ip(&self) -> Option<IpAddr> {
        self.tx.borrow().ip
    }

    /// Waits until the link is connected, returning its address.
    pub async fn wait_connected(&self) -> Option<IpAddr> {
        let mut rx = self.tx.subscribe();
        rx.wait_for(|link| link.ip.is_some()).await.ok().and_then(|link| link.ip)
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn events_drive_the_state() {
        let link = LinkState::new();
        assert!(!link.is_connected());

        link.on_event(LinkEvent::Start);
        link.on_event(LinkEvent::Connected);
        assert!(!link.is_connected(), "no address yet");

        let ip: IpAddr = "192.168.2.232".parse().unwrap();
        link.on_event(LinkEvent::GotIp(ip));
        assert!(link.is_connected());
        assert_eq!(link.local_ip(), Some(ip));

        link.on_event(LinkEvent::Disconnected);
        assert!(!link.is_connected());
        assert_eq!(link.local_ip(), None);
    }

    #[tokio::test]
    async fn wait_connected_resolves_on_address() {
        let link = LinkState::new();
        let waiter = link.clone();
        let waiting = tokio::spawn(async move { waiter.wait_connected().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiting.is_finished());

        let ip: IpAddr = "10.0.0.7".parse().unwrap();
        link.on_event(LinkEvent::GotIp(ip));
        assert_eq!(waiting.await.unwrap(), Some(ip));
    }
}
