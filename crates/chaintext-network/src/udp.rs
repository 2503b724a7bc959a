//! UDP datagram [`SignalBus`] for nodes in separate processes.
//!
//! Every signal is JSON-encoded into one datagram and sent to each
//! configured target. Receivers filter on the `to` field themselves,
//! so a shared broadcast address works as well as a peer list.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use chaintext_types::{ChaintextError, PeerId, Result};

use crate::protocol::Signal;
use crate::signal::SignalBus;

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM: usize = 65_507;

/// Pause after a failed receive before trying again.
const RECV_RETRY_DELAY: Duration = Duration::from_millis(100);

/// [`SignalBus`] over a single UDP socket.
#[derive(Clone, Debug)]
pub struct UdpSignalBus {
    socket: Arc<UdpSocket>,
    targets: Arc<Vec<SocketAddr>>,
}

impl UdpSignalBus {
    /// Binds the signaling socket.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::NetworkError`] if the socket cannot be
    /// bound or configured.
    pub async fn bind(bind: SocketAddr, targets: Vec<SocketAddr>) -> Result<Self> {
        let socket = UdpSocket::bind(bind).await.map_err(|e| ChaintextError::NetworkError {
            reason: format!("failed to bind UDP signaling socket on {bind}: {e}"),
        })?;
        socket.set_broadcast(true).map_err(|e| ChaintextError::NetworkError {
            reason: format!("failed to enable UDP broadcast: {e}"),
        })?;

        tracing::info!(addr = %bind, targets = targets.len(), "UDP signaling bus bound");
        Ok(Self {
            socket: Arc::new(socket),
            targets: Arc::new(targets),
        })
    }

    /// Local address of the socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(|e| ChaintextError::NetworkError {
            reason: format!("failed to read UDP local address: {e}"),
        })
    }
}

impl SignalBus for UdpSignalBus {
    fn publish(&self, signal: Signal) -> Result<()> {
        let bytes = signal.to_bytes().map_err(|e| ChaintextError::SignalDeliveryFailure {
            reason: e.to_string(),
        })?;
        if bytes.len() > MAX_DATAGRAM {
            return Err(ChaintextError::SignalDeliveryFailure {
                reason: format!("signal of {} bytes exceeds datagram limit", bytes.len()),
            });
        }

        let mut sent = 0usize;
        let mut last_error = None;
        for target in self.targets.iter() {
            match self.socket.try_send_to(&bytes, *target) {
                Ok(_) => sent += 1,
                Err(e) => {
                    tracing::trace!(%target, error = %e, "UDP signal send failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if sent == 0 => Err(ChaintextError::SignalDeliveryFailure {
                reason: format!("no UDP target accepted the signal: {e}"),
            }),
            _ => Ok(()),
        }
    }

    fn subscribe(&self, local: PeerId) -> mpsc::UnboundedReceiver<Signal> {
        let (tx, rx) = mpsc::unbounded_channel();
        let socket = Arc::clone(&self.socket);

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (len, from_addr) = match socket.recv_from(&mut buf).await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::debug!(error = %e, "UDP receive failed");
                        tokio::time::sleep(RECV_RETRY_DELAY).await;
                        continue;
                    }
                };

                let signal = match Signal::from_bytes(&buf[..len]) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::debug!(%from_addr, error = %e, "dropping undecodable datagram");
                        continue;
                    }
                };

                if !signal.is_for(&local) {
                    continue;
                }
                if tx.send(signal).is_err() {
                    tracing::debug!(%local, "signal subscriber gone, stopping UDP receive loop");
                    break;
                }
            }
        });

        rx
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chaintext_types::{RoomId, Timestamp};
    use std::time::Duration;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn datagram_roundtrip_between_two_sockets() -> TestResult {
        let loopback: SocketAddr = "127.0.0.1:0".parse()?;
        let bus_b = UdpSignalBus::bind(loopback, Vec::new()).await?;
        let bus_a = UdpSignalBus::bind(loopback, vec![bus_b.local_addr()?]).await?;

        let a = PeerId::new("aaa")?;
        let b = PeerId::new("bbb")?;
        let mut rx_b = bus_b.subscribe(b);

        bus_a.publish(Signal::announce(a.clone(), RoomId::default(), Timestamp::now())?)?;

        let received = tokio::time::timeout(Duration::from_secs(2), rx_b.recv()).await?;
        let signal = received.ok_or("bus closed")?;
        assert_eq!(signal.from, a);
        Ok(())
    }

    #[tokio::test]
    async fn no_targets_is_not_an_error() -> TestResult {
        let bus = UdpSignalBus::bind("127.0.0.1:0".parse()?, Vec::new()).await?;
        bus.publish(Signal::announce(PeerId::new("aaa")?, RoomId::default(), Timestamp::now())?)?;
        Ok(())
    }
}
