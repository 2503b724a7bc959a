//! TCP negotiator.
//!
//! Negotiation rides on the signaling exchange:
//!
//! ```text
//! initiator                              responder
//!   offer  { "token": <random> }  ───▶   remembers token
//!          ◀───  answer { "addr": <first advertised addr> }
//!          ◀───  ice-candidate <other advertised addrs>
//!   dial addr (then candidates, in order)
//!   send token as first frame     ───▶   matches token → channel open
//! ```
//!
//! Frames are `u32` big-endian length-prefixed. Each open channel owns
//! a writer task draining the bounded outbound queue and a reader task
//! posting `Frame` events.

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chaintext_types::{ChaintextError, PeerId, Result};

use crate::config::NetworkConfig;
use crate::events::TransportEvent;
use crate::transport::{ChannelHandle, Negotiator, SessionId};

/// Pause after a failed `accept` before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Descriptions
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct TcpOffer {
    token: String,
}

#[derive(Serialize, Deserialize)]
struct TcpAnswer {
    addr: SocketAddr,
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| ChaintextError::ProtocolError {
        reason: format!("failed to encode TCP session description: {e}"),
    })
}

fn decode<T: for<'de> Deserialize<'de>>(sdp: &str) -> Result<T> {
    serde_json::from_str(sdp).map_err(|e| ChaintextError::ProtocolError {
        reason: format!("malformed TCP session description: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Writes one length-prefixed frame.
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    data: &[u8],
) -> std::io::Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame too large"))?;
    w.write_all(&len.to_be_bytes()).await?;
    w.write_all(data).await?;
    w.flush().await
}

/// Reads one length-prefixed frame. `Ok(None)` on clean EOF.
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
    max_len: usize,
) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit of {max_len}"),
        ));
    }

    let mut data = vec![0u8; len];
    r.read_exact(&mut data).await?;
    Ok(Some(data))
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Attempt {
    token: String,
    candidates: Arc<Mutex<Vec<SocketAddr>>>,
}

#[derive(Default)]
struct TcpState {
    /// Initiator attempts by session.
    attempts: HashMap<SessionId, Attempt>,
    /// Responder attempts awaiting the initiator's dial, by token.
    expecting: HashMap<String, SessionId>,
    /// Tasks to abort when a session is closed.
    tasks: HashMap<SessionId, Vec<JoinHandle<()>>>,
}

struct TcpShared {
    local: PeerId,
    config: NetworkConfig,
    advertised: Vec<SocketAddr>,
    listen_addr: SocketAddr,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Mutex<TcpState>,
}

impl TcpShared {
    fn lock(&self) -> Result<MutexGuard<'_, TcpState>> {
        self.state.lock().map_err(|_| ChaintextError::NetworkError {
            reason: "TCP negotiator lock poisoned".into(),
        })
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn track(&self, session: SessionId, task: JoinHandle<()>) {
        if let Ok(mut state) = self.lock() {
            state.tasks.entry(session).or_default().push(task);
        }
    }
}

/// Starts the reader and writer tasks for an established stream and
/// reports the channel open.
fn open_channel(shared: &Arc<TcpShared>, session: SessionId, stream: TcpStream) {
    let _ = stream.set_nodelay(true);
    let peer_addr = stream.peer_addr().ok();
    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(shared.config.channel_capacity);
    let max_len = shared.config.max_frame_bytes;

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            // The remote tears the channel down on an oversize frame.
            if frame.len() > max_len {
                tracing::warn!(%session, len = frame.len(), max_len, "dropping oversize frame");
                continue;
            }
            if let Err(e) = write_frame(&mut write_half, &frame).await {
                tracing::debug!(%session, error = %e, "TCP write failed");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let events = shared.events.clone();
    let reader = tokio::spawn(async move {
        let reason = loop {
            match read_frame(&mut read_half, max_len).await {
                Ok(Some(data)) => {
                    if events.send(TransportEvent::Frame { session, data }).is_err() {
                        return;
                    }
                }
                Ok(None) => break "remote closed the connection".to_string(),
                Err(e) => break format!("TCP read failed: {e}"),
            }
        };
        let _ = events.send(TransportEvent::ChannelClosed { session, reason });
    });

    shared.track(session, writer);
    shared.track(session, reader);

    tracing::debug!(%session, remote = ?peer_addr, "TCP channel established");
    shared.emit(TransportEvent::ChannelOpened {
        session,
        channel: ChannelHandle::new(tx),
    });
}

/// Accepts inbound streams from `accept` forever, pairing each with
/// the responder attempt named by its first frame.
async fn accept_loop<A, F>(shared: Arc<TcpShared>, mut accept: A)
where
    A: FnMut() -> F,
    F: Future<Output = std::io::Result<(TcpStream, SocketAddr)>>,
{
    loop {
        let (stream, remote) = match accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let mut stream = stream;
            let timeout = shared.config.negotiation_timeout();
            let token = match tokio::time::timeout(timeout, read_frame(&mut stream, 1024)).await {
                Ok(Ok(Some(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                _ => {
                    tracing::debug!(%remote, "TCP connection sent no session token");
                    return;
                }
            };

            let session = match shared.lock() {
                Ok(mut state) => state.expecting.remove(&token),
                Err(_) => None,
            };
            match session {
                Some(session) => open_channel(&shared, session, stream),
                None => tracing::debug!(%remote, "TCP connection with unknown session token"),
            }
        });
    }
}

async fn dial(
    shared: Arc<TcpShared>,
    session: SessionId,
    token: String,
    primary: SocketAddr,
    candidates: Arc<Mutex<Vec<SocketAddr>>>,
) {
    let timeout = shared.config.negotiation_timeout();
    let mut next_candidate = 0usize;
    let mut target = Some(primary);
    let mut last_error = String::from("no address to dial");

    while let Some(addr) = target {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(mut stream)) => match write_frame(&mut stream, token.as_bytes()).await {
                Ok(()) => {
                    open_channel(&shared, session, stream);
                    return;
                }
                Err(e) => last_error = format!("handshake with {addr} failed: {e}"),
            },
            Ok(Err(e)) => last_error = format!("dial {addr} failed: {e}"),
            Err(_) => last_error = format!("dial {addr} timed out"),
        }
        tracing::debug!(%session, %last_error, "trying next candidate");

        target = candidates
            .lock()
            .ok()
            .and_then(|c| c.get(next_candidate).copied());
        next_candidate += 1;
    }

    shared.emit(TransportEvent::ChannelClosed {
        session,
        reason: last_error,
    });
}

// ---------------------------------------------------------------------------
// TcpNegotiator
// ---------------------------------------------------------------------------

/// [`Negotiator`] building channels over TCP.
#[derive(Clone)]
pub struct TcpNegotiator {
    shared: Arc<TcpShared>,
}

impl std::fmt::Debug for TcpNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpNegotiator")
            .field("local", &self.shared.local)
            .field("listen_addr", &self.shared.listen_addr)
            .field("advertised", &self.shared.advertised)
            .finish()
    }
}

impl TcpNegotiator {
    /// Binds `config.tcp_listen` and starts accepting channels.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::NetworkError`] if the listener cannot
    /// be bound.
    pub async fn bind(
        local: PeerId,
        config: NetworkConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.tcp_listen).await.map_err(|e| {
            ChaintextError::NetworkError {
                reason: format!("failed to bind TCP listener on {}: {e}", config.tcp_listen),
            }
        })?;
        let listen_addr = listener.local_addr().map_err(|e| ChaintextError::NetworkError {
            reason: format!("failed to read TCP listen address: {e}"),
        })?;

        let advertised = if config.advertise_addrs.is_empty() {
            let mut addr = listen_addr;
            if addr.ip().is_unspecified() {
                addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
            }
            vec![addr]
        } else {
            config.advertise_addrs.clone()
        };

        tracing::info!(%listen_addr, ?advertised, "TCP negotiator listening");

        let shared = Arc::new(TcpShared {
            local,
            config,
            advertised,
            listen_addr,
            events,
            state: Mutex::new(TcpState::default()),
        });
        let listener = Arc::new(listener);
        tokio::spawn(accept_loop(Arc::clone(&shared), move || {
            let listener = Arc::clone(&listener);
            async move { listener.accept().await }
        }));

        Ok(Self { shared })
    }

    /// Address the listener is bound to.
    pub fn listen_addr(&self) -> SocketAddr {
        self.shared.listen_addr
    }
}

impl Negotiator for TcpNegotiator {
    fn start_offer(&self, session: SessionId, peer: &PeerId) -> Result<()> {
        let token = hex::encode(rand::random::<[u8; 16]>());
        let sdp = encode(&TcpOffer { token: token.clone() })?;
        self.shared.lock()?.attempts.insert(
            session,
            Attempt {
                token,
                candidates: Arc::new(Mutex::new(Vec::new())),
            },
        );
        tracing::trace!(%peer, %session, "TCP offer prepared");
        self.shared.emit(TransportEvent::LocalDescription { session, sdp });
        Ok(())
    }

    fn accept_offer(&self, session: SessionId, peer: &PeerId, offer: &str) -> Result<()> {
        let offer: TcpOffer = decode(offer)?;
        let (primary, extra) = match self.shared.advertised.split_first() {
            Some((first, rest)) => (*first, rest.to_vec()),
            None => {
                return Err(ChaintextError::NetworkError {
                    reason: "no address to advertise".into(),
                })
            }
        };

        self.shared.lock()?.expecting.insert(offer.token, session);
        tracing::trace!(%peer, %session, %primary, "TCP answer prepared");

        let sdp = encode(&TcpAnswer { addr: primary })?;
        self.shared.emit(TransportEvent::LocalDescription { session, sdp });
        for addr in extra {
            self.shared.emit(TransportEvent::LocalCandidate {
                session,
                candidate: addr.to_string(),
            });
        }
        Ok(())
    }

    fn apply_answer(&self, session: SessionId, answer: &str) -> Result<()> {
        let answer: TcpAnswer = decode(answer)?;
        let (token, candidates) = {
            let state = self.shared.lock()?;
            let attempt = state.attempts.get(&session).ok_or_else(|| ChaintextError::NetworkError {
                reason: format!("no TCP offer pending for {session}"),
            })?;
            (attempt.token.clone(), Arc::clone(&attempt.candidates))
        };

        let task = tokio::spawn(dial(
            Arc::clone(&self.shared),
            session,
            token,
            answer.addr,
            candidates,
        ));
        self.shared.track(session, task);
        Ok(())
    }

    fn add_candidate(&self, session: SessionId, candidate: &str) -> Result<()> {
        let addr: SocketAddr = candidate.parse().map_err(|e| ChaintextError::ProtocolError {
            reason: format!("malformed TCP candidate '{candidate}': {e}"),
        })?;
        let state = self.shared.lock()?;
        if let Some(attempt) = state.attempts.get(&session) {
            if let Ok(mut candidates) = attempt.candidates.lock() {
                candidates.push(addr);
            }
        }
        Ok(())
    }

    fn close(&self, session: SessionId) {
        let Ok(mut state) = self.shared.lock() else { return };
        state.attempts.remove(&session);
        state.expecting.retain(|_, s| *s != session);
        if let Some(tasks) = state.tasks.remove(&session) {
            for task in tasks {
                task.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
