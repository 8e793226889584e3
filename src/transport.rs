use parking_lot::{Mutex, RwLock};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::correlator::RequestCorrelator;
use crate::dns::packet;
use crate::dns::types::ResponseCode;
use crate::error::ResolveError;

pub const DNS_PORT: u16 = 53;

/// Maximum size of a DNS packet (with some headroom).
const MAX_DNS_PACKET_SIZE: usize = 4096;

struct Bound {
    socket: Arc<UdpSocket>,
    reader: JoinHandle<()>,
}

/// The one UDP socket all queries go out on and all responses come in on.
///
/// Bound lazily on the first query. If the read side dies the slot is
/// cleared and the next query binds a fresh socket.
pub struct Transport {
    bind_address: SocketAddr,
    nameservers: RwLock<Vec<SocketAddr>>,
    correlator: Arc<RequestCorrelator>,
    bound: Arc<Mutex<Option<Bound>>>,
}

impl Transport {
    pub fn new(bind_address: SocketAddr, correlator: Arc<RequestCorrelator>) -> Self {
        Self {
            bind_address,
            nameservers: RwLock::new(Vec::new()),
            correlator,
            bound: Arc::new(Mutex::new(None)),
        }
    }

    /// Add a nameserver unless already present. Returns whether it was new.
    pub fn add_nameserver(&self, addr: SocketAddr) -> bool {
        let mut nameservers = self.nameservers.write();
        if nameservers.contains(&addr) {
            return false;
        }
        info!("Nameserver added: {}", addr);
        nameservers.push(addr);
        true
    }

    pub fn nameservers(&self) -> Vec<SocketAddr> {
        self.nameservers.read().clone()
    }

    /// Everything here spawns onto tokio, so a runtime must be current.
    pub fn require_runtime() -> Result<(), ResolveError> {
        tokio::runtime::Handle::try_current()
            .map(|_| ())
            .map_err(|_| ResolveError::ReactorNotActive)
    }

    /// Stamp `transaction_id` into `query` and send a copy to every nameserver.
    /// Whichever answers first wins; the rest are dropped by the correlator.
    /// Fails only if no copy could be sent.
    pub async fn send_query(&self, mut query: Vec<u8>, transaction_id: u16) -> Result<(), ResolveError> {
        let nameservers = self.nameservers();
        if nameservers.is_empty() {
            return Err(ResolveError::NoNameservers);
        }
        packet::set_id(&mut query, transaction_id)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        let socket = self.socket()?;
        let mut last_err = None;
        let mut sent = 0;
        for ns in &nameservers {
            match socket.send_to(&query, *ns).await {
                Ok(_) => sent += 1,
                Err(e) => {
                    warn!("Failed to send query {} to {}: {}", transaction_id, ns, e);
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if sent == 0 => Err(e.into()),
            _ => {
                debug!("Query {} sent to {} nameserver(s)", transaction_id, sent);
                Ok(())
            }
        }
    }

    /// Decode an inbound datagram and route it. Garbage is dropped quietly.
    pub fn on_datagram(&self, raw: &[u8]) {
        deliver(&self.correlator, raw);
    }

    /// Tear the socket down; the next query binds a new one.
    pub fn unbind(&self) {
        if let Some(bound) = self.bound.lock().take() {
            bound.reader.abort();
            info!("Resolver socket unbound");
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound
            .lock()
            .as_ref()
            .and_then(|b| b.socket.local_addr().ok())
    }

    fn socket(&self) -> Result<Arc<UdpSocket>, ResolveError> {
        Self::require_runtime()?;

        let mut bound = self.bound.lock();
        if let Some(b) = bound.as_ref() {
            return Ok(Arc::clone(&b.socket));
        }

        let std_socket = std::net::UdpSocket::bind(self.bind_address)?;
        std_socket.set_nonblocking(true)?;
        let socket = Arc::new(UdpSocket::from_std(std_socket)?);
        info!("🐱 Resolver socket bound on {}", socket.local_addr()?);

        let reader = tokio::spawn(read_loop(
            Arc::clone(&socket),
            Arc::clone(&self.correlator),
            Arc::downgrade(&self.bound),
        ));
        *bound = Some(Bound {
            socket: Arc::clone(&socket),
            reader,
        });
        Ok(socket)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(bound) = self.bound.lock().take() {
            bound.reader.abort();
        }
    }
}

fn deliver(correlator: &RequestCorrelator, raw: &[u8]) {
    match packet::parse_packet(raw) {
        Ok(response) if response.header.qr => {
            if response.header.tc {
                warn!("Response {} is truncated; using what arrived", response);
            }
            if response.header.rcode != ResponseCode::NoError {
                debug!("Response {} carries rcode {:?}", response, response.header.rcode);
            }
            correlator.complete(response.header.id, response);
        }
        Ok(other) => debug!("Ignoring non-response datagram {}", other),
        Err(e) => debug!("Discarding undecodable datagram ({} bytes): {}", raw.len(), e),
    }
}

async fn read_loop(
    socket: Arc<UdpSocket>,
    correlator: Arc<RequestCorrelator>,
    slot: Weak<Mutex<Option<Bound>>>,
) {
    let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                debug!("Datagram from {} ({} bytes)", from, len);
                deliver(&correlator, &buf[..len]);
            }
            // ICMP unreachable from a dead nameserver; the socket itself is fine
            Err(e) if matches!(e.kind(), io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset) => {
                debug!("Ignoring ICMP error on resolver socket: {}", e);
            }
            Err(e) => {
                warn!("Resolver socket closed: {}", e);
                break;
            }
        }
    }

    // unbind: let the next query re-create the socket
    if let Some(slot) = slot.upgrade() {
        let mut bound = slot.lock();
        if bound.as_ref().is_some_and(|b| Arc::ptr_eq(&b.socket, &socket)) {
            *bound = None;
        }
    }
}
