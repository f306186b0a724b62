pub mod ber;
#[cfg(test)]
pub mod fake;

pub use ber::{BerError, Oid, Value, VarBind};

use crate::snapshot::Target;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{self, Instant};
use tracing::debug;

const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, Error)]
pub enum SnmpError {
    #[error("не удалось разрешить адрес {address}: {source}")]
    Resolve { address: String, source: io::Error },
    #[error("адрес {0} не разрешился ни в один IP")]
    Unresolved(String),
    #[error("не удалось открыть UDP-сокет: {0}")]
    Socket(io::Error),
    #[error("агент не ответил за {0:?}")]
    Timeout(Duration),
    #[error("ошибка ввода-вывода: {0}")]
    Io(#[from] io::Error),
    #[error("не удалось закодировать запрос: {0}")]
    Encode(#[from] BerError),
    #[error("агент вернул error-status {status} (error-index {index})")]
    Agent { status: i64, index: i64 },
}

/// SNMPv2c session bound to a single agent.
///
/// The UDP socket lives exactly as long as the session, so dropping it on any
/// path releases the connection.
pub struct Session {
    socket: UdpSocket,
    community: Vec<u8>,
    timeout: Duration,
    next_request_id: i32,
}

impl Session {
    pub async fn connect(
        target: &Target,
        community: &str,
        timeout: Duration,
    ) -> Result<Self, SnmpError> {
        let peer = resolve(target, timeout).await?;
        let bind_addr: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(SnmpError::Socket)?;
        socket.connect(peer).await.map_err(SnmpError::Socket)?;

        Ok(Self {
            socket,
            community: community.as_bytes().to_vec(),
            timeout,
            next_request_id: initial_request_id(),
        })
    }

    /// Sends one GetRequest carrying every OID and waits for the matching response.
    pub async fn get(&mut self, oids: &[Oid]) -> Result<Vec<VarBind>, SnmpError> {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1) & i32::MAX;

        let request = ber::encode_get_request(&self.community, request_id, oids)?;
        let deadline = Instant::now() + self.timeout;
        self.socket.send(&request).await?;

        let mut buf = vec![0_u8; MAX_DATAGRAM];
        loop {
            let len = match time::timeout_at(deadline, self.socket.recv(&mut buf)).await {
                Ok(received) => received?,
                Err(_elapsed) => return Err(SnmpError::Timeout(self.timeout)),
            };
            let message = match ber::decode_message(&buf[..len]) {
                Ok(message) => message,
                Err(err) => {
                    debug!(request_id, error = %err, "пропущена нераспознанная датаграмма");
                    continue;
                }
            };
            if message.pdu_type != ber::PDU_GET_RESPONSE || message.request_id != request_id {
                debug!(
                    request_id,
                    got = message.request_id,
                    "пропущен посторонний ответ"
                );
                continue;
            }
            if message.error_status != 0 {
                return Err(SnmpError::Agent {
                    status: message.error_status,
                    index: message.error_index,
                });
            }
            return Ok(message.varbinds);
        }
    }
}

async fn resolve(target: &Target, timeout: Duration) -> Result<SocketAddr, SnmpError> {
    let lookup = time::timeout(timeout, lookup_host((target.host.as_str(), target.port)))
        .await
        .map_err(|_| SnmpError::Timeout(timeout))?;
    let mut addrs = lookup.map_err(|source| SnmpError::Resolve {
        address: target.address.clone(),
        source,
    })?;
    addrs
        .next()
        .ok_or_else(|| SnmpError::Unresolved(target.address.clone()))
}

fn initial_request_id() -> i32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.subsec_nanos() & i32::MAX as u32) as i32)
        .unwrap_or(1)
}
