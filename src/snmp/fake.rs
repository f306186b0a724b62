//! Loopback SNMP agent for tests.

use super::ber::{self, Message, VarBind};
use crate::snapshot::Target;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

const GARBAGE: [u8; 4] = [0x30, 0x03, 0x02, 0x01];

#[derive(Debug, Clone)]
pub enum Behaviour {
    Respond(Vec<VarBind>),
    Silent,
    ErrorStatus(i64),
    Garbage,
    StaleThenRespond(Vec<VarBind>),
    GarbageThenRespond(Vec<VarBind>),
}

#[derive(Default)]
struct Seen {
    oid_counts: Vec<usize>,
    community: Option<Vec<u8>>,
}

pub struct FakeAgent {
    addr: SocketAddr,
    seen: Arc<Mutex<Seen>>,
    handle: JoinHandle<()>,
}

impl FakeAgent {
    pub async fn spawn(behaviour: Behaviour) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("bind фейкового агента");
        let addr = socket.local_addr().expect("адрес фейкового агента");
        let seen = Arc::new(Mutex::new(Seen::default()));
        let task_seen = seen.clone();

        let handle = tokio::spawn(async move {
            let mut buf = vec![0_u8; 65_535];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let Ok(request) = ber::decode_message(&buf[..len]) else {
                    continue;
                };
                {
                    let mut seen = task_seen.lock().expect("mutex");
                    seen.oid_counts.push(request.varbinds.len());
                    seen.community = Some(request.community.clone());
                }

                let replies = match &behaviour {
                    Behaviour::Silent => continue,
                    Behaviour::Garbage => vec![GARBAGE.to_vec()],
                    Behaviour::GarbageThenRespond(varbinds) => {
                        vec![GARBAGE.to_vec(), reply(&request, 0, varbinds.clone())]
                    }
                    Behaviour::Respond(varbinds) => vec![reply(&request, 0, varbinds.clone())],
                    Behaviour::ErrorStatus(status) => {
                        vec![reply(&request, *status, request.varbinds.clone())]
                    }
                    Behaviour::StaleThenRespond(varbinds) => {
                        let mut stale = request.clone();
                        stale.request_id = request.request_id.wrapping_add(1000);
                        vec![
                            reply(&stale, 0, Vec::new()),
                            reply(&request, 0, varbinds.clone()),
                        ]
                    }
                };
                for bytes in replies {
                    let _ = socket.send_to(&bytes, peer).await;
                }
            }
        });

        Self { addr, seen, handle }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn target(&self) -> Target {
        self.address().parse().expect("адрес цели")
    }

    /// Number of OIDs in each request received so far.
    pub fn requests(&self) -> Vec<usize> {
        self.seen.lock().expect("mutex").oid_counts.clone()
    }

    pub fn last_community(&self) -> Option<Vec<u8>> {
        self.seen.lock().expect("mutex").community.clone()
    }
}

impl Drop for FakeAgent {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn reply(request: &Message, error_status: i64, varbinds: Vec<VarBind>) -> Vec<u8> {
    ber::encode_message(&Message {
        version: request.version,
        community: request.community.clone(),
        pdu_type: ber::PDU_GET_RESPONSE,
        request_id: request.request_id,
        error_status,
        error_index: if error_status == 0 { 0 } else { 1 },
        varbinds,
    })
    .expect("кодирование ответа")
}
