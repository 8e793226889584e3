//! In-process nameserver for driving a `Resolver` over loopback UDP.
//! Queries are handed to the test, which decides when and how to answer.

#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use neko_resolv::config::ResolverConfig;
use neko_resolv::dns::packet::{self, build_query, encode_name};
use neko_resolv::dns::types::RecordType;
use neko_resolv::Resolver;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct Query {
    pub id: u16,
    pub name: String,
    pub qtype: RecordType,
    pub from: SocketAddr,
}

pub enum Record {
    A(&'static str, [u8; 4]),
    Mx(&'static str, u16, &'static str),
}

pub struct FakeNameserver {
    socket: Arc<UdpSocket>,
    pub addr: SocketAddr,
    queries: mpsc::UnboundedReceiver<Query>,
}

impl FakeNameserver {
    pub async fn start() -> Self {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let (tx, queries) = mpsc::unbounded_channel();

        let reader = Arc::clone(&socket);
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            while let Ok((len, from)) = reader.recv_from(&mut buf).await {
                let Ok(parsed) = packet::parse_packet(&buf[..len]) else { continue };
                let Some(q) = parsed.questions.first() else { continue };
                let query = Query {
                    id: parsed.header.id,
                    name: q.name.clone(),
                    qtype: q.qtype,
                    from,
                };
                if tx.send(query).is_err() {
                    break;
                }
            }
        });

        Self { socket, addr, queries }
    }

    /// Next query, or panic after 5s
    pub async fn expect_query(&mut self) -> Query {
        tokio::time::timeout(Duration::from_secs(5), self.queries.recv())
            .await
            .expect("timed out waiting for a query")
            .expect("nameserver task ended")
    }

    /// Assert nothing arrives for `window`
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(q)) = tokio::time::timeout(window, self.queries.recv()).await {
            panic!("unexpected query {:?}", q);
        }
    }

    pub async fn answer(&self, query: &Query, answers: &[Record]) {
        self.answer_with_id(query, query.id, answers, &[]).await;
    }

    pub async fn answer_with_id(&self, query: &Query, id: u16, answers: &[Record], additionals: &[Record]) {
        let response = build_response(query, id, answers, additionals);
        self.socket.send_to(&response, query.from).await.unwrap();
    }

    pub async fn send_raw(&self, to: SocketAddr, raw: &[u8]) {
        self.socket.send_to(raw, to).await.unwrap();
    }
}

pub fn build_response(query: &Query, id: u16, answers: &[Record], additionals: &[Record]) -> Vec<u8> {
    let mut packet = build_query(id, &query.name, query.qtype, true);
    packet[2] |= 0x80; // QR=1
    packet[3] |= 0x80; // RA=1
    packet[6..8].copy_from_slice(&(answers.len() as u16).to_be_bytes());
    packet[10..12].copy_from_slice(&(additionals.len() as u16).to_be_bytes());
    for record in answers.iter().chain(additionals) {
        write_record(&mut packet, record);
    }
    packet
}

fn write_record(packet: &mut Vec<u8>, record: &Record) {
    let (owner, rtype, rdata) = match record {
        Record::A(owner, octets) => (*owner, RecordType::A, octets.to_vec()),
        Record::Mx(owner, preference, exchange) => {
            let mut rdata = preference.to_be_bytes().to_vec();
            rdata.extend_from_slice(&encode_name(exchange));
            (*owner, RecordType::MX, rdata)
        }
    };
    packet.extend_from_slice(&encode_name(owner));
    packet.extend_from_slice(&rtype.to_u16().to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes());
    packet.extend_from_slice(&300u32.to_be_bytes());
    packet.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    packet.extend_from_slice(&rdata);
}

pub fn loopback_config() -> ResolverConfig {
    ResolverConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        ..ResolverConfig::default()
    }
}

pub async fn resolver_with(config: ResolverConfig) -> (Resolver, FakeNameserver) {
    let ns = FakeNameserver::start().await;
    let resolver = Resolver::new(config).unwrap();
    resolver.add_nameserver(ns.addr);
    (resolver, ns)
}

pub fn ip(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
    Ipv4Addr::new(a, b, c, d)
}
