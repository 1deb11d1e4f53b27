//! Test doubles shared by the unit tests.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{RData, Record, RecordType};

use crate::error::{Error, Result};
use crate::upstream::Upstream;

/// Response to `query` carrying a single A record, or no records at all
/// when the question is not for an A record.
pub fn answer(query: &Message, ip: Ipv4Addr) -> Message {
    let mut response = reply_to(query);
    if let Some(q) = query.queries().first() {
        if q.query_type() == RecordType::A {
            response.add_answer(Record::from_rdata(q.name().clone(), 300, RData::A(A(ip))));
        }
    }
    response
}

/// Response to an A question carrying `count` distinct A records.
pub fn answers(query: &Message, count: usize) -> Message {
    let mut response = reply_to(query);
    if let Some(q) = query.queries().first() {
        if q.query_type() == RecordType::A {
            for i in 0..count {
                let ip = Ipv4Addr::from(0x0A00_0000 + i as u32);
                response.add_answer(Record::from_rdata(q.name().clone(), 300, RData::A(A(ip))));
            }
        }
    }
    response
}

/// NXDOMAIN response to `query` with an empty answer section.
pub fn nxdomain(query: &Message) -> Message {
    let mut response = reply_to(query);
    response.set_response_code(ResponseCode::NXDomain);
    response
}

fn reply_to(query: &Message) -> Message {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(query.op_code())
        .set_recursion_desired(query.recursion_desired())
        .set_recursion_available(true)
        .add_queries(query.queries().to_vec());
    response
}

/// How the mock upstream answers.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Answer(Ipv4Addr),
    /// That many A records, for replies too large for one datagram.
    Flood(usize),
    NxDomain,
    Fail,
}

/// Upstream that answers locally and counts how often it was asked.
pub struct MockUpstream {
    behavior: Behavior,
    calls: AtomicUsize,
}

impl MockUpstream {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn exchange(&self, query: &Message) -> Result<Message> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Answer(ip) => Ok(answer(query, ip)),
            Behavior::Flood(count) => Ok(answers(query, count)),
            Behavior::NxDomain => Ok(nxdomain(query)),
            Behavior::Fail => Err(Error::ContentType("text/html".to_string())),
        }
    }

    fn endpoint(&self) -> &str {
        "mock://upstream"
    }
}
