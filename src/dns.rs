//! DNS message helpers on top of `hickory-proto`.

use std::net::IpAddr;

use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};

use crate::error::Result;

/// Size of the fixed DNS header.
pub const HEADER_LEN: usize = 12;

/// UDP payload size advertised through EDNS on queries we build.
pub const EDNS_PAYLOAD: u16 = 4096;

/// Cache key derived from the complete wire encoding of a query.
///
/// The transaction ID is the only field left out, so a client repeating a
/// question with a fresh ID still hits, while any difference in name, type,
/// class, flags or EDNS options yields a different key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Box<[u8]>);

impl Fingerprint {
    pub fn of(query: &Message) -> Result<Self> {
        let mut bytes = query.to_vec()?;
        if bytes.len() >= 2 {
            bytes[0] = 0;
            bytes[1] = 0;
        }
        Ok(Self(bytes.into_boxed_slice()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Whether a message has the QR bit set.
pub fn is_response(message: &Message) -> bool {
    message.message_type() == MessageType::Response
}

/// Only positive responses are cached; empty and negative answers never are.
pub fn is_cacheable(response: &Message) -> bool {
    is_response(response) && !response.answers().is_empty()
}

/// Build a recursive query for `host` with a random transaction ID.
pub fn build_query(host: &str, record_type: RecordType) -> Result<Message> {
    let mut name = Name::from_ascii(host)?;
    name.set_fqdn(true);

    let mut message = Message::new();
    message
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name, record_type));

    let mut edns = Edns::new();
    edns.set_max_payload(EDNS_PAYLOAD);
    message.set_edns(edns);
    Ok(message)
}

/// Encode `response` for the UDP client that sent `query`.
///
/// A reply larger than the payload size the query accepts (512 bytes unless
/// it advertises more through EDNS) is replaced by its truncated form: header
/// with TC set, the question, and no records.
pub fn encode_for_udp(query: &Message, response: &Message) -> Result<Vec<u8>> {
    let wire = response.to_vec()?;
    if wire.len() <= usize::from(query.max_payload()) {
        return Ok(wire);
    }
    Ok(response.truncate().to_vec()?)
}

/// First question name, for logging.
pub fn domain(message: &Message) -> String {
    message
        .queries()
        .first()
        .map(|q| q.name().to_string())
        .unwrap_or_else(|| "<unknown>".to_string())
}

/// IPv4 and IPv6 addresses carried in the answer section, in answer order.
pub fn addresses(response: &Message) -> Vec<IpAddr> {
    response
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            RData::A(a) => Some(IpAddr::V4(a.0)),
            RData::AAAA(aaaa) => Some(IpAddr::V6(aaaa.0)),
            _ => None,
        })
        .collect()
}
