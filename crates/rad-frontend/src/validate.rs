use crate::registry::Registry;
use crate::socket::Received;
use bytes::Bytes;
use rad_core::types::MAX_PACKET_SIZE;
use rad_msg::records::RaRs;
use thiserror::Error;

/// Hop limit every genuine neighbor discovery packet carries.
pub const ND_HOP_LIMIT: i32 = 255;

/// Why an inbound datagram was dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Reject {
    #[error("no receiving interface")]
    NoInterface,
    #[error("no hop limit")]
    NoHopLimit,
    #[error("invalid hop limit {0}")]
    BadHopLimit(i32),
    #[error("packet too big ({0} bytes)")]
    TooBig(usize),
}

/// Check one datagram from the raw socket and turn it into a record for the
/// engine. `data` holds the received bytes (`rx.len` of them, capped by the
/// buffer size).
pub fn validate(rx: &Received, data: &[u8]) -> Result<RaRs, Reject> {
    let if_index = match rx.meta.if_index {
        Some(idx) if idx != 0 => idx,
        _ => return Err(Reject::NoInterface),
    };
    let hop_limit = rx.meta.hop_limit.ok_or(Reject::NoHopLimit)?;
    if hop_limit != ND_HOP_LIMIT {
        return Err(Reject::BadHopLimit(hop_limit));
    }
    if rx.len > MAX_PACKET_SIZE || data.len() > MAX_PACKET_SIZE {
        return Err(Reject::TooBig(rx.len.max(data.len())));
    }

    Ok(RaRs {
        if_index,
        from: rx.from,
        packet: Bytes::copy_from_slice(&data[..rx.len.min(data.len())]),
    })
}

/// Name to log a datagram under: the interface if we know it.
pub fn describe_iface(registry: &Registry, if_index: Option<u32>) -> String {
    match if_index {
        Some(idx) => registry
            .find_by_index(idx)
            .map(|i| i.name.clone())
            .unwrap_or_else(|| format!("index {idx}")),
        None => "unknown interface".to_string(),
    }
}
