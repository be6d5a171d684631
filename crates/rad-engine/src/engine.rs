use rad_core::error::Result;
use rad_core::types::ALL_NODES;
use rad_msg::records::{RaRs, SendRa};
use rad_msg::{Imsg, ImsgChannel, ImsgType, Record};
use std::net::SocketAddrV6;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const ND_ROUTER_SOLICIT: u8 = 133;
const ND_ROUTER_ADVERT: u8 = 134;

/// ICMPv6 header plus the reserved word.
const RS_MIN_LEN: usize = 8;

/// Answers Router Solicitations relayed by the front-end.
pub struct Engine {
    frontend: ImsgChannel,
}

impl Engine {
    pub fn new(frontend: ImsgChannel) -> Self {
        Self { frontend }
    }

    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!("engine started");
        let mut shutdown = shutdown;

        loop {
            tokio::select! {
                msg = self.frontend.recv() => match msg? {
                    Some(imsg) => self.dispatch_frontend(imsg)?,
                    None => {
                        info!("frontend channel closed");
                        break;
                    }
                },
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        info!("engine shutting down");
                        break;
                    }
                }
            }
        }

        self.frontend.shutdown().await.ok();
        Ok(())
    }

    /// Handle one frontend message. Replies are queued and written while
    /// `run` waits for the next message.
    pub fn dispatch_frontend(&mut self, imsg: Imsg) -> Result<()> {
        match imsg.message_type() {
            Some(ImsgType::RaRs) => {
                let rec = RaRs::from_bytes(&imsg.data)?;
                let Some(req) = solicit_reply(&rec) else {
                    return Ok(());
                };
                if self.frontend.is_full() {
                    warn!("frontend is not keeping up, dropping reply on index {}", req.if_index);
                    return Ok(());
                }
                self.frontend.queue_record(ImsgType::SendRa, &req)?;
            }
            _ => debug!("error handling imsg {} from frontend", imsg.kind),
        }
        Ok(())
    }
}

/// The send request an inbound datagram calls for, if any.
pub fn solicit_reply(rec: &RaRs) -> Option<SendRa> {
    match rec.packet.first() {
        Some(&ND_ROUTER_SOLICIT) if rec.packet.len() >= RS_MIN_LEN && rec.packet[1] == 0 => {
            debug!("RS from {} on index {}", rec.from.ip(), rec.if_index);
            Some(SendRa {
                if_index: rec.if_index,
                to: SocketAddrV6::new(ALL_NODES, 0, 0, rec.if_index),
            })
        }
        Some(&ND_ROUTER_SOLICIT) => {
            debug!("short or malformed RS from {}", rec.from.ip());
            None
        }
        Some(&ND_ROUTER_ADVERT) => {
            debug!("RA from {} on index {}", rec.from.ip(), rec.if_index);
            None
        }
        Some(other) => {
            debug!("ignoring ICMPv6 type {other} from {}", rec.from.ip());
            None
        }
        None => None,
    }
}
