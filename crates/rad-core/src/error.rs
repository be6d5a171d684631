use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Malformed or out-of-order traffic from a trusted peer process.
    #[error("ipc error: {0}")]
    Ipc(String),

    #[error("{iface}: packet too big ({len} > {max} bytes)")]
    PacketTooBig {
        iface: String,
        len: usize,
        max: usize,
    },

    #[error("{op}({iface}): {source}")]
    Multicast {
        op: &'static str,
        iface: String,
        source: std::io::Error,
    },

    #[error("interface error: {0}")]
    Interface(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
