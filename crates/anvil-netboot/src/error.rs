use thiserror::Error;

/// Per-packet DHCP failure (spec.md §4.C, §7). Every variant is logged
/// and traced by the caller; none of them propagate past the handler.
#[derive(Debug, Error)]
pub enum DhcpError {
    #[error("incoming packet is nil")]
    NilPacket,
    #[error("peer is not a UDP address")]
    NonUdpPeer,
    #[error("inbound socket is missing")]
    MissingSocket,
    #[error("unhandled DHCP message type: {0:?}")]
    UnhandledMessageType(dhcproto::v4::MessageType),
    #[error("failed to decode DHCP packet: {0}")]
    Decode(String),
    #[error("failed to encode DHCP reply: {0}")]
    Encode(String),
    #[error("failed to send DHCP reply: {0}")]
    Send(#[source] std::io::Error),
    #[error("hardware backend error: {0}")]
    Backend(#[from] anvil_backend::HardwareBackendError),
}

/// Failures serving the ISO-patch reverse proxy (spec.md §4.D).
#[derive(Debug, Error)]
pub enum IsoProxyError {
    #[error("upstream ISO fetch failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("hardware backend error: {0}")]
    Backend(#[from] anvil_backend::HardwareBackendError),
}

/// Failures from the TFTP binary server (spec.md §4.D, §6).
#[derive(Debug, Error)]
pub enum TftpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown asset: {0}")]
    UnknownAsset(String),
    #[error("write attempted on a read-only TFTP server")]
    WriteNotPermitted,
    #[error("malformed TFTP packet")]
    Malformed,
}
