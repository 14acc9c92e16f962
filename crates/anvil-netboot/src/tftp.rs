//! Read-only TFTP server (RFC 1350) for iPXE binaries (spec.md §4.D
//! surface 1, §6 "fixed 512-byte default block size, clients may
//! negotiate via options"). Grounded on `smee/tftp.go`'s
//! `tftpHandler`: a fixed asset set, permission-denied on any write,
//! and `test.1mb`/`test.8mb` fake payloads for link-MTU diagnostics.
//! No TFTP crate exists anywhere in the retrieved corpus; this is a
//! hand-rolled state machine over `tokio::net::UdpSocket`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::assets::AssetStore;
use crate::error::TftpError;

const OPCODE_RRQ: u16 = 1;
const OPCODE_WRQ: u16 = 2;
const OPCODE_DATA: u16 = 3;
const OPCODE_ACK: u16 = 4;
const OPCODE_ERROR: u16 = 5;
const OPCODE_OACK: u16 = 6;

const DEFAULT_BLKSIZE: usize = 512;
const MAX_BLKSIZE: usize = 65464;
const RETRY_COUNT: u32 = 5;
const RETRY_TIMEOUT: Duration = Duration::from_secs(2);

const ERR_NOT_FOUND: u16 = 1;
const ERR_ACCESS_VIOLATION: u16 = 2;

pub struct TftpServer {
    assets: Arc<AssetStore>,
}

impl TftpServer {
    pub fn new(assets: Arc<AssetStore>) -> Self {
        Self { assets }
    }

    /// Binds `bind_addr` (normally `0.0.0.0:69`) and serves requests
    /// until `shutdown` resolves (spec.md §5 "cancel-then-wait").
    pub async fn serve(
        &self,
        bind_addr: SocketAddr,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<(), TftpError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        info!(%bind_addr, "tftp server listening");
        tokio::pin!(shutdown);

        let mut buf = [0u8; 1024];
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("tftp server shutting down");
                    return Ok(());
                }
                recv = socket.recv_from(&mut buf) => {
                    let (len, peer) = recv?;
                    self.handle_request(&buf[..len], peer);
                }
            }
        }
    }

    fn handle_request(&self, packet: &[u8], peer: SocketAddr) {
        let assets = self.assets.clone();
        match parse_request(packet) {
            Some(Request::Read { filename, blksize }) => {
                tokio::spawn(async move {
                    if let Err(e) = serve_read(&assets, &filename, blksize, peer).await {
                        warn!(%peer, filename, error = %e, "tftp read failed");
                    }
                });
            }
            Some(Request::Write { filename }) => {
                debug!(%peer, filename, "tftp write rejected: read-only server");
                tokio::spawn(async move {
                    let _ = send_error(peer, ERR_ACCESS_VIOLATION, "access violation").await;
                });
            }
            None => {
                debug!(%peer, "malformed or unsupported tftp packet, dropping");
            }
        }
    }
}

enum Request {
    Read { filename: String, blksize: Option<usize> },
    Write { filename: String },
}

/// Parses an RRQ/WRQ packet: `opcode(2) filename\0 mode\0 [opt\0val\0]*`.
fn parse_request(packet: &[u8]) -> Option<Request> {
    if packet.len() < 4 {
        return None;
    }
    let opcode = u16::from_be_bytes([packet[0], packet[1]]);
    if opcode != OPCODE_RRQ && opcode != OPCODE_WRQ {
        return None;
    }

    let mut fields = packet[2..].split(|&b| b == 0).map(|s| String::from_utf8_lossy(s).to_string());
    let filename = fields.next()?;
    let _mode = fields.next()?;

    if opcode == OPCODE_WRQ {
        return Some(Request::Write { filename });
    }

    let mut blksize = None;
    let mut rest: Vec<String> = fields.filter(|s| !s.is_empty()).collect();
    while rest.len() >= 2 {
        let val = rest.remove(1);
        let key = rest.remove(0);
        if key.eq_ignore_ascii_case("blksize") {
            blksize = val.parse::<usize>().ok().map(|v| v.clamp(8, MAX_BLKSIZE));
        }
    }

    Some(Request::Read { filename, blksize })
}

async fn serve_read(
    assets: &AssetStore,
    filename: &str,
    requested_blksize: Option<usize>,
    peer: SocketAddr,
) -> Result<(), TftpError> {
    let data = match assets.get(filename) {
        Some(data) => data,
        None => {
            send_error(peer, ERR_NOT_FOUND, "file not found").await?;
            return Err(TftpError::UnknownAsset(filename.to_string()));
        }
    };

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(peer).await?;

    let blksize = requested_blksize.unwrap_or(DEFAULT_BLKSIZE);
    if requested_blksize.is_some() {
        let mut oack = vec![0u8, OPCODE_OACK as u8];
        oack.extend_from_slice(b"blksize\0");
        oack.extend_from_slice(blksize.to_string().as_bytes());
        oack.push(0);
        send_and_wait_ack(&socket, &oack, 0).await?;
    }

    let mut block_num: u16 = 1;
    let mut offset = 0usize;
    loop {
        let end = (offset + blksize).min(data.len());
        let chunk = &data[offset..end];
        let is_last = chunk.len() < blksize;

        let mut packet = Vec::with_capacity(4 + chunk.len());
        packet.extend_from_slice(&OPCODE_DATA.to_be_bytes());
        packet.extend_from_slice(&block_num.to_be_bytes());
        packet.extend_from_slice(chunk);

        send_and_wait_ack(&socket, &packet, block_num).await?;

        offset = end;
        if is_last {
            break;
        }
        block_num = block_num.wrapping_add(1);
    }

    Ok(())
}

async fn send_and_wait_ack(
    socket: &UdpSocket,
    packet: &[u8],
    expect_block: u16,
) -> Result<(), TftpError> {
    let mut ack_buf = [0u8; 4];
    for attempt in 0..RETRY_COUNT {
        socket.send(packet).await?;
        match timeout(RETRY_TIMEOUT, socket.recv(&mut ack_buf)).await {
            Ok(Ok(n)) if n >= 4 => {
                let opcode = u16::from_be_bytes([ack_buf[0], ack_buf[1]]);
                let block = u16::from_be_bytes([ack_buf[2], ack_buf[3]]);
                if opcode == OPCODE_ACK && block == expect_block {
                    return Ok(());
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(TftpError::Io(e)),
            Err(_timed_out) => {
                debug!(attempt, expect_block, "tftp ack timeout, retransmitting");
            }
        }
    }
    Err(TftpError::Malformed)
}

async fn send_error(peer: SocketAddr, code: u16, message: &str) -> Result<(), TftpError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let mut packet = Vec::with_capacity(4 + message.len() + 1);
    packet.extend_from_slice(&OPCODE_ERROR.to_be_bytes());
    packet.extend_from_slice(&code.to_be_bytes());
    packet.extend_from_slice(message.as_bytes());
    packet.push(0);
    socket.send_to(&packet, peer).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rrq(filename: &str, opts: &[(&str, &str)]) -> Vec<u8> {
        let mut packet = OPCODE_RRQ.to_be_bytes().to_vec();
        packet.extend_from_slice(filename.as_bytes());
        packet.push(0);
        packet.extend_from_slice(b"octet");
        packet.push(0);
        for (k, v) in opts {
            packet.extend_from_slice(k.as_bytes());
            packet.push(0);
            packet.extend_from_slice(v.as_bytes());
            packet.push(0);
        }
        packet
    }

    #[test]
    fn parses_plain_rrq() {
        let packet = rrq("ipxe.efi", &[]);
        match parse_request(&packet) {
            Some(Request::Read { filename, blksize }) => {
                assert_eq!(filename, "ipxe.efi");
                assert_eq!(blksize, None);
            }
            _ => panic!("expected a read request"),
        }
    }

    #[test]
    fn parses_rrq_with_blksize_option() {
        let packet = rrq("undionly.kpxe", &[("blksize", "1468")]);
        match parse_request(&packet) {
            Some(Request::Read { blksize, .. }) => assert_eq!(blksize, Some(1468)),
            _ => panic!("expected a read request"),
        }
    }

    #[test]
    fn wrq_is_rejected_as_a_write() {
        let mut packet = OPCODE_WRQ.to_be_bytes().to_vec();
        packet.extend_from_slice(b"whatever\0octet\0");
        match parse_request(&packet) {
            Some(Request::Write { filename }) => assert_eq!(filename, "whatever"),
            _ => panic!("expected a write request"),
        }
    }
}
