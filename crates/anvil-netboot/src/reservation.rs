//! DHCP reservation handler (spec.md §4.C). Stateless per-packet
//! responder: decode, look up the reservation, build a reply. Grounded
//! on `smee/internal/dhcp/handler/reservation/handler.go`.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anvil_backend::HardwareBackend;
use anvil_model::{HardwareRecord, NetbootConfig};
use dhcproto::v4::{DhcpOption, Message, MessageType, Opcode, UnknownOption};
use mac_address::MacAddress;
use tracing::{Instrument, info_span, warn};

use crate::classify::{self, ClientClass};
use crate::error::DhcpError;

const OPT_BOOTFILE_NAME_TAG: u8 = 67;
const OPT_DOMAIN_SEARCH: u8 = 119;

/// Where iPXE binaries and the per-host script are served from, and
/// whether netbooting is globally enabled (spec.md §4.C reply
/// construction / boot-file selection).
#[derive(Debug, Clone)]
pub struct BootConfig {
    pub server_ipv4: Ipv4Addr,
    pub remote_tftp_server: Option<Ipv4Addr>,
    pub ipxe_http_base_url: String,
    pub script_http_base_url: String,
    pub netboot_enabled: bool,
}

/// The outcome of handling one inbound packet: either nothing (silent
/// drop, an unknown MAC, a Release, or an unhandled message type), a
/// reply ready to send, or an error to log (spec.md §4.C, §7 - none of
/// these propagate past the caller).
pub enum Outcome {
    NoReply,
    Reply { bytes: Vec<u8>, dest: SocketAddr, if_index: Option<u32> },
}

pub struct ReservationHandler {
    backend: Arc<dyn HardwareBackend>,
    config: BootConfig,
}

impl ReservationHandler {
    pub fn new(backend: Arc<dyn HardwareBackend>, config: BootConfig) -> Self {
        Self { backend, config }
    }

    /// Handles one inbound packet. `peer` and `socket_present` mirror
    /// the source contract's nil/non-UDP/missing-socket checks (spec.md
    /// §4.C step 1); in this port those are represented as `Option`
    /// rather than panicking on a null pointer.
    pub async fn handle(
        &self,
        packet: Option<&[u8]>,
        peer: Option<SocketAddr>,
        if_index: Option<u32>,
    ) -> Result<Outcome, DhcpError> {
        let packet = packet.ok_or(DhcpError::NilPacket)?;
        let peer = peer.ok_or(DhcpError::NonUdpPeer)?;

        let request = Message::decode(&mut dhcproto::Decoder::new(packet))
            .map_err(|e| DhcpError::Decode(e.to_string()))?;

        let span = info_span!(
            "dhcp_packet",
            mac = %MacAddress::new(request.chaddr()[..6].try_into().unwrap_or([0; 6])),
            xid = request.xid(),
        );
        self.handle_decoded(request, peer, if_index).instrument(span).await
    }

    async fn handle_decoded(
        &self,
        request: Message,
        peer: SocketAddr,
        if_index: Option<u32>,
    ) -> Result<Outcome, DhcpError> {
        let reply_type = match request.message_type() {
            Some(MessageType::Discover) => MessageType::Offer,
            Some(MessageType::Request) => MessageType::Ack,
            Some(MessageType::Release) => {
                tracing::info!("received release, no response required, all IPs are reservations");
                return Ok(Outcome::NoReply);
            }
            other => {
                warn!(?other, "received unhandled DHCP message type");
                return Err(DhcpError::UnhandledMessageType(
                    other.unwrap_or(MessageType::Unknown(0)),
                ));
            }
        };

        let mac = chaddr_to_mac(request.chaddr());
        let record = match self.backend.get_by_mac(mac).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                tracing::info!("no reservation found for mac, dropping");
                return Ok(Outcome::NoReply);
            }
            Err(e) => return Err(e.into()),
        };

        let reply = self.build_reply(&request, &record, reply_type);
        let mut bytes = Vec::new();
        reply
            .encode(&mut dhcproto::Encoder::new(&mut bytes))
            .map_err(|e| DhcpError::Encode(e.to_string()))?;
        let dest = reply_destination(peer, request.giaddr());

        Ok(Outcome::Reply { bytes, dest, if_index })
    }

    fn build_reply(&self, request: &Message, record: &HardwareRecord, reply_type: MessageType) -> Message {
        let mut reply = Message::new(
            Ipv4Addr::UNSPECIFIED,
            record.dhcp.address,
            Ipv4Addr::UNSPECIFIED,
            request.giaddr(),
            request.chaddr(),
        );
        reply.set_opcode(Opcode::BootReply);
        reply.set_xid(request.xid());
        reply.set_flags(request.flags());

        let opts = reply.opts_mut();
        opts.insert(DhcpOption::MessageType(reply_type));
        opts.insert(DhcpOption::ServerIdentifier(self.config.server_ipv4));
        opts.insert(DhcpOption::SubnetMask(record.dhcp.netmask));
        if let Some(gw) = record.dhcp.gateway {
            opts.insert(DhcpOption::Router(vec![gw]));
        }
        if !record.dhcp.dns_servers.is_empty() {
            opts.insert(DhcpOption::DomainNameServer(record.dhcp.dns_servers.clone()));
        }
        if !record.dhcp.time_servers.is_empty() {
            opts.insert(DhcpOption::NtpServers(record.dhcp.time_servers.clone()));
        }
        if !record.dhcp.domain_search.is_empty() {
            opts.insert(DhcpOption::Unknown(UnknownOption::new(
                OPT_DOMAIN_SEARCH,
                encode_domain_search(&record.dhcp.domain_search),
            )));
        }
        if let Some(hostname) = &record.dhcp.hostname {
            opts.insert(DhcpOption::Hostname(hostname.clone()));
        }
        opts.insert(DhcpOption::AddressLeaseTime(record.dhcp.lease_seconds));

        if self.config.netboot_enabled
            && record.netboot.allow_pxe
            && classify::classify(request).is_some()
        {
            self.set_netboot_options(request, &record.netboot, &mut reply);
        }

        reply
    }

    /// Chooses `(nextServer, bootfile)` per spec.md §4.C "Boot-file
    /// selection", and either sets them on the reply or, if the client
    /// already identifies as iPXE, skips straight to the script URL.
    fn set_netboot_options(&self, request: &Message, netboot: &NetbootConfig, reply: &mut Message) {
        let mac = chaddr_to_mac(request.chaddr());

        if classify::is_ipxe_client(request) {
            let url = format!("{}{}", self.config.script_http_base_url, mac);
            reply.opts_mut().insert(DhcpOption::Unknown(UnknownOption::new(
                OPT_BOOTFILE_NAME_TAG,
                url.into_bytes(),
            )));
            return;
        }

        let class = classify::classify(request);
        let arch = classify::client_architecture(request).unwrap_or(0);
        let binary = classify::arch_binary_name(arch);

        match class {
            Some(ClientClass::Http) => {
                let url = format!("{}{}", self.config.ipxe_http_base_url, binary);
                reply.opts_mut().insert(DhcpOption::Unknown(UnknownOption::new(
                    OPT_BOOTFILE_NAME_TAG,
                    url.into_bytes(),
                )));
            }
            Some(ClientClass::Pxe) => {
                let next_server =
                    self.config.remote_tftp_server.unwrap_or(self.config.server_ipv4);
                reply.set_siaddr(next_server);
                reply.opts_mut().insert(DhcpOption::Unknown(UnknownOption::new(
                    OPT_BOOTFILE_NAME_TAG,
                    binary.as_bytes().to_vec(),
                )));
            }
            None => {}
        }
    }
}

/// Destination for the reply: `giaddr:67` if set, else the direct peer
/// (spec.md §4.C "Destination routing", RFC 2131 page 22).
fn reply_destination(direct_peer: SocketAddr, giaddr: Ipv4Addr) -> SocketAddr {
    if !giaddr.is_unspecified() {
        SocketAddr::new(giaddr.into(), 67)
    } else {
        direct_peer
    }
}

fn chaddr_to_mac(chaddr: &[u8]) -> MacAddress {
    let mut bytes = [0u8; 6];
    let len = chaddr.len().min(6);
    bytes[..len].copy_from_slice(&chaddr[..len]);
    MacAddress::new(bytes)
}

/// Uncompressed DNS wire-format encoding of RFC 3397 domain search
/// suffixes: each label length-prefixed, each name null-terminated.
fn encode_domain_search(names: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for name in names {
        for label in name.split('.').filter(|l| !l.is_empty()) {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use anvil_backend::InMemoryHardwareBackend;
    use anvil_model::{Architecture, DhcpLease};
    use dhcproto::v4::UnknownOption;

    use super::*;

    fn record() -> HardwareRecord {
        HardwareRecord {
            mac: "00:11:22:33:44:55".parse().unwrap(),
            dhcp: DhcpLease {
                address: Ipv4Addr::new(192, 0, 2, 10),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                gateway: Some(Ipv4Addr::new(192, 0, 2, 1)),
                lease_seconds: 3600,
                dns_servers: vec![],
                time_servers: vec![],
                domain_search: vec![],
                hostname: None,
            },
            netboot: NetbootConfig { allow_pxe: true, ..Default::default() },
            facility: None,
            arch: Architecture::X86_64,
            install: None,
            instance_id: None,
        }
    }

    fn discover_packet(mac: [u8; 6]) -> Vec<u8> {
        let mut msg = Message::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &mac,
        );
        msg.set_xid(0xdead_beef);
        msg.opts_mut().insert(DhcpOption::MessageType(MessageType::Discover));
        msg.opts_mut().insert(DhcpOption::ClassIdentifier(b"PXEClient:Arch:00007:UNDI:002001".to_vec()));
        msg.opts_mut().insert(DhcpOption::Unknown(UnknownOption::new(93, vec![0x00, 0x07])));
        msg.opts_mut().insert(DhcpOption::Unknown(UnknownOption::new(94, vec![1, 2, 3])));
        let mut buf = Vec::new();
        msg.encode(&mut dhcproto::Encoder::new(&mut buf)).unwrap();
        buf
    }

    #[tokio::test]
    async fn offers_reservation_with_bootfile() {
        let backend = InMemoryHardwareBackend::from_records([record()]);
        let handler = ReservationHandler::new(
            backend,
            BootConfig {
                server_ipv4: Ipv4Addr::new(192, 0, 2, 2),
                remote_tftp_server: None,
                ipxe_http_base_url: "http://192.0.2.2/ipxe/".to_string(),
                script_http_base_url: "http://192.0.2.2/script/".to_string(),
                netboot_enabled: true,
            },
        );

        let packet = discover_packet([0, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let peer = "198.51.100.5:68".parse().unwrap();
        let outcome = handler.handle(Some(&packet), Some(peer), Some(3)).await.unwrap();

        match outcome {
            Outcome::Reply { bytes, dest, if_index } => {
                let reply = Message::decode(&mut dhcproto::Decoder::new(&bytes)).unwrap();
                assert_eq!(reply.yiaddr(), Ipv4Addr::new(192, 0, 2, 10));
                assert_eq!(reply.xid(), 0xdead_beef);
                assert_eq!(dest, peer);
                assert_eq!(if_index, Some(3));
            }
            Outcome::NoReply => panic!("expected a reply"),
        }
    }

    #[tokio::test]
    async fn unknown_mac_yields_no_reply() {
        let backend = Arc::new(InMemoryHardwareBackend::new());
        let handler = ReservationHandler::new(
            backend,
            BootConfig {
                server_ipv4: Ipv4Addr::new(192, 0, 2, 2),
                remote_tftp_server: None,
                ipxe_http_base_url: "http://192.0.2.2/ipxe/".to_string(),
                script_http_base_url: "http://192.0.2.2/script/".to_string(),
                netboot_enabled: true,
            },
        );
        let packet = discover_packet([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let outcome =
            handler.handle(Some(&packet), Some("198.51.100.5:68".parse().unwrap()), None).await.unwrap();
        assert!(matches!(outcome, Outcome::NoReply));
    }

    #[test]
    fn domain_search_round_trips_labels() {
        let encoded = encode_domain_search(&["eng.example.com".to_string()]);
        assert_eq!(encoded, {
            let mut v = vec![3];
            v.extend_from_slice(b"eng");
            v.push(7);
            v.extend_from_slice(b"example");
            v.push(3);
            v.extend_from_slice(b"com");
            v.push(0);
            v
        });
    }

}
