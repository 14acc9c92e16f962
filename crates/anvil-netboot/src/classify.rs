//! Netboot-client classification and boot-file selection (spec.md
//! §4.C). Grounded on `smee/internal/dhcp/handler/reservation/handler.go`'s
//! `isNetbootClient`.

use dhcproto::v4::{DhcpOption, Message, MessageType, OptionCode};

const OPT_CLIENT_SYSTEM_ARCH: u8 = 93;
const OPT_CLIENT_NETWORK_IFACE: u8 = 94;
const OPT_CLIENT_MACHINE_ID: u8 = 97;
const OPT_USER_CLASS: u8 = 77;

const PXE_CLIENT_PREFIX: &[u8] = b"PXEClient";
const HTTP_CLIENT_PREFIX: &[u8] = b"HTTPClient";

/// Raw bytes of an option dhcproto doesn't model with a named variant
/// (93/94/97/77 are PXE-specific, not part of the common DHCP option set).
fn raw_option(msg: &Message, code: u8) -> Option<&[u8]> {
    match msg.opts().get(OptionCode::Unknown(code)) {
        Some(DhcpOption::Unknown(unknown)) => Some(unknown.data()),
        _ => None,
    }
}

fn class_identifier(msg: &Message) -> Option<&[u8]> {
    match msg.opts().get(OptionCode::ClassIdentifier) {
        Some(DhcpOption::ClassIdentifier(bytes)) => Some(bytes.as_slice()),
        _ => None,
    }
}

/// `true` iff the client advertised `option 77 (user-class) == "iPXE"`
/// - it has already chain-loaded and just wants the per-host script.
pub fn is_ipxe_client(msg: &Message) -> bool {
    raw_option(msg, OPT_USER_CLASS).is_some_and(|uc| uc == b"iPXE")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientClass {
    Pxe,
    Http,
}

/// A client is *netboot* iff all hold (spec.md §4.C):
/// message type is Discover/Request; option 60 present with prefix
/// `PXEClient`/`HTTPClient`; option 93 present; option 94 present;
/// option 97 absent, empty, or exactly 17 bytes starting with `0x00`.
pub fn classify(msg: &Message) -> Option<ClientClass> {
    if !matches!(msg.opcode(), dhcproto::v4::Opcode::BootRequest)
        || !matches!(msg.message_type(), Some(MessageType::Discover) | Some(MessageType::Request))
    {
        return None;
    }

    let class_id = class_identifier(msg)?;
    let class = if class_id.starts_with(PXE_CLIENT_PREFIX) {
        ClientClass::Pxe
    } else if class_id.starts_with(HTTP_CLIENT_PREFIX) {
        ClientClass::Http
    } else {
        return None;
    };

    raw_option(msg, OPT_CLIENT_SYSTEM_ARCH)?;
    raw_option(msg, OPT_CLIENT_NETWORK_IFACE)?;

    match raw_option(msg, OPT_CLIENT_MACHINE_ID) {
        None => {}
        Some(guid) if guid.is_empty() => {}
        Some(guid) if guid.len() == 17 && guid[0] == 0 => {}
        Some(_) => return None,
    }

    Some(class)
}

/// Option 93's 2-byte client-architecture code, big-endian per RFC 4578.
pub fn client_architecture(msg: &Message) -> Option<u16> {
    let raw = raw_option(msg, OPT_CLIENT_SYSTEM_ARCH)?;
    if raw.len() < 2 { None } else { Some(u16::from_be_bytes([raw[0], raw[1]])) }
}

/// Per-architecture iPXE binary name, chain-loaded before the per-host
/// script (spec.md §4.C "a per-architecture iPXE binary name"). Codes
/// per RFC 4578 / the PXE spec's client-architecture table.
pub fn arch_binary_name(arch: u16) -> &'static str {
    match arch {
        6 | 7 | 9 => "ipxe.efi",
        10 | 11 => "snp.efi",
        _ => "undionly.kpxe",
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use dhcproto::v4::{Message, MessageType, UnknownOption};

    use super::*;

    fn base_discover() -> Message {
        let mut msg = Message::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &[0, 0x11, 0x22, 0x33, 0x44, 0x55],
        );
        msg.opts_mut().insert(DhcpOption::MessageType(MessageType::Discover));
        msg.opts_mut().insert(DhcpOption::ClassIdentifier(b"PXEClient:Arch:00000:UNDI:002001".to_vec()));
        msg.opts_mut().insert(DhcpOption::Unknown(UnknownOption::new(93, vec![0x00, 0x07])));
        msg.opts_mut().insert(DhcpOption::Unknown(UnknownOption::new(94, vec![1, 2, 3])));
        msg
    }

    #[test]
    fn classifies_pxe_client() {
        let msg = base_discover();
        assert_eq!(classify(&msg), Some(ClientClass::Pxe));
        assert_eq!(client_architecture(&msg), Some(0x0007));
    }

    #[test]
    fn rejects_missing_arch_option() {
        let mut msg = base_discover();
        msg.opts_mut().remove(&OptionCode::Unknown(93));
        assert_eq!(classify(&msg), None);
    }

    #[test]
    fn rejects_malformed_machine_id() {
        let mut msg = base_discover();
        msg.opts_mut().insert(DhcpOption::Unknown(UnknownOption::new(97, vec![1; 17])));
        assert_eq!(classify(&msg), None);
    }

    #[test]
    fn accepts_valid_machine_id() {
        let mut msg = base_discover();
        let mut guid = vec![0u8; 17];
        guid[0] = 0;
        msg.opts_mut().insert(DhcpOption::Unknown(UnknownOption::new(97, guid)));
        assert_eq!(classify(&msg), Some(ClientClass::Pxe));
    }

    #[test]
    fn arch_table_matches_known_binaries() {
        assert_eq!(arch_binary_name(0), "undionly.kpxe");
        assert_eq!(arch_binary_name(7), "ipxe.efi");
        assert_eq!(arch_binary_name(11), "snp.efi");
    }
}
