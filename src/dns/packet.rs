use crate::dns::types::{DnsClass, RecordType, ResponseCode};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

/// Raw DNS packet codec - full binary level parsing per RFC 1035
/// No external DNS library used - everything is hand-parsed from &[u8]

#[derive(Debug, Clone)]
pub struct DnsHeader {
    pub id: u16,
    pub qr: bool,          // Query/Response flag
    pub tc: bool,           // Truncated
    pub rd: bool,           // Recursion Desired
    pub rcode: ResponseCode,
    pub qdcount: u16,       // Question count
    pub ancount: u16,       // Answer count
    pub nscount: u16,       // Authority count
    pub arcount: u16,       // Additional count
}

#[derive(Debug, Clone)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: RecordType,
}

#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: RecordType,
    pub rdata: Vec<u8>,
    /// rdataのパケット内開始オフセット (圧縮ポインタ解決用)
    pub rdata_offset: usize,
}

#[derive(Debug, Clone)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub additionals: Vec<DnsRecord>,
    pub raw: Vec<u8>,
}

impl fmt::Display for DnsPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(q) = self.questions.first() {
            write!(f, "#{} {} {} (answers: {})", self.header.id, q.name, q.qtype.name(), self.header.ancount)
        } else {
            write!(f, "#{} (no question)", self.header.id)
        }
    }
}

/// Parse a DNS name from raw bytes with label compression support (RFC 1035 §4.1.4)
pub fn parse_name(data: &[u8], offset: &mut usize) -> anyhow::Result<String> {
    let mut labels = Vec::new();
    let mut jumped = false;
    let mut pos = *offset;
    let mut jumps_performed = 0;
    const MAX_JUMPS: usize = 10; // Prevent infinite loops

    loop {
        if pos >= data.len() {
            return Err(anyhow::anyhow!("DNS name parse: unexpected end of data at offset {}", pos));
        }

        let len_byte = data[pos];

        // Check for pointer (compression) - top 2 bits are 11
        if (len_byte & 0xC0) == 0xC0 {
            if pos + 1 >= data.len() {
                return Err(anyhow::anyhow!("DNS name parse: truncated pointer at offset {}", pos));
            }
            if !jumped {
                // Save where we need to continue reading after this name
                *offset = pos + 2;
                jumped = true;
            }
            let pointer = ((len_byte as u16 & 0x3F) << 8) | data[pos + 1] as u16;
            pos = pointer as usize;
            jumps_performed += 1;
            if jumps_performed > MAX_JUMPS {
                return Err(anyhow::anyhow!("DNS name parse: too many jumps (possible loop)"));
            }
            continue;
        }

        if len_byte == 0 {
            // End of name
            if !jumped {
                *offset = pos + 1;
            }
            break;
        }

        let label_len = len_byte as usize;
        pos += 1;

        if pos + label_len > data.len() {
            return Err(anyhow::anyhow!("DNS name parse: label extends beyond packet"));
        }

        labels.push(String::from_utf8_lossy(&data[pos..pos + label_len]).to_string());
        pos += label_len;
    }

    Ok(labels.join("."))
}

/// Parse a domain name from a known offset within the full packet.
/// This handles compression pointers correctly.
pub fn parse_name_at_offset(full_packet: &[u8], offset: usize) -> anyhow::Result<String> {
    let mut pos = offset;
    parse_name(full_packet, &mut pos)
}

/// Parse a complete DNS packet from raw bytes
pub fn parse_packet(data: &[u8]) -> anyhow::Result<DnsPacket> {
    if data.len() < 12 {
        return Err(anyhow::anyhow!("DNS packet too short: {} bytes (minimum 12)", data.len()));
    }

    // Parse header (12 bytes)
    let id = u16::from_be_bytes([data[0], data[1]]);
    let flags = u16::from_be_bytes([data[2], data[3]]);
    let qdcount = u16::from_be_bytes([data[4], data[5]]);
    let ancount = u16::from_be_bytes([data[6], data[7]]);
    let nscount = u16::from_be_bytes([data[8], data[9]]);
    let arcount = u16::from_be_bytes([data[10], data[11]]);

    let header = DnsHeader {
        id,
        qr: (flags >> 15) & 1 == 1,
        tc: (flags >> 9) & 1 == 1,
        rd: (flags >> 8) & 1 == 1,
        rcode: ResponseCode::from((flags & 0xF) as u8),
        qdcount,
        ancount,
        nscount,
        arcount,
    };

    let mut offset = 12;

    let mut questions = Vec::new();
    for _ in 0..qdcount {
        let name = parse_name(data, &mut offset)?;
        if offset + 4 > data.len() {
            return Err(anyhow::anyhow!("DNS question section truncated"));
        }
        let qtype = RecordType::from(u16::from_be_bytes([data[offset], data[offset + 1]]));
        offset += 4; // QTYPE + QCLASS
        questions.push(DnsQuestion { name, qtype });
    }

    let answers = parse_records(data, &mut offset, ancount)?;
    // authority section is only stepped over
    parse_records(data, &mut offset, nscount)?;
    let additionals = parse_records(data, &mut offset, arcount)?;

    Ok(DnsPacket {
        header,
        questions,
        answers,
        additionals,
        raw: data.to_vec(),
    })
}

fn parse_records(data: &[u8], offset: &mut usize, count: u16) -> anyhow::Result<Vec<DnsRecord>> {
    let mut records = Vec::new();
    for _ in 0..count {
        let name = parse_name(data, offset)?;
        if *offset + 10 > data.len() {
            return Err(anyhow::anyhow!("DNS record truncated at offset {}", offset));
        }
        let rtype = RecordType::from(u16::from_be_bytes([data[*offset], data[*offset + 1]]));
        let rdlength = u16::from_be_bytes([data[*offset + 8], data[*offset + 9]]);
        *offset += 10;

        if *offset + rdlength as usize > data.len() {
            return Err(anyhow::anyhow!("DNS rdata extends beyond packet"));
        }
        let rdata_offset = *offset;
        let rdata = data[*offset..*offset + rdlength as usize].to_vec();
        *offset += rdlength as usize;

        records.push(DnsRecord {
            name,
            rtype,
            rdata,
            rdata_offset,
        });
    }
    Ok(records)
}

/// Longest label and longest encoded name (RFC 1035 §2.3.4)
pub const MAX_LABEL_LEN: usize = 63;
pub const MAX_NAME_LEN: usize = 255;

/// Reject names that cannot be encoded: an oversized label or an encoded
/// length past 255 bytes. Empty labels are skipped by `encode_name`.
pub fn check_name(name: &str) -> anyhow::Result<()> {
    let mut encoded_len = 1; // root
    for label in name.trim_end_matches('.').split('.').filter(|l| !l.is_empty()) {
        if label.len() > MAX_LABEL_LEN {
            return Err(anyhow::anyhow!(
                "label of {} bytes exceeds {} in '{}'",
                label.len(),
                MAX_LABEL_LEN,
                name
            ));
        }
        encoded_len += 1 + label.len();
    }
    if encoded_len > MAX_NAME_LEN {
        return Err(anyhow::anyhow!("name of {} encoded bytes exceeds {}", encoded_len, MAX_NAME_LEN));
    }
    Ok(())
}

/// Encode a DNS name into wire format. Callers check the name with
/// `check_name` first; oversized labels are not caught here.
pub fn encode_name(name: &str) -> Vec<u8> {
    let mut result = Vec::new();
    for label in name.trim_end_matches('.').split('.').filter(|l| !l.is_empty()) {
        result.push(label.len() as u8);
        result.extend_from_slice(label.as_bytes());
    }
    result.push(0);
    result
}

/// Build a single-question query packet
pub fn build_query(id: u16, name: &str, qtype: RecordType, rd: bool) -> Vec<u8> {
    let mut packet = Vec::with_capacity(512);

    // Header
    packet.extend_from_slice(&id.to_be_bytes());
    let flags: u16 = if rd { 0x0100 } else { 0x0000 }; // RD=1
    packet.extend_from_slice(&flags.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT=1
    packet.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT=0
    packet.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT=0
    packet.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT=0

    // Question
    packet.extend_from_slice(&encode_name(name));
    packet.extend_from_slice(&qtype.to_u16().to_be_bytes());
    packet.extend_from_slice(&DnsClass::IN.to_u16().to_be_bytes());

    packet
}

/// Overwrite the transaction id of an encoded message in place
pub fn set_id(packet: &mut [u8], id: u16) -> anyhow::Result<()> {
    if packet.len() < 12 {
        return Err(anyhow::anyhow!("DNS packet too short to carry an id: {} bytes", packet.len()));
    }
    packet[..2].copy_from_slice(&id.to_be_bytes());
    Ok(())
}

fn ipv4_of(record: &DnsRecord) -> Option<Ipv4Addr> {
    if record.rtype != RecordType::A {
        return None;
    }
    let octets: [u8; 4] = record.rdata.as_slice().try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

/// Every A address in the answer section, in order of appearance
pub fn answer_addresses(packet: &DnsPacket) -> Vec<Ipv4Addr> {
    packet.answers.iter().filter_map(ipv4_of).collect()
}

/// Every MX answer as (preference, exchange), in order of appearance.
/// Malformed MX rdata is skipped.
pub fn answer_exchanges(packet: &DnsPacket) -> Vec<(u16, String)> {
    packet
        .answers
        .iter()
        .filter(|r| r.rtype == RecordType::MX && r.rdata.len() >= 3)
        .filter_map(|r| {
            let preference = u16::from_be_bytes([r.rdata[0], r.rdata[1]]);
            // exchange may point back into the packet, so parse from the full message
            let exchange = parse_name_at_offset(&packet.raw, r.rdata_offset + 2).ok()?;
            Some((preference, exchange))
        })
        .collect()
}

/// A records from the additional section, grouped by owner name (lowercased)
pub fn additional_addresses(packet: &DnsPacket) -> HashMap<String, Vec<Ipv4Addr>> {
    let mut hints: HashMap<String, Vec<Ipv4Addr>> = HashMap::new();
    for record in &packet.additionals {
        if let Some(addr) = ipv4_of(record) {
            hints.entry(record.name.to_lowercase()).or_default().push(addr);
        }
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answer with one A record for example.com (name compressed to the question)
    fn a_response(id: u16) -> Vec<u8> {
        let mut packet = build_query(id, "example.com", RecordType::A, true);
        packet[2] |= 0x80; // QR=1
        packet[7] = 2; // ANCOUNT=2
        for addr in [[93, 184, 216, 34], [93, 184, 216, 35]] {
            packet.extend_from_slice(&[0xC0, 12]);
            packet.extend_from_slice(&1u16.to_be_bytes());
            packet.extend_from_slice(&1u16.to_be_bytes());
            packet.extend_from_slice(&300u32.to_be_bytes());
            packet.extend_from_slice(&4u16.to_be_bytes());
            packet.extend_from_slice(&addr);
        }
        packet
    }

    #[test]
    fn test_encode_parse_name() {
        let name = "example.com";
        let encoded = encode_name(name);
        assert_eq!(encoded, vec![7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0]);

        let mut offset = 0;
        let parsed = parse_name(&encoded, &mut offset).unwrap();
        assert_eq!(parsed, "example.com");
        assert_eq!(offset, encoded.len());
    }

    #[test]
    fn test_encode_trailing_dot_and_root() {
        assert_eq!(encode_name("example.com."), encode_name("example.com"));
        assert_eq!(encode_name(""), vec![0]);
    }

    #[test]
    fn test_build_query_sets_rd() {
        let query = build_query(0x1234, "google.com", RecordType::MX, true);
        assert_eq!(query[0], 0x12);
        assert_eq!(query[1], 0x34);
        assert_eq!(query[2] & 0x01, 0x01);

        let packet = parse_packet(&query).unwrap();
        assert!(packet.header.rd);
        assert!(!packet.header.qr);
        assert_eq!(packet.questions[0].qtype, RecordType::MX);
    }

    #[test]
    fn test_set_id_rewrites_header_only() {
        let mut query = build_query(0, "example.com", RecordType::A, true);
        let before = query[2..].to_vec();
        set_id(&mut query, 59999).unwrap();
        assert_eq!(parse_packet(&query).unwrap().header.id, 59999);
        assert_eq!(&query[2..], before.as_slice());

        assert!(set_id(&mut [0u8; 4], 1).is_err());
    }

    #[test]
    fn test_answer_addresses_keep_order() {
        let packet = parse_packet(&a_response(7)).unwrap();
        assert!(packet.header.qr);
        assert_eq!(
            answer_addresses(&packet),
            vec![Ipv4Addr::new(93, 184, 216, 34), Ipv4Addr::new(93, 184, 216, 35)]
        );
        assert!(answer_exchanges(&packet).is_empty());
    }

    #[test]
    fn test_answer_exchanges_follow_compression() {
        let mut packet = build_query(1, "example.com", RecordType::MX, true);
        packet[2] |= 0x80;
        packet[7] = 1;
        // example.com MX 10 mail.<ptr example.com>
        packet.extend_from_slice(&[0xC0, 12]);
        packet.extend_from_slice(&15u16.to_be_bytes());
        packet.extend_from_slice(&1u16.to_be_bytes());
        packet.extend_from_slice(&300u32.to_be_bytes());
        packet.extend_from_slice(&9u16.to_be_bytes());
        packet.extend_from_slice(&10u16.to_be_bytes());
        packet.extend_from_slice(&[4, b'm', b'a', b'i', b'l', 0xC0, 12]);

        let parsed = parse_packet(&packet).unwrap();
        assert_eq!(answer_exchanges(&parsed), vec![(10, "mail.example.com".to_string())]);
    }

    #[test]
    fn test_additional_addresses_grouped_by_owner() {
        let mut packet = a_response(3);
        // move both answers into the additional section
        packet[7] = 0;
        packet[11] = 2;
        let parsed = parse_packet(&packet).unwrap();
        let hints = additional_addresses(&parsed);
        assert_eq!(hints.get("example.com").map(Vec::len), Some(2));
    }

    #[test]
    fn test_check_name_limits() {
        assert!(check_name("example.com.").is_ok());
        assert!(check_name(&format!("{}.com", "a".repeat(63))).is_ok());
        assert!(check_name(&format!("{}.com", "a".repeat(64))).is_err());
        assert!(check_name(&"a".repeat(300)).is_err());

        // 4 labels of 63 -> 4 * 64 + 1 = 257 bytes on the wire
        let long = vec!["b".repeat(63); 4].join(".");
        assert!(check_name(&long).is_err());
        let fits = vec!["b".repeat(63), "b".repeat(63), "b".repeat(63), "b".repeat(61)].join(".");
        assert_eq!(encode_name(&fits).len(), 255);
        assert!(check_name(&fits).is_ok());
    }

    #[test]
    fn test_truncated_flag_decoded() {
        let mut response = a_response(4);
        response[2] |= 0x02; // TC=1
        assert!(parse_packet(&response).unwrap().header.tc);
        assert!(!parse_packet(&a_response(4)).unwrap().header.tc);
    }

    #[test]
    fn test_parse_rejects_truncated() {
        assert!(parse_packet(&[0u8; 5]).is_err());
        let response = a_response(9);
        assert!(parse_packet(&response[..response.len() - 2]).is_err());
    }
}
