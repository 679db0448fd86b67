//! MySQL wire protocol pieces used by the LOCAL INFILE exchange.
//!
//! Implements only the packets this path touches:
//! - COM_QUERY
//! - The first response packet (OK, ERR, LOCAL INFILE request, result set)
//! - OK / ERR completion packets

use bytes::{BufMut, BytesMut};

use crate::error::{InfileError, InfileResult};

/// MySQL packet header: 3-byte length + 1-byte sequence
pub const HEADER_SIZE: usize = 4;

/// Largest payload a single packet can carry.
pub const MAX_PAYLOAD_SIZE: usize = 0xff_ffff;

/// Request name selecting the programmatic row path.
pub const DATA_SENTINEL: &str = "Data::Data";

/// Prefix selecting a registered reader.
pub const READER_PREFIX: &str = "Reader::";

const OK_HEADER: u8 = 0x00;
const LOCAL_INFILE_HEADER: u8 = 0xfb;
const EOF_HEADER: u8 = 0xfe;
const ERR_HEADER: u8 = 0xff;

const COM_QUERY: u8 = 0x03;

/// Read a length-encoded integer from buffer.
pub fn read_len_enc_int(buf: &mut &[u8]) -> Option<u64> {
    let (&first, rest) = buf.split_first()?;
    let width = match first {
        0xfb => {
            // NULL
            *buf = rest;
            return Some(0);
        }
        0xfc => 2,
        0xfd => 3,
        0xfe => 8,
        n => {
            *buf = rest;
            return Some(n as u64);
        }
    };
    if rest.len() < width {
        return None;
    }
    let mut bytes = [0u8; 8];
    bytes[..width].copy_from_slice(&rest[..width]);
    *buf = &rest[width..];
    Some(u64::from_le_bytes(bytes))
}

fn read_u16(buf: &mut &[u8]) -> Option<u16> {
    if buf.len() < 2 {
        return None;
    }
    let val = u16::from_le_bytes([buf[0], buf[1]]);
    *buf = &buf[2..];
    Some(val)
}

/// Encode COM_QUERY command.
pub fn encode_query(sql: &str) -> BytesMut {
    let mut buf = BytesMut::with_capacity(1 + sql.len());
    buf.put_u8(COM_QUERY);
    buf.put_slice(sql.as_bytes());
    buf
}

/// Successful completion reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    /// Human readable info, e.g. `Records: 3  Deleted: 0  Skipped: 0  Warnings: 0`.
    pub info: String,
}

impl OkPacket {
    /// Parse an OK packet (0x00, or 0xfe in its EOF form).
    pub fn parse(data: &[u8]) -> InfileResult<Self> {
        let malformed = || InfileError::Protocol("malformed OK packet".into());

        let mut buf = match data.split_first() {
            Some((&OK_HEADER | &EOF_HEADER, rest)) => rest,
            _ => return Err(malformed()),
        };
        let affected_rows = read_len_enc_int(&mut buf).ok_or_else(malformed)?;
        let last_insert_id = read_len_enc_int(&mut buf).ok_or_else(malformed)?;
        let status_flags = read_u16(&mut buf).unwrap_or(0);
        let warnings = read_u16(&mut buf).unwrap_or(0);
        let info = String::from_utf8_lossy(buf).to_string();

        Ok(Self {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
        })
    }
}

/// Convert an ERR packet into `InfileError::Server`.
pub fn parse_err_packet(data: &[u8]) -> InfileError {
    let mut buf = match data.split_first() {
        Some((&ERR_HEADER, rest)) => rest,
        _ => return InfileError::Protocol("malformed ERR packet".into()),
    };
    let code = read_u16(&mut buf).unwrap_or(0);

    let mut state = String::from("HY000");
    if buf.first() == Some(&b'#') && buf.len() >= 6 {
        state = String::from_utf8_lossy(&buf[1..6]).to_string();
        buf = &buf[6..];
    }

    InfileError::Server {
        code,
        state,
        message: String::from_utf8_lossy(buf).to_string(),
    }
}

/// Interpret a completion packet: OK becomes `Ok`, ERR becomes `Err`.
pub fn parse_completion(data: &[u8]) -> InfileResult<OkPacket> {
    match data.first() {
        Some(&OK_HEADER) | Some(&EOF_HEADER) => OkPacket::parse(data),
        Some(&ERR_HEADER) => Err(parse_err_packet(data)),
        Some(other) => Err(InfileError::Protocol(format!(
            "unexpected completion packet header 0x{:02x}",
            other
        ))),
        None => Err(InfileError::Protocol("empty completion packet".into())),
    }
}

/// First response packet of a COM_QUERY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultHeader {
    Ok(OkPacket),
    /// Server asks for a local resource; carries the requested name.
    LocalInfile(String),
    /// A result set follows with this many columns.
    ResultSet(u64),
}

impl ResultHeader {
    pub fn parse(data: &[u8]) -> InfileResult<Self> {
        match data.first() {
            Some(&OK_HEADER) => Ok(ResultHeader::Ok(OkPacket::parse(data)?)),
            Some(&ERR_HEADER) => Err(parse_err_packet(data)),
            Some(&LOCAL_INFILE_HEADER) => Ok(ResultHeader::LocalInfile(
                String::from_utf8_lossy(&data[1..]).to_string(),
            )),
            Some(_) => {
                let mut buf = data;
                read_len_enc_int(&mut buf)
                    .map(ResultHeader::ResultSet)
                    .ok_or_else(|| InfileError::Protocol("malformed column count".into()))
            }
            None => Err(InfileError::Protocol("empty result header".into())),
        }
    }
}

/// Whether `name` selects a registered reader, returning the reader name.
///
/// The prefix must start the name or directly follow a `/`: some servers
/// echo the name back qualified with an absolute path.
pub fn reader_name(name: &str) -> Option<&str> {
    let idx = name.find(READER_PREFIX)?;
    if idx == 0 || name.as_bytes()[idx - 1] == b'/' {
        Some(&name[idx + READER_PREFIX.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_len_enc_int() {
        let data = [0x05, 0xfc, 0x34, 0x12, 0xfd, 0x01, 0x00, 0x01];
        let mut buf = &data[..];
        assert_eq!(read_len_enc_int(&mut buf), Some(5));
        assert_eq!(read_len_enc_int(&mut buf), Some(0x1234));
        assert_eq!(read_len_enc_int(&mut buf), Some(0x010001));
        assert!(buf.is_empty());
        assert_eq!(read_len_enc_int(&mut buf), None);

        let mut truncated = &[0xfcu8, 0x01][..];
        assert_eq!(read_len_enc_int(&mut truncated), None);
    }

    #[test]
    fn test_parse_ok_packet() {
        let mut data = vec![0x00, 0x03, 0x00, 0x02, 0x00, 0x00, 0x00];
        data.extend_from_slice(b"Records: 3");
        let ok = OkPacket::parse(&data).unwrap();
        assert_eq!(ok.affected_rows, 3);
        assert_eq!(ok.status_flags, 2);
        assert_eq!(ok.info, "Records: 3");
    }

    #[test]
    fn test_parse_err_packet() {
        let mut data = vec![0xff, 0x7c, 0x04, b'#'];
        data.extend_from_slice(b"42000The used command is not allowed");
        match parse_completion(&data) {
            Err(InfileError::Server {
                code,
                state,
                message,
            }) => {
                assert_eq!(code, 1148);
                assert_eq!(state, "42000");
                assert_eq!(message, "The used command is not allowed");
            }
            other => panic!("expected server error, got {:?}", other),
        }
    }

    #[test]
    fn test_result_header() {
        let mut data = vec![0xfb];
        data.extend_from_slice(b"/tmp/data.csv");
        assert_eq!(
            ResultHeader::parse(&data).unwrap(),
            ResultHeader::LocalInfile("/tmp/data.csv".into())
        );
        assert_eq!(
            ResultHeader::parse(&[0x02]).unwrap(),
            ResultHeader::ResultSet(2)
        );
        assert!(matches!(
            ResultHeader::parse(&[0x00, 0x00, 0x00]).unwrap(),
            ResultHeader::Ok(_)
        ));
    }

    #[test]
    fn test_reader_name() {
        assert_eq!(reader_name("Reader::data"), Some("data"));
        assert_eq!(reader_name("/var/lib/mysql/Reader::data"), Some("data"));
        assert_eq!(reader_name("xReader::data"), None);
        assert_eq!(reader_name("/tmp/data.csv"), None);
        assert_eq!(reader_name("Reader::"), Some(""));
    }

    #[test]
    fn test_encode_query() {
        let buf = encode_query("SELECT 1");
        assert_eq!(&buf[..], b"\x03SELECT 1");
    }
}
