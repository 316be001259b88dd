/// Read and write implementations for the protocol messages
use std::io::{self, BufRead, BufReader, Read, Write};

use crate::{
    error::ReadError,
    protocol::{Message, Request, Version, XvcInfo, vector_bytes},
};

const XVC_INFO_PREFIX: &[u8] = b"xvcServer_v";

impl XvcInfo {
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writeln!(
            writer,
            "xvcServer_v{}:{}",
            self.version(),
            self.max_vector_len()
        )
    }

    pub fn from_reader(reader: &mut impl Read) -> Result<XvcInfo, ReadError> {
        let mut buf_reader = BufReader::with_capacity(32, reader);
        let mut line = Vec::with_capacity(32);
        let _ = buf_reader.read_until(b'\n', &mut line)?;

        // Parse format: "xvcServer_v{version}:{max_vector_len_bytes}"
        let line = line
            .trim_ascii_end()
            .strip_prefix(XVC_INFO_PREFIX)
            .ok_or_else(|| ReadError::InvalidFormat("Invalid prefix in info message".to_string()))?;

        let colon_index = line.iter().position(|l| *l == b':').ok_or_else(|| {
            ReadError::InvalidFormat("Missing ':' separator in info message".to_string())
        })?;
        let (version_part, rest) = line.split_at(colon_index);

        let version = match version_part {
            b"1.0" => Version::V1_0,
            _ => {
                return Err(ReadError::UnsupportedVersion(
                    String::from_utf8_lossy(version_part).to_string(),
                ));
            }
        };

        let max_vector_len = str::from_utf8(&rest[1..])?.parse::<u32>()?;

        Ok(XvcInfo::new(version, max_vector_len))
    }
}

const CMD_GET_INFO: &[u8] = b"getinfo:";
const CMD_SET_TCK: &[u8] = b"settck:";
const CMD_SHIFT: &[u8] = b"shift:";

fn le_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(word)
}

impl Request {
    /// Decodes a request header from the start of `buf`.
    ///
    /// Returns `Ok(None)` while `buf` does not yet hold the complete header. Two bytes are
    /// enough to reject an unknown command. Shift requests announcing more than
    /// `max_shift_bytes` per vector are rejected as soon as the bit count is known.
    /// The payload of a shift is not required to be present.
    pub fn decode(buf: &[u8], max_shift_bytes: usize) -> Result<Option<Request>, ReadError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let literal = match &buf[..2] {
            b"ge" => CMD_GET_INFO,
            b"se" => CMD_SET_TCK,
            b"sh" => CMD_SHIFT,
            prefix => {
                return Err(ReadError::InvalidCommandPrefix(
                    String::from_utf8_lossy(prefix).to_string(),
                ));
            }
        };
        let argument_len = if literal == CMD_GET_INFO { 0 } else { 4 };
        let header_len = literal.len() + argument_len;
        if buf.len() < header_len {
            return Ok(None);
        }
        if &buf[..literal.len()] != literal {
            return Err(ReadError::InvalidCommand(
                String::from_utf8_lossy(&buf[..literal.len()]).to_string(),
            ));
        }

        let request = match literal {
            CMD_GET_INFO => Request::GetInfo,
            CMD_SET_TCK => Request::SetTck {
                period_ns: le_u32(&buf[literal.len()..]),
            },
            _ => {
                let num_bits = le_u32(&buf[literal.len()..]);
                let num_bytes = vector_bytes(num_bits);
                if num_bytes > max_shift_bytes {
                    return Err(ReadError::TooManyBytes {
                        max: max_shift_bytes,
                        got: num_bytes,
                    });
                }
                Request::Shift { num_bits }
            }
        };
        Ok(Some(request))
    }
}

impl Message {
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        match self {
            Message::GetInfo => writer.write_all(CMD_GET_INFO),
            Message::SetTck { period_ns } => {
                writer.write_all(CMD_SET_TCK)?;
                writer.write_all(&period_ns.to_le_bytes())
            }
            Message::Shift { num_bits, tms, tdi } => {
                writer.write_all(CMD_SHIFT)?;
                writer.write_all(&num_bits.to_le_bytes())?;
                writer.write_all(tms)?;
                writer.write_all(tdi)
            }
        }
    }

    /// The header this message starts with.
    pub fn request(&self) -> Request {
        match self {
            Message::GetInfo => Request::GetInfo,
            Message::SetTck { period_ns } => Request::SetTck {
                period_ns: *period_ns,
            },
            Message::Shift { num_bits, .. } => Request::Shift {
                num_bits: *num_bits,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use crate::error::ReadError;
    use crate::protocol::{Message, Request, Version, XvcInfo};
    use std::io::Cursor;

    const DEFAULT_MAX_SHIFT_BYTES: usize = 1024;

    fn encode(message: &Message) -> Vec<u8> {
        let mut out = Vec::new();
        message.write_to(&mut out).unwrap();
        out
    }

    #[test]
    fn write_server_info() {
        let mut out = Vec::new();
        XvcInfo::new(Version::V1_0, 32768).write_to(&mut out).unwrap();
        assert_eq!(out, b"xvcServer_v1.0:32768\n".to_vec());
    }

    #[test]
    fn read_server_info() {
        let mut cursor = Cursor::new(b"xvcServer_v1.0:32\n");
        let info = XvcInfo::from_reader(&mut cursor).unwrap();
        assert_eq!(info.version(), Version::V1_0);
        assert_eq!(info.max_vector_len(), 32)
    }

    #[test]
    fn read_server_info_rejects_unknown_version() {
        let mut cursor = Cursor::new(b"xvcServer_v2.3:32\n");
        match XvcInfo::from_reader(&mut cursor) {
            Err(ReadError::UnsupportedVersion(v)) => assert_eq!(v, "2.3"),
            other => panic!("expected UnsupportedVersion, got {:?}", other),
        }
    }

    #[test]
    fn read_server_info_rejects_short_line() {
        let mut cursor = Cursor::new(b"xvc\n");
        assert!(matches!(
            XvcInfo::from_reader(&mut cursor),
            Err(ReadError::InvalidFormat(_))
        ));
    }

    #[test]
    fn decode_getinfo() {
        let data = encode(&Message::GetInfo);
        assert_eq!(data, b"getinfo:");
        let request = Request::decode(&data, DEFAULT_MAX_SHIFT_BYTES).unwrap();
        assert_eq!(request, Some(Request::GetInfo));
    }

    #[test]
    fn decode_settck() {
        let period: u32 = 0x1234_5678;
        let data = encode(&Message::SetTck { period_ns: period });
        assert_eq!(&data[..7], b"settck:");
        assert_eq!(
            Request::decode(&data, DEFAULT_MAX_SHIFT_BYTES).unwrap(),
            Some(Request::SetTck { period_ns: period })
        );
    }

    #[test]
    fn decode_shift_header_without_payload() {
        let message = Message::Shift {
            num_bits: 13,
            tms: vec![0xAA; 2].into_boxed_slice(),
            tdi: vec![0x55; 2].into_boxed_slice(),
        };
        let data = encode(&message);
        assert_eq!(data, b"shift:\x0d\x00\x00\x00\xAA\xAA\x55\x55");

        let request = Request::decode(&data[..10], DEFAULT_MAX_SHIFT_BYTES)
            .unwrap()
            .unwrap();
        assert_eq!(request, message.request());
        assert_eq!(request.wire_len(), data.len());
    }

    #[test]
    fn decode_needs_complete_header() {
        let data = encode(&Message::SetTck { period_ns: 7 });
        for end in 0..data.len() {
            assert_eq!(
                Request::decode(&data[..end], DEFAULT_MAX_SHIFT_BYTES).unwrap(),
                None,
                "header truncated to {end} bytes"
            );
        }
    }

    #[test]
    fn invalid_prefix() {
        match Request::decode(b"xx", DEFAULT_MAX_SHIFT_BYTES) {
            Err(ReadError::InvalidCommandPrefix(p)) => assert_eq!(p, "xx"),
            other => panic!("expected InvalidCommandPrefix, got {:?}", other),
        }
    }

    #[test]
    fn invalid_command_with_valid_prefix() {
        match Request::decode(b"getinfo!", DEFAULT_MAX_SHIFT_BYTES) {
            Err(ReadError::InvalidCommand(c)) => assert_eq!(c, "getinfo!"),
            other => panic!("expected InvalidCommand, got {:?}", other),
        }
    }

    #[test]
    fn too_many_bytes_shift() {
        let num_bytes_exceed = 1024 + 1;
        let num_bits = (num_bytes_exceed * 8) as u32;
        let mut data = b"shift:".to_vec();
        data.extend_from_slice(&num_bits.to_le_bytes());
        match Request::decode(&data, 1024) {
            Err(ReadError::TooManyBytes { max, got }) => {
                assert_eq!(max, 1024);
                assert_eq!(got, num_bytes_exceed);
            }
            other => panic!("expected TooManyBytes, got {:?}", other),
        }
    }

    #[test]
    fn largest_allowed_shift() {
        let mut data = b"shift:".to_vec();
        data.extend_from_slice(&(1024u32 * 8).to_le_bytes());
        assert_eq!(
            Request::decode(&data, 1024).unwrap(),
            Some(Request::Shift { num_bits: 8192 })
        );
    }
}
