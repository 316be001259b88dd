use std::fmt::Display;

/// The version of the protocol.
/// A version always consists of a major and a minor part.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Version {
    major: usize,
    minor: usize,
}

impl Version {
    /// Version 1.0 of the protocol
    pub const V1_0: Version = Version { major: 1, minor: 0 };

    /// Returns the latest supported version
    pub fn latest() -> Version {
        Version::V1_0
    }

    pub fn major(&self) -> usize {
        self.major
    }

    pub fn minor(&self) -> usize {
        self.minor
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::V1_0
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Number of bytes needed to carry `num_bits` bits, packed little-endian.
pub fn vector_bytes(num_bits: u32) -> usize {
    num_bits.div_ceil(8) as usize
}

/// A complete message as sent by a client, including the shift vectors.
///
/// Clients build these and serialize them with [`Message::write_to`]. Servers do not
/// materialize whole messages; they decode a [`Request`] header and read the vectors
/// in place from their receive buffer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Message {
    /// Requests info from the server. This is used to determine protocol capabilities of the server.
    GetInfo,
    /// Configures the TCK period in nanoseconds.
    SetTck { period_ns: u32 },
    /// Used to shift JTAG vectors in-and out of a device.
    Shift {
        /// represents the number of TCK clk toggles needed to shift the vectors out
        num_bits: u32,
        /// TMS vector, `num_bits` rounded up to the nearest byte
        tms: Box<[u8]>,
        /// TDI vector, `num_bits` rounded up to the nearest byte
        tdi: Box<[u8]>,
    },
}

/// The fixed-size header of a client request.
///
/// The header identifies the command and, for shifts, announces how many payload bytes
/// follow: the TMS vector immediately followed by the TDI vector, each
/// [`vector_bytes`]`(num_bits)` long.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Request {
    GetInfo,
    SetTck { period_ns: u32 },
    Shift { num_bits: u32 },
}

impl Request {
    /// Longest header of any request (`settck:` plus the period).
    pub const MAX_HEADER_LEN: usize = 11;

    /// Length of the header on the wire.
    pub fn header_len(&self) -> usize {
        match self {
            Request::GetInfo => 8,
            Request::SetTck { .. } => 11,
            Request::Shift { .. } => 10,
        }
    }

    /// Length of the payload following the header.
    pub fn payload_len(&self) -> usize {
        match self {
            Request::Shift { num_bits } => 2 * vector_bytes(*num_bits),
            _ => 0,
        }
    }

    /// Total number of bytes this request occupies on the wire.
    pub fn wire_len(&self) -> usize {
        self.header_len() + self.payload_len()
    }
}

/// Contains static information about the server capabilities that are transfered between
/// client and server in the beginning.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct XvcInfo {
    version: Version,
    max_vector_len: u32,
}

impl XvcInfo {
    /// Creates a new info object from version and the maximum receivable vector length.
    pub fn new(version: Version, max_vector_len: u32) -> XvcInfo {
        XvcInfo {
            version,
            max_vector_len,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// the max width of the vector, in bytes, that can be shifted into the server
    pub fn max_vector_len(&self) -> u32 {
        self.max_vector_len
    }
}

impl Default for XvcInfo {
    fn default() -> XvcInfo {
        XvcInfo {
            version: Version::default(),
            max_vector_len: 32 * 1024,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn version_ordering() {
        assert!(Version { major: 1, minor: 0 } < Version { major: 1, minor: 1 });
        assert!(Version { major: 2, minor: 0 } > Version { major: 1, minor: 0 });
    }

    #[test]
    fn request_lengths() {
        assert_eq!(Request::GetInfo.wire_len(), 8);
        assert_eq!(Request::SetTck { period_ns: 100 }.wire_len(), 11);
        assert_eq!(Request::Shift { num_bits: 13 }.wire_len(), 10 + 4);
        assert_eq!(Request::Shift { num_bits: 0 }.wire_len(), 10);
    }

    #[test]
    fn no_header_exceeds_the_maximum() {
        let requests = [
            Request::GetInfo,
            Request::SetTck { period_ns: u32::MAX },
            Request::Shift { num_bits: u32::MAX },
        ];
        for request in requests {
            assert!(request.header_len() <= Request::MAX_HEADER_LEN);
        }
        assert_eq!(
            requests.map(|r| r.header_len()).into_iter().max(),
            Some(Request::MAX_HEADER_LEN)
        );
    }
}
