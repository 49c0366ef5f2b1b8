use byteorder::{ByteOrder, LittleEndian};

use crate::persisted::StorageError;

/// Size of the fixed document header in bytes.
pub const HEADER_LEN: usize = 32;

/// Magic bytes at the start of every document file.
pub const MAGIC: [u8; 8] = *b"CONSDOC\0";

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed-size header preceding the label block and the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageHeader {
    pub format_version: u32,
    pub labels_len: u64,
    pub body_len: u64,
}

impl StorageHeader {
    pub fn new(labels_len: u64, body_len: u64) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            labels_len,
            body_len,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..8].copy_from_slice(&MAGIC);
        LittleEndian::write_u32(&mut out[8..12], self.format_version);
        // 12..16 is reserved and stays zero.
        LittleEndian::write_u64(&mut out[16..24], self.labels_len);
        LittleEndian::write_u64(&mut out[24..32], self.body_len);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() < HEADER_LEN {
            return Err(StorageError::Truncated {
                expected: HEADER_LEN,
                found: bytes.len(),
            });
        }

        if bytes[0..8] != MAGIC {
            return Err(StorageError::InvalidHeader("bad magic"));
        }

        let format_version = LittleEndian::read_u32(&bytes[8..12]);
        if format_version != FORMAT_VERSION {
            return Err(StorageError::WrongFormatVersion {
                expected: FORMAT_VERSION,
                found: format_version,
            });
        }

        if LittleEndian::read_u32(&bytes[12..16]) != 0 {
            return Err(StorageError::InvalidHeader("reserved field is not zero"));
        }

        Ok(Self {
            format_version,
            labels_len: LittleEndian::read_u64(&bytes[16..24]),
            body_len: LittleEndian::read_u64(&bytes[24..32]),
        })
    }

    /// Offset of the first body byte within the file.
    pub fn body_offset(&self) -> Result<usize, StorageError> {
        let labels_len: usize = self
            .labels_len
            .try_into()
            .map_err(|_| StorageError::InvalidHeader("label block length overflow"))?;
        HEADER_LEN
            .checked_add(labels_len)
            .ok_or(StorageError::InvalidHeader("label block length overflow"))
    }

    /// Total number of bytes the file must contain.
    pub fn file_len(&self) -> Result<usize, StorageError> {
        let body_len: usize = self
            .body_len
            .try_into()
            .map_err(|_| StorageError::OversizedBody {
                body_len: self.body_len,
            })?;
        self.body_offset()?
            .checked_add(body_len)
            .ok_or(StorageError::InvalidHeader("body length overflow"))
    }
}
