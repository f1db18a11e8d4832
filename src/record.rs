//! On-disk record framing.
//!
//! ```text
//! Fixed-width header                          Variable-length body
//! +=====+========+==========+============+   +=======+=======+
//! | u32 |  i64   |   u32    |    u32     |   |  key  | value |
//! +=====+========+==========+============+   +=======+=======+
//!  crc    tstamp    key_size   value_size
//! ```
//! All integers are little-endian. CRC-32 (IEEE 802.3) covers every byte
//! from `tstamp` through `value`.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Fixed header size in bytes: crc(4) + tstamp(8) + key_size(4) + value_size(4).
pub const HEADER_SIZE: usize = 20;

/// Maximum permitted key size, in bytes.
pub const MAX_KEY_SIZE: usize = 65_536;

/// Maximum permitted value size, in bytes.
pub const MAX_VALUE_SIZE: usize = 16_777_216;

/// A single key/value version as it is framed on disk.
#[derive(Debug, Clone)]
pub struct Record {
    /// CRC-32 over `tstamp || key_size || value_size || key || value`.
    pub crc: u32,
    /// Microsecond epoch timestamp at write time.
    pub tstamp: i64,
    pub(crate) key: Vec<u8>,
    pub(crate) value: Vec<u8>,
}

impl Record {
    /// Builds a new record for `key`/`value`, computing its CRC and stamping
    /// the current wall-clock time. Fails if either bound in [`MAX_KEY_SIZE`]
    /// or [`MAX_VALUE_SIZE`] is exceeded.
    pub fn new(tstamp: i64, key: Vec<u8>, value: Vec<u8>) -> Result<Record> {
        if key.len() > MAX_KEY_SIZE {
            return Err(Error::InvalidKeySize);
        }
        if value.len() > MAX_VALUE_SIZE {
            return Err(Error::InvalidValueSize);
        }
        let crc = checksum(tstamp, &key, &value);
        Ok(Record {
            crc,
            tstamp,
            key,
            value,
        })
    }

    /// Total on-disk size of this record, header included.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.key.len() + self.value.len()
    }

    /// Serializes the record into its on-disk little-endian layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        let mut header = [0u8; HEADER_SIZE];
        LittleEndian::write_u32(&mut header[0..4], self.crc);
        LittleEndian::write_i64(&mut header[4..12], self.tstamp);
        LittleEndian::write_u32(&mut header[12..16], self.key.len() as u32);
        LittleEndian::write_u32(&mut header[16..20], self.value.len() as u32);
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf
    }

    /// Decodes a header previously read from disk, validating the size
    /// bounds from the module docs but not yet the CRC (the payload has
    /// not been read yet at this point). Returns the partially-decoded
    /// record along with the key/value sizes still to be read.
    pub(crate) fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<(u32, i64, u32, u32)> {
        let crc = LittleEndian::read_u32(&header[0..4]);
        let tstamp = LittleEndian::read_i64(&header[4..12]);
        let key_size = LittleEndian::read_u32(&header[12..16]);
        let value_size = LittleEndian::read_u32(&header[16..20]);
        if key_size as usize > MAX_KEY_SIZE {
            return Err(Error::InvalidKeySize);
        }
        if value_size as usize > MAX_VALUE_SIZE {
            return Err(Error::InvalidValueSize);
        }
        Ok((crc, tstamp, key_size, value_size))
    }

    /// Finishes decoding a record given its header fields and the key/value
    /// payload read immediately after. Verifies the CRC.
    pub(crate) fn finish_decode(
        crc: u32,
        tstamp: i64,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<Record> {
        let computed = checksum(tstamp, &key, &value);
        if computed != crc {
            return Err(Error::Corrupted(format!(
                "crc mismatch: stored {crc:#010x}, computed {computed:#010x}"
            )));
        }
        Ok(Record {
            crc,
            tstamp,
            key,
            value,
        })
    }

    /// `true` iff this record is a tombstone (an empty value represents a
    /// deletion, see `Store::delete`).
    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }
}

fn checksum(tstamp: i64, key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&tstamp.to_le_bytes());
    hasher.update(&(key.len() as u32).to_le_bytes());
    hasher.update(&(value.len() as u32).to_le_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let record = Record::new(42, b"key".to_vec(), b"value".to_vec()).unwrap();
        let encoded = record.encode();

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&encoded[..HEADER_SIZE]);
        let (crc, tstamp, key_size, value_size) = Record::decode_header(&header).unwrap();
        let key = encoded[HEADER_SIZE..HEADER_SIZE + key_size as usize].to_vec();
        let value =
            encoded[HEADER_SIZE + key_size as usize..HEADER_SIZE + key_size as usize + value_size as usize]
                .to_vec();
        let decoded = Record::finish_decode(crc, tstamp, key, value).unwrap();

        assert_eq!(decoded.tstamp, 42);
        assert_eq!(decoded.key, b"key");
        assert_eq!(decoded.value, b"value");
    }

    #[test]
    fn detects_corrupted_payload() {
        let record = Record::new(1, b"k".to_vec(), b"v".to_vec()).unwrap();
        let mut encoded = record.encode();
        // Flip a byte in the value.
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&encoded[..HEADER_SIZE]);
        let (crc, tstamp, key_size, value_size) = Record::decode_header(&header).unwrap();
        let key = encoded[HEADER_SIZE..HEADER_SIZE + key_size as usize].to_vec();
        let value =
            encoded[HEADER_SIZE + key_size as usize..HEADER_SIZE + key_size as usize + value_size as usize]
                .to_vec();

        assert!(Record::finish_decode(crc, tstamp, key, value).is_err());
    }

    #[test]
    fn rejects_oversized_key() {
        let key = vec![0u8; MAX_KEY_SIZE + 1];
        assert!(matches!(
            Record::new(0, key, Vec::new()),
            Err(Error::InvalidKeySize)
        ));
    }

    #[test]
    fn rejects_oversized_value() {
        let value = vec![0u8; MAX_VALUE_SIZE + 1];
        assert!(matches!(
            Record::new(0, Vec::new(), value),
            Err(Error::InvalidValueSize)
        ));
    }

    #[test]
    fn empty_value_is_tombstone() {
        let record = Record::new(0, b"k".to_vec(), Vec::new()).unwrap();
        assert!(record.is_tombstone());
    }
}
