//! Property block: standard table statistics plus user-collected properties.
//!
//! ```text
//! num_entries:         u64
//! num_range_deletions: u64
//! raw_key_size:        u64
//! raw_value_size:      u64
//! data_size:           u64   (value-store extent at the start of the file)
//! index_size:          u64
//! comparator_name:     varint len + bytes
//! user properties:     varint count, then per entry
//!                      varint key_len + key, varint value_len + value
//! ```
//!
//! User-property values are raw bytes: the external-SST properties carry
//! fixed-width little-endian integers, not decimal strings.

use super::varint::{read_varint, write_varint};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use ziptable_core::MAX_SEQUENCE_NUMBER;

/// External-SST version property; a value >= 2 means the file carries a
/// global sequence number.
pub const PROP_EXTERNAL_SST_VERSION: &str = "rocksdb.external_sst_file.version";

/// Global sequence number of an externally ingested file, 8 bytes LE.
pub const PROP_GLOBAL_SEQNO: &str = "rocksdb.external_sst_file.global_seqno";

/// Build timestamp in decimal milliseconds; consumed by the compression
/// probe only.
pub const PROP_BUILD_TIMESTAMP: &str = "ziptable.build_timestamp";

/// Standard and user-collected table properties.
#[derive(Debug, Clone, Default)]
pub struct TableProperties {
    pub num_entries: u64,
    pub num_range_deletions: u64,
    pub raw_key_size: u64,
    pub raw_value_size: u64,
    pub data_size: u64,
    pub index_size: u64,
    pub comparator_name: String,
    pub user_collected: BTreeMap<String, Vec<u8>>,
}

impl TableProperties {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.num_entries.to_le_bytes());
        buf.extend_from_slice(&self.num_range_deletions.to_le_bytes());
        buf.extend_from_slice(&self.raw_key_size.to_le_bytes());
        buf.extend_from_slice(&self.raw_value_size.to_le_bytes());
        buf.extend_from_slice(&self.data_size.to_le_bytes());
        buf.extend_from_slice(&self.index_size.to_le_bytes());
        write_varint(self.comparator_name.len() as u64, &mut buf);
        buf.extend_from_slice(self.comparator_name.as_bytes());
        write_varint(self.user_collected.len() as u64, &mut buf);
        for (k, v) in &self.user_collected {
            write_varint(k.len() as u64, &mut buf);
            buf.extend_from_slice(k.as_bytes());
            write_varint(v.len() as u64, &mut buf);
            buf.extend_from_slice(v);
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 48 {
            return Err(Error::corruption(format!(
                "property block too small: {} bytes",
                buf.len()
            )));
        }
        let mut props = TableProperties {
            num_entries: super::read_u64_le(buf, 0),
            num_range_deletions: super::read_u64_le(buf, 8),
            raw_key_size: super::read_u64_le(buf, 16),
            raw_value_size: super::read_u64_le(buf, 24),
            data_size: super::read_u64_le(buf, 32),
            index_size: super::read_u64_le(buf, 40),
            ..Default::default()
        };
        let mut pos = 48;
        let take = |buf: &[u8], pos: &mut usize, len: usize, what: &str| -> Result<Vec<u8>> {
            if *pos + len > buf.len() {
                return Err(Error::corruption(format!("property block: {what} truncated")));
            }
            let out = buf[*pos..*pos + len].to_vec();
            *pos += len;
            Ok(out)
        };
        let name_len = read_varint(buf, &mut pos)
            .map_err(|e| Error::corruption(format!("property block: {e}")))?
            as usize;
        props.comparator_name = String::from_utf8(take(buf, &mut pos, name_len, "comparator name")?)
            .map_err(|_| Error::corruption("property block: comparator name is not UTF-8"))?;
        let count = read_varint(buf, &mut pos)
            .map_err(|e| Error::corruption(format!("property block: {e}")))?;
        for _ in 0..count {
            let klen = read_varint(buf, &mut pos)
                .map_err(|e| Error::corruption(format!("property block: {e}")))?
                as usize;
            let key = String::from_utf8(take(buf, &mut pos, klen, "user property key")?)
                .map_err(|_| Error::corruption("property block: user property key is not UTF-8"))?;
            let vlen = read_varint(buf, &mut pos)
                .map_err(|e| Error::corruption(format!("property block: {e}")))?
                as usize;
            let value = take(buf, &mut pos, vlen, "user property value")?;
            props.user_collected.insert(key, value);
        }
        Ok(props)
    }

    /// Global sequence number for an externally ingested file, or `None` when
    /// the file does not carry one. Inconsistent property combinations are
    /// tolerated with a warning, matching how ingested files from older
    /// writers behave.
    pub fn global_sequence_number(&self) -> Option<u64> {
        let version = self.user_collected.get(PROP_EXTERNAL_SST_VERSION);
        let seqno = self.user_collected.get(PROP_GLOBAL_SEQNO);

        let Some(version) = version else {
            if seqno.is_some() {
                tracing::warn!("non-external table carries a global_seqno property; ignoring");
            }
            return None;
        };
        if version.len() < 4 {
            tracing::warn!("external_sst_file.version property is malformed; ignoring");
            return None;
        }
        let version = u32::from_le_bytes(version[..4].try_into().unwrap());
        if version < 2 {
            if seqno.is_some() || version != 1 {
                tracing::warn!(version, "v1 external table carries a global_seqno property; ignoring");
            }
            return None;
        }
        let Some(seqno) = seqno else {
            tracing::warn!(version, "external table is missing its global_seqno property");
            return None;
        };
        if seqno.len() < 8 {
            tracing::warn!("global_seqno property is malformed; ignoring");
            return None;
        }
        let seqno = u64::from_le_bytes(seqno[..8].try_into().unwrap());
        if seqno > MAX_SEQUENCE_NUMBER {
            tracing::warn!(seqno, "global_seqno exceeds the 56-bit maximum; ignoring");
            return None;
        }
        Some(seqno)
    }
}
