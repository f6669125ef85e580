//! Compact binary packet format.
//!
//! ```text
//! +------+---------+-------------+---------------------------------+-----------+
//! | 0xDA | version | len (u16le) | postcard WireHeader, Record ... | crc32 le  |
//! +------+---------+-------------+---------------------------------+-----------+
//!                                 \____________ len bytes ________/
//! ```
//!
//! The CRC covers the payload only. Records are self-delimiting postcard
//! values, so a reader walks them until the payload is exhausted.

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use super::{AnalogRecord, Cursor, DigitalRecord, EncodeError, PacketHeader};

/// First byte of every frame.
pub const MAGIC: u8 = 0xDA;

/// Schema version written by this encoder.
pub const VERSION: u8 = 1;

/// Magic, version and length.
pub const HEADER_BYTES: usize = 4;

/// CRC32 trailer.
pub(crate) const TRAILER_BYTES: usize = 4;

/// Session metadata as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMeta<'a> {
    /// Product name.
    pub device: &'a str,
    /// Serial number.
    pub serial: u64,
    /// Timestamp counter frequency.
    pub tick_hz: u32,
}

/// Packet header as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireHeader<'a> {
    /// Session trigger epoch, if requested.
    pub timestamp: Option<u32>,
    /// Digital port direction mask, if requested and present.
    pub port_direction: Option<u32>,
    /// Session metadata, first packet only.
    #[serde(borrow)]
    pub meta: Option<WireMeta<'a>>,
}

/// One sample record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Record {
    /// Digital port sample.
    Digital {
        /// Ticks since the epoch.
        time: u32,
        /// Pins represented.
        mask: u32,
        /// Pin levels.
        data: u32,
    },
    /// Analog sample.
    Analog {
        /// Ticks since the epoch.
        time: u32,
        /// Logical channel id.
        channel: u8,
        /// Raw converter code.
        raw: u32,
        /// Converted value in volts.
        volts: f32,
    },
}

impl From<&DigitalRecord> for Record {
    fn from(record: &DigitalRecord) -> Self {
        Self::Digital {
            time: record.time,
            mask: record.mask,
            data: record.data,
        }
    }
}

impl From<&AnalogRecord> for Record {
    #[allow(clippy::cast_possible_truncation)] // f32 on the wire is enough for an 18-bit code
    fn from(record: &AnalogRecord) -> Self {
        Self::Analog {
            time: record.time,
            channel: record.channel,
            raw: record.raw,
            volts: record.volts as f32,
        }
    }
}

fn serialize<T: Serialize>(cursor: &mut Cursor<'_>, value: &T) -> Result<(), EncodeError> {
    let used = postcard::to_slice(value, cursor.spare_mut())
        .map_err(|_| EncodeError::Full)?
        .len();
    cursor.advance(used);
    Ok(())
}

pub(crate) fn begin(cursor: &mut Cursor<'_>, header: &PacketHeader<'_>) -> Result<(), EncodeError> {
    cursor.put(&[MAGIC, VERSION, 0, 0])?;
    let wire = WireHeader {
        timestamp: header.timestamp(),
        port_direction: header.direction(),
        meta: header.meta.map(|meta| WireMeta {
            device: meta.device,
            serial: meta.serial,
            tick_hz: meta.reported_tick_hz(),
        }),
    };
    serialize(cursor, &wire)
}

pub(crate) fn record(cursor: &mut Cursor<'_>, record: &Record) -> Result<(), EncodeError> {
    serialize(cursor, record)
}

pub(crate) fn finish(cursor: &mut Cursor<'_>) -> Result<(), EncodeError> {
    let payload_len = cursor.len().saturating_sub(HEADER_BYTES);
    let len = u16::try_from(payload_len).map_err(|_| EncodeError::Full)?;
    let crc = {
        let payload = cursor.written().get(HEADER_BYTES..).ok_or(EncodeError::Full)?;
        crc32fast::hash(payload)
    };
    let len_field = cursor
        .written_mut()
        .get_mut(2..HEADER_BYTES)
        .ok_or(EncodeError::Full)?;
    len_field.copy_from_slice(&len.to_le_bytes());
    cursor.put(&crc.to_le_bytes())
}

// ── Decoding ────────────────────────────────────────────────────────────────

/// Frame rejected by [`BinaryPacket::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// First byte is not [`MAGIC`].
    #[error("bad frame magic")]
    BadMagic,
    /// Schema version this decoder does not know.
    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u8),
    /// Input ends before the frame does.
    #[error("frame truncated")]
    Truncated,
    /// CRC mismatch.
    #[error("frame checksum mismatch")]
    Checksum,
    /// Payload is not valid postcard.
    #[error("malformed payload")]
    Postcard,
}

/// A decoded, checksum-verified frame.
#[derive(Debug, Clone, Copy)]
pub struct BinaryPacket<'a> {
    /// Packet header.
    pub header: WireHeader<'a>,
    records: &'a [u8],
}

impl<'a> BinaryPacket<'a> {
    /// Decode the frame at the start of `bytes`, returning it and the bytes
    /// that follow it.
    pub fn parse(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), DecodeError> {
        let (&magic, rest) = bytes.split_first().ok_or(DecodeError::Truncated)?;
        if magic != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        let (&version, rest) = rest.split_first().ok_or(DecodeError::Truncated)?;
        if version != VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let len_bytes = rest.get(..2).ok_or(DecodeError::Truncated)?;
        let len = usize::from(u16::from_le_bytes([
            len_bytes.first().copied().unwrap_or(0),
            len_bytes.get(1).copied().unwrap_or(0),
        ]));
        let rest = rest.get(2..).ok_or(DecodeError::Truncated)?;
        let payload = rest.get(..len).ok_or(DecodeError::Truncated)?;
        let crc_end = len.checked_add(TRAILER_BYTES).ok_or(DecodeError::Truncated)?;
        let crc_bytes = rest.get(len..crc_end).ok_or(DecodeError::Truncated)?;
        let mut crc = [0u8; TRAILER_BYTES];
        crc.copy_from_slice(crc_bytes);
        if u32::from_le_bytes(crc) != crc32fast::hash(payload) {
            return Err(DecodeError::Checksum);
        }

        let (header, records) =
            postcard::take_from_bytes::<WireHeader<'a>>(payload).map_err(|_| DecodeError::Postcard)?;
        let tail = rest.get(crc_end..).unwrap_or_default();
        Ok((Self { header, records }, tail))
    }

    /// Records in the frame, in write order.
    pub fn records(&self) -> Records<'a> {
        Records { rest: self.records }
    }
}

/// Iterator over the records of a [`BinaryPacket`].
#[derive(Debug, Clone)]
pub struct Records<'a> {
    rest: &'a [u8],
}

impl Iterator for Records<'_> {
    type Item = Result<Record, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match postcard::take_from_bytes::<Record>(self.rest) {
            Ok((record, rest)) => {
                self.rest = rest;
                Some(Ok(record))
            }
            Err(_) => {
                self.rest = &[];
                Some(Err(DecodeError::Postcard))
            }
        }
    }
}
