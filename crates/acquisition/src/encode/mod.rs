//! Wire packet encoders.
//!
//! Every format is written through one [`PacketWriter`] with the same shape:
//! `begin` (optional session metadata plus the packet header), any number of
//! digital records, then any number of analog records, then `finish`. Each
//! record is written transactionally: if it does not fit the remaining
//! budget it is rolled back and [`EncodeError::Full`] is returned, leaving
//! the packet well-formed so the caller can finish it and carry the record
//! over to the next packet.
//!
//! Space for the closing bytes (JSON brackets, binary CRC) is reserved at
//! `begin`, so `finish` cannot fail for lack of room.

pub mod binary;
pub mod csv;
pub mod json;

pub use binary::{BinaryPacket, DecodeError, Record, WireHeader, WireMeta};

use core::fmt;

use thiserror_no_std::Error;

// ── Packet description ──────────────────────────────────────────────────────

/// Wire format of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Encoding {
    /// Human-readable structured text.
    #[default]
    Json,
    /// Compact framed postcard records.
    Binary,
    /// One comma-separated line per record.
    Csv,
}

impl Encoding {
    /// Short label for log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Binary => "binary",
            Self::Csv => "csv",
        }
    }
}

/// Packet field a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Session trigger epoch.
    Timestamp,
    /// Digital port samples.
    DigitalIn,
    /// Analog samples.
    AnalogIn,
    /// Digital port direction mask.
    DigitalPortDir,
    /// Any field this encoder does not produce; skipped.
    Other(u8),
}

impl Field {
    const fn bit(self) -> u8 {
        match self {
            Self::Timestamp => 1 << 0,
            Self::DigitalIn => 1 << 1,
            Self::AnalogIn => 1 << 2,
            Self::DigitalPortDir => 1 << 3,
            Self::Other(_) => 0,
        }
    }
}

/// Set of requested [`Field`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSet {
    bits: u8,
}

impl Default for FieldSet {
    fn default() -> Self {
        Self::ALL
    }
}

impl FieldSet {
    /// Every field this encoder knows.
    pub const ALL: Self = Self { bits: 0x0F };

    /// Nothing requested.
    pub const NONE: Self = Self { bits: 0 };

    /// Build from a client request. Unknown fields are dropped silently.
    pub fn from_fields(fields: &[Field]) -> Self {
        let bits = fields.iter().fold(0u8, |bits, field| bits | field.bit());
        Self { bits }
    }

    /// Whether `field` was requested.
    pub const fn contains(self, field: Field) -> bool {
        let bit = field.bit();
        bit != 0 && self.bits & bit == bit
    }
}

/// Device description sent once at the start of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionMeta {
    /// Product name.
    pub device: &'static str,
    /// Serial number.
    pub serial: u64,
    /// Timestamp counter frequency. `0` is reported as 1 MHz.
    pub tick_hz: u32,
}

impl SessionMeta {
    /// Tick rate reported on the wire.
    pub const fn reported_tick_hz(&self) -> u32 {
        if self.tick_hz == 0 {
            1_000_000
        } else {
            self.tick_hz
        }
    }
}

/// Fixed part of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader<'m> {
    /// Session trigger epoch; record times are relative to it.
    pub epoch: u32,
    /// Digital port direction mask, when digital data is waiting.
    pub port_direction: Option<u32>,
    /// Fields the client asked for.
    pub fields: FieldSet,
    /// Session metadata, first packet of a session only.
    pub meta: Option<&'m SessionMeta>,
}

impl PacketHeader<'_> {
    /// Epoch if the timestamp field was requested.
    pub fn timestamp(&self) -> Option<u32> {
        self.fields
            .contains(Field::Timestamp)
            .then_some(self.epoch)
    }

    /// Direction mask if requested and present.
    pub fn direction(&self) -> Option<u32> {
        if self.fields.contains(Field::DigitalPortDir) {
            self.port_direction
        } else {
            None
        }
    }
}

/// One digital sample, time already relative to the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitalRecord {
    /// Ticks since the epoch.
    pub time: u32,
    /// Pins represented.
    pub mask: u32,
    /// Pin levels.
    pub data: u32,
}

/// One converted analog sample, time already relative to the epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalogRecord {
    /// Ticks since the epoch.
    pub time: u32,
    /// Logical channel id.
    pub channel: u8,
    /// Raw converter code.
    pub raw: u32,
    /// Engineering value in volts.
    pub volts: f64,
}

/// Encoder failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodeError {
    /// The item does not fit the remaining packet budget.
    #[error("packet budget exhausted")]
    Full,
    /// Digital record after analog records in the same packet.
    #[error("digital records must precede analog records")]
    OutOfOrder,
}

// ── Output cursor ───────────────────────────────────────────────────────────

/// Bounded writer over a byte buffer with rollback.
pub(crate) struct Cursor<'b> {
    buf: &'b mut [u8],
    len: usize,
    limit: usize,
}

impl<'b> Cursor<'b> {
    /// Cursor over `buf`, writing at most `limit` bytes.
    pub(crate) fn new(buf: &'b mut [u8], limit: usize) -> Self {
        let limit = limit.min(buf.len());
        Self { buf, len: 0, limit }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Hold back `bytes` of the limit. Fails if already past it.
    pub(crate) fn reserve(&mut self, bytes: usize) -> Result<(), EncodeError> {
        let limit = self.limit.checked_sub(bytes).ok_or(EncodeError::Full)?;
        if limit < self.len {
            return Err(EncodeError::Full);
        }
        self.limit = limit;
        Ok(())
    }

    /// Give back a reservation.
    pub(crate) fn release(&mut self, bytes: usize) {
        self.limit = self.limit.saturating_add(bytes).min(self.buf.len());
    }

    pub(crate) fn put(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        let end = self
            .len
            .checked_add(bytes.len())
            .filter(|end| *end <= self.limit)
            .ok_or(EncodeError::Full)?;
        let dst = self.buf.get_mut(self.len..end).ok_or(EncodeError::Full)?;
        dst.copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    /// Unused space up to the limit.
    pub(crate) fn spare_mut(&mut self) -> &mut [u8] {
        let (len, limit) = (self.len, self.limit);
        self.buf.get_mut(len..limit).unwrap_or_default()
    }

    /// Commit `bytes` written directly into [`Self::spare_mut`].
    pub(crate) fn advance(&mut self, bytes: usize) {
        self.len = self.len.saturating_add(bytes).min(self.limit);
    }

    /// Run `f` as one unit: on error nothing it wrote remains.
    pub(crate) fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EncodeError>,
    ) -> Result<T, EncodeError> {
        let mark = self.len;
        let result = f(self);
        if result.is_err() {
            self.len = mark;
        }
        result
    }

    pub(crate) fn written(&self) -> &[u8] {
        self.buf.get(..self.len).unwrap_or_default()
    }

    pub(crate) fn written_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        self.buf.get_mut(..len).unwrap_or_default()
    }

    /// `write!` into the cursor, mapping overflow to [`EncodeError::Full`].
    pub(crate) fn format(&mut self, args: fmt::Arguments<'_>) -> Result<(), EncodeError> {
        fmt::Write::write_fmt(self, args).map_err(|_| EncodeError::Full)
    }

    pub(crate) fn into_written(self) -> &'b [u8] {
        let Self { buf, len, .. } = self;
        let buf: &'b [u8] = buf;
        buf.get(..len).unwrap_or_default()
    }
}

impl fmt::Write for Cursor<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.put(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

// ── Writer ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Section {
    Header,
    Digital,
    Analog,
}

/// Builds one packet in the session's wire format.
pub struct PacketWriter<'b> {
    cursor: Cursor<'b>,
    encoding: Encoding,
    section: Section,
    records: usize,
    first_key: bool,
}

impl<'b> PacketWriter<'b> {
    /// Start a packet of at most `limit` bytes in `buf`.
    ///
    /// Fails with [`EncodeError::Full`] if not even the header fits.
    pub fn begin(
        buf: &'b mut [u8],
        limit: usize,
        encoding: Encoding,
        header: &PacketHeader<'_>,
    ) -> Result<Self, EncodeError> {
        let mut writer = Self {
            cursor: Cursor::new(buf, limit),
            encoding,
            section: Section::Header,
            records: 0,
            first_key: true,
        };
        writer.cursor.reserve(writer.trailer_len())?;
        match encoding {
            Encoding::Json => json::begin(&mut writer.cursor, header, &mut writer.first_key)?,
            Encoding::Binary => binary::begin(&mut writer.cursor, header)?,
            Encoding::Csv => csv::begin(&mut writer.cursor, header)?,
        }
        Ok(writer)
    }

    const fn trailer_len(&self) -> usize {
        match self.encoding {
            Encoding::Json => json::TRAILER_BYTES,
            Encoding::Binary => binary::TRAILER_BYTES,
            Encoding::Csv => 0,
        }
    }

    /// Records written so far.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Bytes written so far, trailer excluded.
    pub fn len(&self) -> usize {
        self.cursor.len()
    }

    /// Whether no record has been written.
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Append a digital record.
    pub fn digital(&mut self, record: &DigitalRecord) -> Result<(), EncodeError> {
        if self.section == Section::Analog {
            return Err(EncodeError::OutOfOrder);
        }
        let opening = self.section == Section::Header;
        let first_key = self.first_key;
        let encoding = self.encoding;
        self.cursor.transaction(|cursor| match encoding {
            Encoding::Json => json::digital(cursor, record, opening, first_key),
            Encoding::Binary => binary::record(cursor, &Record::from(record)),
            Encoding::Csv => csv::digital(cursor, record),
        })?;
        self.section = Section::Digital;
        self.first_key = false;
        self.records = self.records.saturating_add(1);
        Ok(())
    }

    /// Append an analog record.
    pub fn analog(&mut self, record: &AnalogRecord) -> Result<(), EncodeError> {
        let from = self.section;
        let first_key = self.first_key;
        let encoding = self.encoding;
        self.cursor.transaction(|cursor| match encoding {
            Encoding::Json => json::analog(cursor, record, from, first_key),
            Encoding::Binary => binary::record(cursor, &Record::from(record)),
            Encoding::Csv => csv::analog(cursor, record),
        })?;
        self.section = Section::Analog;
        self.first_key = false;
        self.records = self.records.saturating_add(1);
        Ok(())
    }

    /// Close the packet and return its bytes.
    pub fn finish(mut self) -> &'b [u8] {
        let trailer = self.trailer_len();
        self.cursor.release(trailer);
        // The reservation guarantees room for the trailer.
        let _ = match self.encoding {
            Encoding::Json => json::finish(&mut self.cursor, self.section),
            Encoding::Binary => binary::finish(&mut self.cursor),
            Encoding::Csv => Ok(()),
        };
        self.cursor.into_written()
    }
}
