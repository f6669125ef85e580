//! Human-readable packet format.
//!
//! ```text
//! {"meta":{"dev":"NQ3","sn":"00000000000004D2","tick_hz":1000000}}   first packet only
//! {
//! "ts":100,
//! "dir":0,
//! "di":[{"time":400,"mask":65535,"data":255}],
//! "ai":[{"time":12,"ch":0,"data":2500},{"time":12,"ch":1,"data":-120}]
//! }
//! ```
//!
//! Analog `data` is the converted value in whole millivolts.

use super::{AnalogRecord, Cursor, DigitalRecord, EncodeError, PacketHeader, Section};
use crate::voltage::to_millivolts;

/// Worst-case closing bytes: `]` then `\n}\n`.
pub(crate) const TRAILER_BYTES: usize = 4;

fn separator(cursor: &mut Cursor<'_>, first_key: bool) -> Result<(), EncodeError> {
    if first_key {
        Ok(())
    } else {
        cursor.put(b",\n")
    }
}

pub(crate) fn begin(
    cursor: &mut Cursor<'_>,
    header: &PacketHeader<'_>,
    first_key: &mut bool,
) -> Result<(), EncodeError> {
    if let Some(meta) = header.meta {
        cursor.format(format_args!(
            "{{\"meta\":{{\"dev\":\"{}\",\"sn\":\"{:016X}\",\"tick_hz\":{}}}}}\n",
            meta.device,
            meta.serial,
            meta.reported_tick_hz()
        ))?;
    }
    cursor.put(b"{\n")?;
    if let Some(epoch) = header.timestamp() {
        separator(cursor, *first_key)?;
        cursor.format(format_args!("\"ts\":{epoch}"))?;
        *first_key = false;
    }
    if let Some(direction) = header.direction() {
        separator(cursor, *first_key)?;
        cursor.format(format_args!("\"dir\":{direction}"))?;
        *first_key = false;
    }
    Ok(())
}

pub(crate) fn digital(
    cursor: &mut Cursor<'_>,
    record: &DigitalRecord,
    opening: bool,
    first_key: bool,
) -> Result<(), EncodeError> {
    if opening {
        separator(cursor, first_key)?;
        cursor.put(b"\"di\":[")?;
    } else {
        cursor.put(b",")?;
    }
    cursor.format(format_args!(
        "{{\"time\":{},\"mask\":{},\"data\":{}}}",
        record.time, record.mask, record.data
    ))
}

pub(crate) fn analog(
    cursor: &mut Cursor<'_>,
    record: &AnalogRecord,
    from: Section,
    first_key: bool,
) -> Result<(), EncodeError> {
    match from {
        Section::Header => {
            separator(cursor, first_key)?;
            cursor.put(b"\"ai\":[")?;
        }
        Section::Digital => cursor.put(b"],\n\"ai\":[")?,
        Section::Analog => cursor.put(b",")?,
    }
    cursor.format(format_args!(
        "{{\"time\":{},\"ch\":{},\"data\":{}}}",
        record.time,
        record.channel,
        to_millivolts(record.volts)
    ))
}

pub(crate) fn finish(cursor: &mut Cursor<'_>, section: Section) -> Result<(), EncodeError> {
    if section != Section::Header {
        cursor.put(b"]")?;
    }
    cursor.put(b"\n}\n")
}
