//! Line-oriented packet format.
//!
//! ```text
//! #dev=NQ3,sn=00000000000004D2,tick_hz=1000000     first packet only
//! T,100
//! P,3
//! D,400,65535,255
//! A,12,0,2500
//! ```
//!
//! One line per record; `T` and `P` lines carry the epoch and port
//! direction when requested. Analog values are whole millivolts.

use super::{AnalogRecord, Cursor, DigitalRecord, EncodeError, PacketHeader};
use crate::voltage::to_millivolts;

pub(crate) fn begin(cursor: &mut Cursor<'_>, header: &PacketHeader<'_>) -> Result<(), EncodeError> {
    if let Some(meta) = header.meta {
        cursor.format(format_args!(
            "#dev={},sn={:016X},tick_hz={}\n",
            meta.device,
            meta.serial,
            meta.reported_tick_hz()
        ))?;
    }
    if let Some(epoch) = header.timestamp() {
        cursor.format(format_args!("T,{epoch}\n"))?;
    }
    if let Some(direction) = header.direction() {
        cursor.format(format_args!("P,{direction}\n"))?;
    }
    Ok(())
}

pub(crate) fn digital(cursor: &mut Cursor<'_>, record: &DigitalRecord) -> Result<(), EncodeError> {
    cursor.format(format_args!(
        "D,{},{},{}\n",
        record.time, record.mask, record.data
    ))
}

pub(crate) fn analog(cursor: &mut Cursor<'_>, record: &AnalogRecord) -> Result<(), EncodeError> {
    cursor.format(format_args!(
        "A,{},{},{}\n",
        record.time,
        record.channel,
        to_millivolts(record.volts)
    ))
}
