use crate::prelude::*;

use crate::solarmax::frame::RawReply;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// A normalized field value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Scaled physical value (volts, amps, watts, kWh, Hz).
    Float(f64),
    Integer(u64),
    /// `SYS`: (status code, sub code).
    Status(u32, u32),
    /// `SDAT`/`FDAT`: inverter-local date and time.
    Timestamp(NaiveDateTime),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<u64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_status(&self) -> Option<(u32, u32)> {
        match self {
            FieldValue::Status(code, sub) => Some((*code, *sub)),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }
}

/// A decoded reply with every field normalized.
///
/// Fields that fail to normalize land in `errors` and are left out of
/// `values`; they never fail the response as a whole.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Response {
    pub inverter: u8,
    #[serde(skip)]
    pub command: CommandType,
    pub values: BTreeMap<Field, FieldValue>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<Field, NormalizeError>,
}

impl Response {
    pub fn from_raw(raw: RawReply) -> Self {
        let mut values = BTreeMap::new();
        let mut errors = BTreeMap::new();

        for (field, value) in raw.values {
            match normalize(field, &value) {
                Ok(v) => {
                    values.insert(field, v);
                }
                Err(e) => {
                    errors.insert(field, e);
                }
            }
        }

        Self {
            inverter: raw.inverter,
            command: raw.command,
            values,
            errors,
        }
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.values.get(&field)
    }

    pub fn error(&self, field: Field) -> Option<&NormalizeError> {
        self.errors.get(&field)
    }
}

/// Convert a raw hex string from the wire into its typed value.
pub fn normalize(field: Field, raw: &str) -> Result<FieldValue, NormalizeError> {
    use Field::*;

    let fail = |reason: String| NormalizeError {
        field: field.to_string(),
        raw: raw.to_string(),
        reason,
    };

    match field {
        Kdy | Ul1 | Udc => scaled(raw, 10.0).map_err(fail),
        Il1 | Idc | Tnf => scaled(raw, 100.0).map_err(fail),
        Pac | Pin => scaled(raw, 2.0).map_err(fail),
        Sys => status(raw).map_err(fail),
        Sdat | Fdat => timestamp(raw).map_err(fail),
        // SAL is an alarm bitmask; everything else is a plain counter
        _ => hex(raw).map(FieldValue::Integer).map_err(fail),
    }
}

fn hex(raw: &str) -> Result<u64, String> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err("not a hex number".to_string());
    }
    u64::from_str_radix(raw, 16).map_err(|e| e.to_string())
}

fn hex32(raw: &str) -> Result<u32, String> {
    u32::try_from(hex(raw)?).map_err(|e| e.to_string())
}

fn scaled(raw: &str, divisor: f64) -> Result<FieldValue, String> {
    Ok(FieldValue::Float(hex(raw)? as f64 / divisor))
}

fn status(raw: &str) -> Result<FieldValue, String> {
    let (code, sub) = raw
        .split_once(',')
        .ok_or_else(|| "expected two comma separated values".to_string())?;

    Ok(FieldValue::Status(hex32(code)?, hex32(sub)?))
}

// <year><MM><DD>,<seconds since midnight>, all hex; e.g. 7DA0A1F,B3B0
fn timestamp(raw: &str) -> Result<FieldValue, String> {
    let (date, seconds) = raw
        .split_once(',')
        .ok_or_else(|| "expected date and time separated by a comma".to_string())?;

    if date.len() < 5 || !date.is_ascii() {
        return Err(format!("date {:?} too short", date));
    }
    let split = date.len() - 4;
    let year = hex32(&date[..split])?;
    let month = hex32(&date[split..split + 2])?;
    let day = hex32(&date[split + 2..])?;

    let seconds = hex32(seconds)?;
    if seconds >= SECONDS_PER_DAY {
        return Err(format!("{} seconds is past midnight", seconds));
    }

    let year = i32::try_from(year).map_err(|e| e.to_string())?;
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(seconds / 3600, (seconds % 3600) / 60, seconds % 60))
        .map(FieldValue::Timestamp)
        .ok_or_else(|| format!("invalid date {}-{}-{}", year, month, day))
}
