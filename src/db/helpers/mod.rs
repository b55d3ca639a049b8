use std::convert::TryFrom;

use anyhow::{anyhow, Result};

use crate::models::SampleSource;

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}

pub fn parse_source(value: &str) -> Result<SampleSource> {
    match value {
        "foreground" => Ok(SampleSource::Foreground),
        "background" => Ok(SampleSource::Background),
        other => Err(anyhow!("unknown sample source {other}")),
    }
}
