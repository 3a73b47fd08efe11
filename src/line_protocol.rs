//! InfluxDB Line Protocol encoding.
//!
//! Line Protocol format:
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp
//! ```
//!
//! Every field this agent writes is an unsigned counter.
//!
//! See: <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>

use crate::error::PointError;
use crate::models::domain::Batch;
use crate::models::dto::{UsagePoint, MEASUREMENT};

/// How unsigned fields are spelled on the wire.
///
/// 1.x servers reject the `u` suffix unless built with unsigned support, so
/// they get `i` and anything above `i64::MAX` is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsignedEncoding {
    Native,
    Signed,
}

impl UnsignedEncoding {
    fn encode(self, key: &str, value: u64) -> Result<String, PointError> {
        match self {
            UnsignedEncoding::Native => Ok(format!("{}u", value)),
            UnsignedEncoding::Signed => {
                let signed = i64::try_from(value).map_err(|_| PointError::IntegerOverflow {
                    field: key.to_string(),
                    value,
                })?;
                Ok(format!("{}i", signed))
            }
        }
    }
}

/// One point, validated and encoded on [`Point::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, u64)>,
    timestamp: i64,
}

impl Point {
    /// `timestamp` is in whatever precision the write request declares.
    pub fn new(measurement: impl Into<String>, timestamp: i64) -> Self {
        Point {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: u64) -> Self {
        self.fields.push((key.into(), value));
        self
    }

    pub fn encode(&self, unsigned: UnsignedEncoding) -> Result<String, PointError> {
        let mut line = escape_measurement(&self.measurement);

        // Tags sorted by key for canonical form
        let mut sorted_tags: Vec<_> = self.tags.iter().collect();
        sorted_tags.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in sorted_tags {
            if value.is_empty() {
                return Err(PointError::EmptyTagValue(key.clone()));
            }
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        line.push(' ');
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&unsigned.encode(key, *value)?);
        }

        line.push(' ');
        line.push_str(&self.timestamp.to_string());

        Ok(line)
    }
}

/// Builds the `usage` point for one classified flow.
pub fn usage_point(usage: &UsagePoint, timestamp_micros: i64) -> Point {
    Point::new(MEASUREMENT, timestamp_micros)
        .tag("ip", usage.ip.as_str())
        .tag("direction", usage.direction)
        .field("bytes", usage.bytes)
        .field("packets", usage.packets)
}

/// Usage points for a whole batch, in batch order, all stamped with the batch time.
pub fn batch_points(batch: &Batch) -> Vec<Point> {
    let ts = batch.timestamp_micros();
    batch
        .points
        .iter()
        .map(|p| usage_point(&UsagePoint::from(p), ts))
        .collect()
}

/// Spaces and commas must be escaped with backslash.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Tag keys, tag values and field keys share the same escaping rules.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
