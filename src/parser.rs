//! Decoder for the router's `/accounting/ip.cgi` dump.
//!
//! Each line is `<src> <dst> <bytes> <packets>`; the first blank line ends
//! the data. Bad numbers become zero and bad addresses become `None`, but
//! every substitution is reported back as a [`ParseAnomaly`].
//!
//! A line holding only whitespace counts as blank and also ends the data.
//! The legacy agent stopped only on a line that was exactly empty and read
//! a line of stray spaces as a record.

use std::fmt;
use std::net::IpAddr;

use crate::models::domain::FlowEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Source,
    Destination,
    Bytes,
    Packets,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::Source => "source",
            Field::Destination => "destination",
            Field::Bytes => "bytes",
            Field::Packets => "packets",
        })
    }
}

/// A field that was missing or unparseable and got a substitute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAnomaly {
    /// 1-based line number in the dump.
    pub line: usize,
    pub field: Field,
    /// Raw text of the field, `None` when the field was absent.
    pub raw: Option<String>,
}

impl fmt::Display for ParseAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.raw {
            Some(raw) => write!(f, "line {}: invalid {} {:?}", self.line, self.field, raw),
            None => write!(f, "line {}: missing {}", self.line, self.field),
        }
    }
}

/// Output of one parse: entries in input order plus what had to be patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDump {
    pub entries: Vec<FlowEntry>,
    pub anomalies: Vec<ParseAnomaly>,
}

pub fn parse_accounting(text: &str) -> ParsedDump {
    let mut dump = ParsedDump::default();

    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            break;
        }
        let entry = parse_line(idx + 1, line, &mut dump.anomalies);
        dump.entries.push(entry);
    }

    dump
}

fn parse_line(line_no: usize, line: &str, anomalies: &mut Vec<ParseAnomaly>) -> FlowEntry {
    let mut cols = line.split_whitespace();
    let mut note = |field: Field, raw: Option<&str>| {
        anomalies.push(ParseAnomaly {
            line: line_no,
            field,
            raw: raw.map(str::to_string),
        })
    };

    let source = parse_addr(cols.next(), Field::Source, &mut note);
    let destination = parse_addr(cols.next(), Field::Destination, &mut note);
    let bytes = parse_count(cols.next(), Field::Bytes, &mut note);
    let packets = parse_count(cols.next(), Field::Packets, &mut note);

    FlowEntry {
        source,
        destination,
        bytes,
        packets,
    }
}

fn parse_addr(
    raw: Option<&str>,
    field: Field,
    note: &mut impl FnMut(Field, Option<&str>),
) -> Option<IpAddr> {
    match raw {
        Some(text) => match text.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                note(field, Some(text));
                None
            }
        },
        None => {
            note(field, None);
            None
        }
    }
}

fn parse_count(raw: Option<&str>, field: Field, note: &mut impl FnMut(Field, Option<&str>)) -> u64 {
    match raw {
        Some(text) => match text.parse() {
            Ok(n) => n,
            Err(_) => {
                note(field, Some(text));
                0
            }
        },
        None => {
            note(field, None);
            0
        }
    }
}
