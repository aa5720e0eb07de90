//! Events recorded in the transaction log and their line encoding.
//!
//! The file backend stores one event per line:
//!
//! ```text
//! <sequence>\t<PUT|DELETE>\t<key>\t<value>\n
//! ```
//!
//! The value field is empty for deletes. Backslash, tab, line feed and
//! carriage return inside keys and values are written as `\\`, `\t`, `\n`
//! and `\r` so a record never spans more than one line.

use std::{fmt, str::FromStr};

use serde::Serialize;

use crate::error::DecodeError;

const LINE_ENDINGS: &[char] = &['\n', '\r'];
const FIELD_SEPARATOR: char = '\t';
const FIELD_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Put => "PUT",
            EventKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUT" => Ok(EventKind::Put),
            "DELETE" => Ok(EventKind::Delete),
            other => Err(DecodeError::Kind(other.to_string())),
        }
    }
}

/// A key/value mutation waiting to be sequenced by the log writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mutation {
    Put { key: String, value: String },
    Delete { key: String },
}

impl Mutation {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Mutation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Mutation::Delete { key: key.into() }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Mutation::Put { .. } => EventKind::Put,
            Mutation::Delete { .. } => EventKind::Delete,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Mutation::Put { key, .. } | Mutation::Delete { key } => key,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Mutation::Put { value, .. } => Some(value),
            Mutation::Delete { .. } => None,
        }
    }

    /// Rebuilds a mutation from its stored columns, enforcing that a value is
    /// present exactly for puts.
    pub fn from_parts(
        kind: EventKind,
        key: String,
        value: Option<String>,
    ) -> Result<Self, DecodeError> {
        if key.is_empty() {
            return Err(DecodeError::EmptyKey);
        }
        match (kind, value) {
            (EventKind::Put, Some(value)) => Ok(Mutation::Put { key, value }),
            (EventKind::Put, None) => Err(DecodeError::MissingValue),
            (EventKind::Delete, None) => Ok(Mutation::Delete { key }),
            (EventKind::Delete, Some(_)) => Err(DecodeError::ValueOnDelete),
        }
    }
}

/// One persisted mutation. `sequence` is assigned by the log writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub sequence: u64,
    #[serde(flatten)]
    pub mutation: Mutation,
}

impl Event {
    pub fn new(sequence: u64, mutation: Mutation) -> Self {
        Self { sequence, mutation }
    }

    pub fn kind(&self) -> EventKind {
        self.mutation.kind()
    }

    pub fn key(&self) -> &str {
        self.mutation.key()
    }

    pub fn value(&self) -> Option<&str> {
        self.mutation.value()
    }
}

/// Encodes an event as a single newline-terminated record.
pub fn encode_line(event: &Event) -> String {
    let mut line = String::with_capacity(32 + event.key().len());
    line.push_str(&event.sequence.to_string());
    line.push(FIELD_SEPARATOR);
    line.push_str(event.kind().as_str());
    line.push(FIELD_SEPARATOR);
    escape_into(event.key(), &mut line);
    line.push(FIELD_SEPARATOR);
    if let Some(value) = event.value() {
        escape_into(value, &mut line);
    }
    line.push('\n');
    line
}

/// Decodes one record. Trailing line endings are ignored.
pub fn decode_line(line: &str) -> Result<Event, DecodeError> {
    let trimmed = line.trim_end_matches(LINE_ENDINGS);
    let fields: Vec<&str> = trimmed.split(FIELD_SEPARATOR).collect();
    if fields.len() != FIELD_COUNT {
        return Err(DecodeError::FieldCount(fields.len()));
    }

    let sequence = match fields[0].parse::<u64>() {
        Ok(sequence) if sequence > 0 && fields[0].bytes().all(|b| b.is_ascii_digit()) => {
            sequence
        }
        _ => return Err(DecodeError::Sequence(fields[0].to_string())),
    };
    let kind: EventKind = fields[1].parse()?;
    let key = unescape(fields[2])?;
    let value = match kind {
        EventKind::Put => Some(unescape(fields[3])?),
        EventKind::Delete if fields[3].is_empty() => None,
        EventKind::Delete => return Err(DecodeError::ValueOnDelete),
    };

    let mutation = Mutation::from_parts(kind, key, value)?;
    Ok(Event::new(sequence, mutation))
}

fn escape_into(raw: &str, out: &mut String) {
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
}

fn unescape(field: &str) -> Result<String, DecodeError> {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            _ => return Err(DecodeError::Escape(field.to_string())),
        }
    }
    Ok(out)
}
