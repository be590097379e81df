//! Accounting file stream parser
//!
//! Models a growing accounting log as a restartable source of raw records.
//! Each record is one newline-terminated line of double-quoted `key=value`
//! tokens:
//!
//! ```text
//! "timestamp=2024-03-01 10:42:00" "userFQAN=/atlas" "lrmsID=42" ...
//! ```
//!
//! Resumability works by record count, not byte offset: every invocation
//! reads the file from the start and skips the `offset` complete lines
//! already emitted. Acceptable because the files are append-only and
//! bounded in daily size, and it makes restart state trivial (no byte
//! offsets to persist or invalidate on rotation).
//!
//! A trailing line without a newline is an unflushed write; it is stashed
//! in the watch-state buffer and nothing is emitted for it. The next
//! modification event re-reads it in full, prefix included, so the record
//! is emitted exactly once.

use batchacct_common::value::{
    RawRecord, RawValue, ACCT_DATETIME_FMT, FIELD_LRMS_ID, FIELD_TIMESTAMP, FIELD_USER_FQAN,
};
use chrono::NaiveDateTime;
use regex::Regex;
use std::io::BufRead;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::warn;

/// Per-watched-file parser state. Owned by the watch loop and threaded
/// through each invocation; survives restarts by replaying the file from
/// the start.
#[derive(Debug, Clone, Default)]
pub struct WatchState {
    /// Number of complete lines already consumed (emitted or skipped as
    /// malformed). Only advances on a confirmed full line.
    pub offset: u64,
    /// Trailing partial line awaiting its newline.
    pub buf: String,
}

/// Record-local parse failures. The line is consumed and skipped; the
/// batch continues.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("field '{field}': expected an integer, got '{value}'")]
    BadInt { field: String, value: String },

    #[error("field '{field}': expected '{ACCT_DATETIME_FMT}' datetime, got '{value}'")]
    BadTimestamp { field: String, value: String },
}

// The pattern is a literal and compiles unconditionally.
#[allow(clippy::expect_used)]
fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""(\w+=.*?)""#).expect("literal pattern"))
}

/// Read all newly available complete records, starting after the
/// already-consumed prefix recorded in `state`.
///
/// Returns the records in file order. Stops without error at the first
/// incomplete line or at end of input; callers re-invoke on the next
/// file-modification notification. Malformed lines are logged, counted
/// into the offset, and skipped.
///
/// A read error after the skip phase also stops the pass without error:
/// the records parsed so far are delivered (their offset is spent) and
/// the failed line is retried on the next pass. Only a failure while
/// skipping the already-consumed prefix propagates, since nothing has
/// been parsed yet.
pub fn parse_records<R: BufRead>(
    reader: &mut R,
    state: &mut WatchState,
) -> std::io::Result<Vec<RawRecord>> {
    let mut line = String::new();

    // Skip what we've already processed. Previously consumed lines are
    // complete by construction, so a short file just means nothing new.
    for _ in 0..state.offset {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(Vec::new());
        }
    }

    let mut records = Vec::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {},
            Err(e) => {
                // The offset has already advanced for the records parsed
                // this pass, so they must reach the caller. The failed
                // line is re-read on the next pass.
                warn!(error = %e, "Read failed mid-pass, delivering records parsed so far");
                break;
            },
        }
        if !line.ends_with('\n') {
            // Unflushed write: buffer it and wait for the writer. The next
            // invocation replays from the start and sees the whole line.
            state.buf = line.clone();
            break;
        }

        state.buf.clear();
        match parse_line(&line) {
            Ok(record) => {
                state.offset += 1;
                records.push(record);
            },
            Err(e) => {
                state.offset += 1;
                warn!(error = %e, "Skipping malformed accounting line");
            },
        }
    }

    Ok(records)
}

/// Parse one complete accounting line into a raw record.
///
/// Repeated FQAN fields accumulate space-joined in first-seen order; the
/// timestamp field is parsed to epoch seconds; the LRMS id must be an
/// integer or the whole record fails.
pub fn parse_line(line: &str) -> Result<RawRecord, ParseError> {
    let mut record = RawRecord::new();

    for caps in token_regex().captures_iter(line) {
        let token = &caps[1];
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };

        match key {
            FIELD_USER_FQAN => match record.get_mut(FIELD_USER_FQAN) {
                Some(RawValue::Text(existing)) => {
                    existing.push(' ');
                    existing.push_str(value);
                },
                _ => {
                    record.insert(key.to_string(), RawValue::text(value));
                },
            },
            FIELD_TIMESTAMP => {
                let dt = NaiveDateTime::parse_from_str(value, ACCT_DATETIME_FMT).map_err(|_| {
                    ParseError::BadTimestamp { field: key.to_string(), value: value.to_string() }
                })?;
                record.insert(key.to_string(), RawValue::Int(dt.and_utc().timestamp()));
            },
            FIELD_LRMS_ID => {
                let id = value.parse::<i64>().map_err(|_| ParseError::BadInt {
                    field: key.to_string(),
                    value: value.to_string(),
                })?;
                record.insert(key.to_string(), RawValue::Int(id));
            },
            _ => {
                record.insert(key.to_string(), RawValue::text(value));
            },
        }
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const LINE: &str = "\"timestamp=1970-10-10 10:42:00\" \"userDN=x\" \"userFQAN=a\" \
                        \"ceID=c1\" \"jobID=j1\" \"lrmsID=42\" \"localUser=u\"\n";

    #[test]
    fn test_parse_line_types() {
        let rec = parse_line(LINE).unwrap();
        assert_eq!(rec.get("lrmsID"), Some(&RawValue::Int(42)));
        let expected = NaiveDateTime::parse_from_str("1970-10-10 10:42:00", ACCT_DATETIME_FMT)
            .unwrap()
            .and_utc()
            .timestamp();
        assert_eq!(rec.get("timestamp"), Some(&RawValue::Int(expected)));
        assert_eq!(rec.get("userDN"), Some(&RawValue::text("x")));
    }

    #[test]
    fn test_repeated_fqan_accumulates_in_order() {
        let line = "\"userFQAN=/atlas/Role=pilot\" \"userFQAN=/atlas\" \"lrmsID=1\"\n";
        let rec = parse_line(line).unwrap();
        assert_eq!(rec.get("userFQAN"), Some(&RawValue::text("/atlas/Role=pilot /atlas")));
    }

    #[test]
    fn test_bad_lrms_id_fails_record() {
        let line = "\"lrmsID=abc\" \"queue=short\"\n";
        assert!(matches!(parse_line(line), Err(ParseError::BadInt { .. })));
    }

    #[test]
    fn test_incomplete_line_is_buffered() {
        let mut state = WatchState::default();
        let mut cursor = Cursor::new(&LINE.as_bytes()[..40]);
        let records = parse_records(&mut cursor, &mut state).unwrap();
        assert!(records.is_empty());
        assert_eq!(state.offset, 0);
        assert!(!state.buf.is_empty());
    }

    #[test]
    fn test_completed_line_emits_exactly_once() {
        let mut state = WatchState::default();

        // First pass: the writer flushed only the first 40 bytes.
        let mut partial = Cursor::new(&LINE.as_bytes()[..40]);
        assert!(parse_records(&mut partial, &mut state).unwrap().is_empty());

        // Second pass re-reads from the start, line now complete.
        let mut full = Cursor::new(LINE.as_bytes());
        let records = parse_records(&mut full, &mut state).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("lrmsID"), Some(&RawValue::Int(42)));
        assert_eq!(state.offset, 1);
        assert!(state.buf.is_empty());

        // Nothing further: an immediate re-read yields zero records.
        let mut again = Cursor::new(LINE.as_bytes());
        assert!(parse_records(&mut again, &mut state).unwrap().is_empty());
    }

    #[test]
    fn test_replay_from_zero_is_deterministic() {
        let data = format!("{}{}", LINE, LINE.replace("lrmsID=42", "lrmsID=43"));

        let mut first_state = WatchState::default();
        let first = parse_records(&mut Cursor::new(data.as_bytes()), &mut first_state).unwrap();

        let mut second_state = WatchState::default();
        let second = parse_records(&mut Cursor::new(data.as_bytes()), &mut second_state).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    /// Serves its data, then fails every read after exhaustion instead of
    /// reporting end of input.
    struct FailingReader {
        data: Cursor<Vec<u8>>,
    }

    impl std::io::Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.data.read(buf)?;
            if n == 0 {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk error"))
            } else {
                Ok(n)
            }
        }
    }

    #[test]
    fn test_read_error_still_delivers_parsed_records() {
        let reader = FailingReader { data: Cursor::new(LINE.as_bytes().to_vec()) };
        let mut reader = std::io::BufReader::new(reader);
        let mut state = WatchState::default();

        // The line parses before the error surfaces; it must not be lost.
        let records = parse_records(&mut reader, &mut state).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("lrmsID"), Some(&RawValue::Int(42)));
        assert_eq!(state.offset, 1);

        // A healthy replay skips the delivered record and yields nothing.
        let mut again = Cursor::new(LINE.as_bytes());
        assert!(parse_records(&mut again, &mut state).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_line_consumed_and_skipped() {
        let data = format!("\"lrmsID=oops\"\n{}", LINE);
        let mut state = WatchState::default();
        let records = parse_records(&mut Cursor::new(data.as_bytes()), &mut state).unwrap();
        assert_eq!(records.len(), 1);
        // Both lines consumed; the malformed one is never retried.
        assert_eq!(state.offset, 2);
    }
}
