//! Delimited text form of the interaction log.
//!
//! ```text
//! sequenceNumber,timestamp,items,desiredOutcome,predictedOutcome,satisfied,latencyMs
//! 1,2025-01-01T12:00:00+00:00,A;B;B,C,D,false,0.42
//! ```

use crate::types::{Code, InteractionRecord, Result, SimulatorError};
use chrono::{DateTime, Utc};

pub const HEADER: &str =
    "sequenceNumber,timestamp,items,desiredOutcome,predictedOutcome,satisfied,latencyMs";

const FIELD_SEPARATOR: char = ',';
const ITEM_SEPARATOR: char = ';';
const FIELD_COUNT: usize = 7;

pub fn encode_row(record: &InteractionRecord) -> String {
    let items = record
        .items
        .iter()
        .map(Code::as_str)
        .collect::<Vec<_>>()
        .join(&ITEM_SEPARATOR.to_string());

    format!(
        "{},{},{},{},{},{},{}",
        record.sequence_number,
        record.timestamp.to_rfc3339(),
        items,
        record.desired_outcome,
        record.predicted_outcome,
        record.satisfied,
        record.latency_ms
    )
}

pub fn encode(records: &[InteractionRecord]) -> String {
    let mut out = String::with_capacity(HEADER.len() + 1 + records.len() * 64);
    out.push_str(HEADER);
    out.push('\n');
    for record in records {
        out.push_str(&encode_row(record));
        out.push('\n');
    }
    out
}

pub fn decode(blob: &str) -> Result<Vec<InteractionRecord>> {
    let mut lines = blob.lines().enumerate();

    match lines.next() {
        Some((_, header)) if header.trim() == HEADER => {}
        Some((_, other)) => {
            return Err(codec_error(1, format!("unexpected header {:?}", other)));
        }
        None => return Ok(Vec::new()),
    }

    let mut records = Vec::new();
    for (index, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        records.push(decode_row(line, index + 1)?);
    }
    Ok(records)
}

fn decode_row(line: &str, line_no: usize) -> Result<InteractionRecord> {
    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
    if fields.len() != FIELD_COUNT {
        return Err(codec_error(
            line_no,
            format!("expected {} fields, found {}", FIELD_COUNT, fields.len()),
        ));
    }

    let sequence_number = fields[0]
        .parse::<u64>()
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| codec_error(line_no, format!("bad sequence number {:?}", fields[0])))?;

    let timestamp = DateTime::parse_from_rfc3339(fields[1])
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| codec_error(line_no, format!("bad timestamp {:?}: {}", fields[1], e)))?;

    let items = if fields[2].is_empty() {
        Vec::new()
    } else {
        fields[2]
            .split(ITEM_SEPARATOR)
            .map(|item| parse_code(item, line_no))
            .collect::<Result<Vec<_>>>()?
    };

    let desired_outcome = parse_code(fields[3], line_no)?;
    let predicted_outcome = parse_code(fields[4], line_no)?;

    let satisfied = match fields[5] {
        "true" => true,
        "false" => false,
        other => return Err(codec_error(line_no, format!("bad satisfied flag {:?}", other))),
    };

    let latency_ms = fields[6]
        .parse::<f64>()
        .ok()
        .filter(|l| l.is_finite() && *l >= 0.0)
        .ok_or_else(|| codec_error(line_no, format!("bad latency {:?}", fields[6])))?;

    Ok(InteractionRecord {
        sequence_number,
        timestamp,
        items,
        desired_outcome,
        predicted_outcome,
        latency_ms,
        satisfied,
    })
}

fn parse_code(value: &str, line_no: usize) -> Result<Code> {
    Code::new(value).map_err(|e| codec_error(line_no, e.to_string()))
}

fn codec_error(line: usize, reason: String) -> SimulatorError {
    SimulatorError::Codec { line, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(seq: u64) -> InteractionRecord {
        InteractionRecord {
            sequence_number: seq,
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap(),
            items: vec![Code::new("B").unwrap(), Code::new("A").unwrap()],
            desired_outcome: Code::new("C").unwrap(),
            predicted_outcome: Code::new("C").unwrap(),
            latency_ms: 0.25,
            satisfied: true,
        }
    }

    #[test]
    fn header_and_rows_decode_back() {
        let blob = encode(&[record(1), record(2)]);
        assert!(blob.starts_with(HEADER));
        assert_eq!(blob.lines().nth(1), Some("1,2025-03-01T09:30:00+00:00,B;A,C,C,true,0.25"));

        assert_eq!(decode(&blob).unwrap(), vec![record(1), record(2)]);
    }

    #[test]
    fn empty_blob_is_empty_log() {
        assert!(decode("").unwrap().is_empty());
        assert!(decode(&encode(&[])).unwrap().is_empty());
    }

    #[test]
    fn foreign_header_is_rejected() {
        assert!(matches!(decode("orderNumber,order\n1,A"), Err(SimulatorError::Codec { line: 1, .. })));
    }

    #[test]
    fn malformed_row_reports_its_line() {
        let blob = format!("{}\n{}\n1,not-a-time,A,B,B,true,1\n", HEADER, encode_row(&record(1)));
        assert!(matches!(decode(&blob), Err(SimulatorError::Codec { line: 3, .. })));
    }
}
