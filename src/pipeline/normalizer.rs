//! Raw row cleaning.
//!
//! Turns exported log rows into `Message`s:
//! 1. Drop system-generated activation notices
//! 2. Parse timestamps (malformed rows are skipped, or fatal in strict mode)
//! 3. Derive sender role and counterparty from the participant list
//! 4. Sort globally by timestamp; threads inherit this order

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_ACTIVATION_NOTICE, DEFAULT_OPERATOR_NUMBER};
use crate::error::DataError;
use crate::pipeline::types::{Message, RawRow};

/// Separator between participant identifiers.
const PARTICIPANT_SEPARATOR: char = ',';

/// Offset-carrying formats tried after RFC 3339.
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Naive formats, interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    pub operator_number: String,
    pub activation_notices: Vec<String>,
    /// Fail on the first unparsable row instead of skipping it.
    pub strict: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            operator_number: DEFAULT_OPERATOR_NUMBER.to_string(),
            activation_notices: vec![DEFAULT_ACTIVATION_NOTICE.to_string()],
            strict: false,
        }
    }
}

/// Counts of what happened to the input rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeSummary {
    pub rows_in: usize,
    pub activation_dropped: usize,
    pub invalid_skipped: usize,
    /// Messages kept but without a counterparty; the grouper skips them.
    pub undefined_counterparty: usize,
    pub messages_out: usize,
}

/// Normalizer output.
#[derive(Debug, Clone)]
pub struct Normalized {
    /// Sorted ascending by timestamp.
    pub messages: Vec<Message>,
    pub summary: NormalizeSummary,
}

pub struct MessageNormalizer {
    config: NormalizerConfig,
}

impl MessageNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Clean and sort a batch of rows.
    ///
    /// Row numbers in errors and logs are the rows' source rows, falling
    /// back to 1-based positions in `rows`.
    pub fn normalize(&self, rows: Vec<RawRow>) -> Result<Normalized, DataError> {
        let mut summary = NormalizeSummary {
            rows_in: rows.len(),
            ..Default::default()
        };
        let mut messages = Vec::with_capacity(rows.len());

        for (idx, row) in rows.into_iter().enumerate() {
            let row_no = row.source_row.unwrap_or(idx + 1);
            let body = row.message_body.unwrap_or_default();

            if self.is_activation_notice(&body) {
                debug!(row = row_no, "Dropping activation notice");
                summary.activation_dropped += 1;
                continue;
            }

            let Some(timestamp) = parse_timestamp(&row.message_timestamp) else {
                if self.config.strict {
                    return Err(DataError::InvalidTimestamp {
                        row: row_no,
                        value: row.message_timestamp,
                    });
                }
                warn!(
                    row = row_no,
                    value = %row.message_timestamp,
                    "Skipping row with unparsable timestamp"
                );
                summary.invalid_skipped += 1;
                continue;
            };

            let members = row.message_members.unwrap_or_default();
            let participants = split_participants(&members);
            let counterparty = self.counterparty(&participants);
            if counterparty.is_none() {
                debug!(row = row_no, members = %members, "No single counterparty on row");
                summary.undefined_counterparty += 1;
            }

            messages.push(Message {
                timestamp,
                body,
                is_operator: !members.contains(PARTICIPANT_SEPARATOR),
                participants,
                counterparty,
            });
        }

        // Stable: rows with equal timestamps keep input order.
        messages.sort_by_key(|m| m.timestamp);
        summary.messages_out = messages.len();

        info!(
            rows = summary.rows_in,
            messages = summary.messages_out,
            activation_dropped = summary.activation_dropped,
            invalid_skipped = summary.invalid_skipped,
            undefined_counterparty = summary.undefined_counterparty,
            "Data preprocessing completed"
        );

        Ok(Normalized { messages, summary })
    }

    fn is_activation_notice(&self, body: &str) -> bool {
        self.config
            .activation_notices
            .iter()
            .any(|notice| body.contains(notice.as_str()))
    }

    /// The single participant that is not the operator.
    ///
    /// `None` when there is no such participant or more than one.
    pub fn counterparty(&self, participants: &[String]) -> Option<String> {
        let mut others = participants
            .iter()
            .filter(|p| p.as_str() != self.config.operator_number);
        let first = others.next()?;
        if others.next().is_some() {
            return None;
        }
        Some(first.clone())
    }
}

/// Split a raw participant list into trimmed, non-empty identifiers.
pub fn split_participants(raw: &str) -> Vec<String> {
    raw.split(PARTICIPANT_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse an exported timestamp into UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OP: &str = DEFAULT_OPERATOR_NUMBER;

    fn normalizer() -> MessageNormalizer {
        MessageNormalizer::new(NormalizerConfig::default())
    }

    #[test]
    fn parses_common_timestamp_formats() {
        let expected = "2024-10-28T14:05:09Z".parse::<DateTime<Utc>>().unwrap();
        for raw in [
            "2024-10-28T14:05:09Z",
            "2024-10-28T16:05:09+02:00",
            "2024-10-28 14:05:09",
            "2024-10-28 14:05:09+00:00",
            "2024-10-28T14:05:09",
            "10/28/2024 14:05:09",
            " 2024-10-28 14:05:09 ",
        ] {
            assert_eq!(parse_timestamp(raw), Some(expected), "format: {raw}");
        }
    }

    #[test]
    fn parses_fractional_and_coarse_timestamps() {
        let ts = parse_timestamp("2024-10-28 14:05:09.250").unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 250);
        assert!(parse_timestamp("2024-10-28 14:05").is_some());
        assert!(parse_timestamp("2024-10-28").is_some());
    }

    #[test]
    fn rejects_garbage_timestamps() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2024-13-45 99:99:99").is_none());
    }

    #[test]
    fn split_participants_trims_and_drops_empty() {
        assert_eq!(
            split_participants(" +1555 , +1415 ,"),
            vec!["+1555".to_string(), "+1415".to_string()]
        );
        assert!(split_participants("").is_empty());
    }

    #[test]
    fn operator_message_has_single_member() {
        let rows = vec![RawRow::new("Hello!", "2024-10-28 10:00:00", "+15551234567")];
        let out = normalizer().normalize(rows).unwrap();
        let m = &out.messages[0];
        assert!(m.is_operator);
        assert_eq!(m.counterparty.as_deref(), Some("+15551234567"));
    }

    #[test]
    fn customer_message_lists_operator_and_customer() {
        let rows = vec![RawRow::new(
            "Where is my order?",
            "2024-10-28 10:00:00",
            &format!("{OP},+15551234567"),
        )];
        let out = normalizer().normalize(rows).unwrap();
        let m = &out.messages[0];
        assert!(!m.is_operator);
        assert_eq!(m.counterparty.as_deref(), Some("+15551234567"));
        assert_eq!(m.participants.len(), 2);
    }

    #[test]
    fn counterparty_undefined_for_empty_or_operator_only() {
        let rows = vec![
            RawRow::new("a", "2024-10-28 10:00:00", ""),
            RawRow::new("b", "2024-10-28 10:00:01", OP),
            RawRow {
                message_body: Some("c".into()),
                message_timestamp: "2024-10-28 10:00:02".into(),
                message_members: None,
                ..Default::default()
            },
            RawRow::new("d", "2024-10-28 10:00:03", &format!("{OP},+1555000,+1555111")),
        ];
        let out = normalizer().normalize(rows).unwrap();
        assert_eq!(out.messages.len(), 4);
        assert!(out.messages.iter().all(|m| m.counterparty.is_none()));
        assert_eq!(out.summary.undefined_counterparty, 4);
    }

    #[test]
    fn activation_notice_is_dropped() {
        let rows = vec![
            RawRow::new(DEFAULT_ACTIVATION_NOTICE, "2024-10-28 10:00:00", "+15551234567"),
            RawRow::new(
                &format!("Hi! {DEFAULT_ACTIVATION_NOTICE} Reply STOP to opt out."),
                "2024-10-28 10:00:01",
                "+15551234567",
            ),
            RawRow::new("Your number is active", "2024-10-28 10:00:02", "+15551234567"),
        ];
        let out = normalizer().normalize(rows).unwrap();
        assert_eq!(out.summary.activation_dropped, 2);
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].body, "Your number is active");
    }

    #[test]
    fn missing_body_kept_as_empty() {
        let rows = vec![RawRow {
            message_body: None,
            message_timestamp: "2024-10-28 10:00:00".into(),
            message_members: Some("+15551234567".into()),
            ..Default::default()
        }];
        let out = normalizer().normalize(rows).unwrap();
        assert_eq!(out.messages[0].body, "");
    }

    #[test]
    fn output_sorted_globally_and_stably() {
        let rows = vec![
            RawRow::new("third", "2024-10-28 10:00:02", "+1"),
            RawRow::new("first-a", "2024-10-28 10:00:00", "+2"),
            RawRow::new("second", "2024-10-28 10:00:01", "+1"),
            RawRow::new("first-b", "2024-10-28 10:00:00", "+1"),
        ];
        let out = normalizer().normalize(rows).unwrap();
        let bodies: Vec<&str> = out.messages.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["first-a", "first-b", "second", "third"]);
    }

    #[test]
    fn bad_timestamp_skipped_by_default() {
        let rows = vec![
            RawRow::new("ok", "2024-10-28 10:00:00", "+1"),
            RawRow::new("bad", "not a date", "+1"),
        ];
        let out = normalizer().normalize(rows).unwrap();
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.summary.invalid_skipped, 1);
        assert_eq!(out.summary.rows_in, 2);
    }

    #[test]
    fn bad_timestamp_fatal_in_strict_mode() {
        let normalizer = MessageNormalizer::new(NormalizerConfig {
            strict: true,
            ..Default::default()
        });
        let rows = vec![
            RawRow::new("ok", "2024-10-28 10:00:00", "+1"),
            RawRow::new("bad", "not a date", "+1"),
        ];
        match normalizer.normalize(rows) {
            Err(DataError::InvalidTimestamp { row, value }) => {
                assert_eq!(row, 2);
                assert_eq!(value, "not a date");
            }
            other => panic!("Expected InvalidTimestamp, got {:?}", other),
        }
    }

    mod proptest_normalizer {
        use super::*;
        use proptest::prelude::*;

        fn member_list() -> impl Strategy<Value = String> {
            let id = prop_oneof![
                Just(OP.to_string()),
                "\\+1555[0-9]{3}",
                Just(String::new()),
            ];
            prop::collection::vec(id, 0..4).prop_map(|ids| ids.join(","))
        }

        fn raw_row() -> impl Strategy<Value = RawRow> {
            (0u32..86_400, member_list(), "[a-z ]{0,12}").prop_map(|(secs, members, body)| {
                let ts = chrono::DateTime::from_timestamp(1_730_000_000 + i64::from(secs), 0)
                    .unwrap()
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string();
                RawRow::new(&body, &ts, &members)
            })
        }

        proptest! {
            #[test]
            fn prop_counterparty_never_operator(rows in prop::collection::vec(raw_row(), 0..40)) {
                let out = normalizer().normalize(rows).unwrap();
                for m in &out.messages {
                    prop_assert_ne!(m.counterparty.as_deref(), Some(OP));
                }
            }

            #[test]
            fn prop_output_sorted(rows in prop::collection::vec(raw_row(), 0..40)) {
                let out = normalizer().normalize(rows).unwrap();
                prop_assert!(out.messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
            }

            #[test]
            fn prop_counts_add_up(rows in prop::collection::vec(raw_row(), 0..40)) {
                let n = rows.len();
                let out = normalizer().normalize(rows).unwrap();
                let s = &out.summary;
                prop_assert_eq!(s.rows_in, n);
                prop_assert_eq!(s.messages_out + s.activation_dropped + s.invalid_skipped, n);
            }
        }
    }
}
