//! Envelope validation and derived time tags

use crate::{BlackrockError, Envelope, KeyValue, Metadata, Result, Timestamp, NANOS_PER_SEC};
use chrono::{DateTime, Datelike, Timelike, Utc};

/// Replacement for empty search values
pub const EMPTY_VALUE: &str = "__empty";

pub const TAG_YEAR: &str = "year";
pub const TAG_YEAR_MONTH: &str = "year-month";
pub const TAG_YEAR_MONTH_DAY: &str = "year-month-day";
pub const TAG_YEAR_MONTH_DAY_HOUR: &str = "year-month-day-hour";

/// Validate an envelope in place and append its time tags, stamping it with
/// the current time when `created_at_ns` is 0
pub fn prepare(envelope: &mut Envelope) -> Result<()> {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(0);
    prepare_at(envelope, now)
}

/// [`prepare`] with an explicit notion of "now"
pub fn prepare_at(envelope: &mut Envelope, now_ns: Timestamp) -> Result<()> {
    let metadata = envelope
        .metadata
        .as_mut()
        .ok_or(BlackrockError::MissingMetadata)?;

    validate(metadata)?;

    if metadata.created_at_ns == 0 {
        metadata.created_at_ns = now_ns;
    }

    for kv in metadata.search.iter_mut() {
        if kv.value.is_empty() {
            kv.value = EMPTY_VALUE.to_string();
        }
    }

    metadata.search.extend(time_tags(metadata.created_at_ns));
    Ok(())
}

fn validate(metadata: &Metadata) -> Result<()> {
    if metadata.foreign_id.is_empty() {
        return Err(BlackrockError::MissingForeignId);
    }
    if metadata.foreign_type.is_empty() {
        return Err(BlackrockError::MissingForeignType);
    }
    if metadata.event_type.is_empty() {
        return Err(BlackrockError::MissingEventType);
    }
    Ok(())
}

/// `year`, `year-month`, `year-month-day` and `year-month-day-hour` in UTC
pub fn time_tags(created_at_ns: Timestamp) -> [KeyValue; 4] {
    let secs = created_at_ns.div_euclid(NANOS_PER_SEC);
    let t = DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default();
    let (y, m, d, h) = (t.year(), t.month(), t.day(), t.hour());

    [
        KeyValue::new(TAG_YEAR, format!("{:04}", y)),
        KeyValue::new(TAG_YEAR_MONTH, format!("{:04}-{:02}", y, m)),
        KeyValue::new(TAG_YEAR_MONTH_DAY, format!("{:04}-{:02}-{:02}", y, m, d)),
        KeyValue::new(TAG_YEAR_MONTH_DAY_HOUR, format!("{:04}-{:02}-{:02}-{:02}", y, m, d, h)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn envelope() -> Envelope {
        Envelope::new(Metadata::new("click", "user_id", "42"))
    }

    #[test]
    fn test_missing_fields() {
        let mut e = Envelope::default();
        assert!(matches!(prepare(&mut e), Err(BlackrockError::MissingMetadata)));

        let mut e = Envelope::new(Metadata::new("click", "user_id", ""));
        assert!(matches!(prepare(&mut e), Err(BlackrockError::MissingForeignId)));

        let mut e = Envelope::new(Metadata::new("click", "", "42"));
        assert!(matches!(prepare(&mut e), Err(BlackrockError::MissingForeignType)));

        let mut e = Envelope::new(Metadata::new("", "user_id", "42"));
        assert!(matches!(prepare(&mut e), Err(BlackrockError::MissingEventType)));
        // nothing was appended on failure
        assert!(e.metadata.unwrap().search.is_empty());
    }

    #[test]
    fn test_assigns_now_and_empty_values() {
        let mut e = envelope();
        e.metadata.as_mut().unwrap().search.push(KeyValue::new("city", ""));
        prepare_at(&mut e, 5 * NANOS_PER_SEC).unwrap();

        let m = e.metadata.unwrap();
        assert_eq!(m.created_at_ns, 5 * NANOS_PER_SEC);
        assert_eq!(m.search[0], KeyValue::new("city", EMPTY_VALUE));
        assert_eq!(m.search.len(), 5);
    }

    #[test]
    fn test_time_tags() {
        let t = Utc.with_ymd_and_hms(2020, 3, 4, 5, 6, 7).unwrap();
        let mut e = envelope();
        e.metadata.as_mut().unwrap().created_at_ns = t.timestamp() * NANOS_PER_SEC;
        prepare_at(&mut e, 0).unwrap();

        let search = e.metadata.unwrap().search;
        assert_eq!(
            search,
            vec![
                KeyValue::new("year", "2020"),
                KeyValue::new("year-month", "2020-03"),
                KeyValue::new("year-month-day", "2020-03-04"),
                KeyValue::new("year-month-day-hour", "2020-03-04-05"),
            ]
        );
    }

    #[test]
    fn test_epoch_tags() {
        let tags = time_tags(0);
        assert_eq!(tags[3].value, "1970-01-01-00");
    }
}
