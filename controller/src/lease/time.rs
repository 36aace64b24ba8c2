//! Time-field reconciliation (§4.4.1). Runs on CreateLease and on UpdateLease whenever any of
//! begin/end/duration is touched; idempotent (§8 invariant: applying it twice on the same
//! triple produces the same triple the second time).

use chrono::{DateTime, Utc};

use super::ReconcileError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NormalizedTime {
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
}

pub fn reconcile_time_fields(
    begin: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    duration_seconds: Option<i64>,
) -> Result<NormalizedTime, ReconcileError> {
    let (begin, end, duration_seconds) = match (begin, end, duration_seconds) {
        (Some(b), Some(e), given_duration) => {
            let computed = (e - b).num_seconds();
            if let Some(given) = given_duration {
                if given != computed {
                    return Err(ReconcileError::Invalid("duration conflicts".to_string()));
                }
            }
            (Some(b), Some(e), computed)
        }
        (None, Some(e), Some(d)) => (Some(e - chrono::Duration::seconds(d)), Some(e), d),
        (None, Some(_), None) => {
            return Err(ReconcileError::Invalid("duration is required".to_string()))
        }
        (_, None, Some(d)) => (begin, None, d),
        (_, None, None) => {
            return Err(ReconcileError::Invalid("duration is required".to_string()))
        }
    };

    if duration_seconds <= 0 {
        return Err(ReconcileError::Invalid(
            "duration must be greater than zero".to_string(),
        ));
    }

    Ok(NormalizedTime {
        begin,
        end,
        duration_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn duration_only_is_kept_with_no_begin_or_end() {
        let normalized = reconcile_time_fields(None, None, Some(60)).unwrap();
        assert_eq!(normalized.begin, None);
        assert_eq!(normalized.end, None);
        assert_eq!(normalized.duration_seconds, 60);
    }

    #[test]
    fn end_only_without_duration_is_invalid() {
        let err = reconcile_time_fields(None, Some(t(60)), None).unwrap_err();
        assert!(matches!(err, ReconcileError::Invalid(msg) if msg.contains("duration is required")));
    }

    #[test]
    fn begin_and_end_compute_duration() {
        let normalized = reconcile_time_fields(Some(t(0)), Some(t(60)), None).unwrap();
        assert_eq!(normalized.duration_seconds, 60);
    }

    #[test]
    fn begin_and_end_with_conflicting_duration_is_invalid() {
        let err = reconcile_time_fields(Some(t(0)), Some(t(60)), Some(120)).unwrap_err();
        assert!(matches!(err, ReconcileError::Invalid(msg) if msg.contains("conflicts")));
    }

    #[test]
    fn end_and_duration_compute_begin() {
        let normalized = reconcile_time_fields(None, Some(t(60)), Some(60)).unwrap();
        assert_eq!(normalized.begin, Some(t(0)));
    }

    #[test]
    fn all_three_consistent_is_ok() {
        let normalized = reconcile_time_fields(Some(t(0)), Some(t(60)), Some(60)).unwrap();
        assert_eq!(normalized.duration_seconds, 60);
    }

    #[test]
    fn zero_or_negative_duration_is_invalid() {
        assert!(reconcile_time_fields(Some(t(0)), Some(t(0)), None).is_err());
        assert!(reconcile_time_fields(None, None, Some(0)).is_err());
        assert!(reconcile_time_fields(None, None, Some(-5)).is_err());
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let first = reconcile_time_fields(Some(t(0)), Some(t(60)), None).unwrap();
        let second =
            reconcile_time_fields(first.begin, first.end, Some(first.duration_seconds)).unwrap();
        assert_eq!(first, second);
    }
}
