//! Compliance reporting over a trailing window of dose events.

use crate::clock::local_date;
use crate::{DoseEvent, DoseStatus, Error, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Who the report is about
#[derive(Clone, Debug)]
pub struct ReportSubject<'a> {
    pub device_id: &'a str,
    pub patient_name: &'a str,
    pub timezone: &'a str,
}

/// Counts per status
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: u32,
    pub dispensed: u32,
    pub confirmed: u32,
    pub missed: u32,
    pub skipped: u32,
}

impl StatusCounts {
    fn add(&mut self, status: DoseStatus) {
        self.total += 1;
        match status {
            DoseStatus::Dispensed => self.dispensed += 1,
            DoseStatus::Confirmed => self.confirmed += 1,
            DoseStatus::Missed => self.missed += 1,
            DoseStatus::Skipped => self.skipped += 1,
        }
    }

    /// `confirmed / total` as a percentage with one decimal, `"0.0%"` when empty
    pub fn compliance(&self) -> String {
        if self.total == 0 {
            return "0.0%".into();
        }
        let pct = f64::from(self.confirmed) / f64::from(self.total) * 100.0;
        format!("{:.1}%", pct)
    }
}

/// Report window, as calendar dates in the device's timezone
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportPeriod {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Headline figures
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportSummary {
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub compliance: String,
}

/// Compliance report for one device
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub device_id: String,
    pub patient_name: String,
    pub timezone: String,
    pub window_days: u32,
    pub generated_at: DateTime<Utc>,
    pub period: ReportPeriod,
    pub summary: ReportSummary,
    /// Every calendar day of the period, keyed `YYYY-MM-DD`
    pub daily_stats: BTreeMap<String, StatusCounts>,
}

/// Longest accepted report window, about ten years
pub const MAX_WINDOW_DAYS: u32 = 3660;

/// Start of the trailing window `[now - window_days, now]`
pub fn window_start(now: DateTime<Utc>, window_days: u32) -> Result<DateTime<Utc>> {
    if window_days == 0 {
        return Err(Error::invalid("window_days", "must be at least 1"));
    }
    if window_days > MAX_WINDOW_DAYS {
        return Err(Error::invalid(
            "window_days",
            format!("must be at most {}", MAX_WINDOW_DAYS),
        ));
    }
    now.checked_sub_signed(Duration::days(i64::from(window_days)))
        .ok_or_else(|| Error::invalid("window_days", "reaches before the earliest date"))
}

/// Aggregate events in `[now - window_days, now]`.
///
/// Events outside the window are ignored, so callers may pass a wider slice.
pub fn build_report(
    subject: &ReportSubject<'_>,
    events: &[DoseEvent],
    now: DateTime<Utc>,
    window_days: u32,
) -> Result<ComplianceReport> {
    let start = window_start(now, window_days)?;
    let period = ReportPeriod {
        from: local_date(start, subject.timezone),
        to: local_date(now, subject.timezone),
    };

    let mut daily_stats = BTreeMap::new();
    let mut day = period.from;
    while day <= period.to {
        daily_stats.insert(day.to_string(), StatusCounts::default());
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    let mut counts = StatusCounts::default();
    for event in events
        .iter()
        .filter(|e| e.occurred_at >= start && e.occurred_at <= now)
    {
        counts.add(event.status);
        let key = local_date(event.occurred_at, subject.timezone).to_string();
        daily_stats.entry(key).or_default().add(event.status);
    }

    tracing::debug!(
        "Aggregated {} events for device {} over {} days",
        counts.total,
        subject.device_id,
        window_days
    );

    let compliance = counts.compliance();
    Ok(ComplianceReport {
        device_id: subject.device_id.to_string(),
        patient_name: subject.patient_name.to_string(),
        timezone: subject.timezone.to_string(),
        window_days,
        generated_at: now,
        period,
        summary: ReportSummary { counts, compliance },
        daily_stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    const SUBJECT: ReportSubject<'static> = ReportSubject {
        device_id: "ESP1",
        patient_name: "Asha",
        timezone: "UTC",
    };

    fn event(at: DateTime<Utc>, status: DoseStatus) -> DoseEvent {
        DoseEvent {
            id: Uuid::new_v4(),
            device_id: "ESP1".into(),
            slot: 0,
            medication_name: "Aspirin".into(),
            scheduled_time: None,
            occurred_at: at,
            status,
            created_at: at,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 8, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_weekly_compliance() {
        let mut events = Vec::new();
        for day in 0..7 {
            let at = now() - Duration::days(day) - Duration::hours(1);
            events.push(event(at, DoseStatus::Confirmed));
            if day < 3 {
                events.push(event(at, DoseStatus::Confirmed));
            }
            if day < 4 {
                events.push(event(at, DoseStatus::Missed));
            }
        }
        assert_eq!(events.len(), 14);

        let report = build_report(&SUBJECT, &events, now(), 7).unwrap();
        assert_eq!(report.summary.counts.total, 14);
        assert_eq!(report.summary.counts.confirmed, 10);
        assert_eq!(report.summary.counts.missed, 4);
        assert_eq!(report.summary.compliance, "71.4%");

        let day_total: u32 = report.daily_stats.values().map(|d| d.total).sum();
        let day_confirmed: u32 = report.daily_stats.values().map(|d| d.confirmed).sum();
        assert_eq!(day_total, 14);
        assert_eq!(day_confirmed, 10);
    }

    #[test]
    fn test_empty_window() {
        let report = build_report(&SUBJECT, &[], now(), 7).unwrap();
        assert_eq!(report.summary.counts.total, 0);
        assert_eq!(report.summary.compliance, "0.0%");
        assert_eq!(report.period.from.to_string(), "2024-06-01");
        assert_eq!(report.period.to.to_string(), "2024-06-08");
        assert_eq!(report.daily_stats.len(), 8);
    }

    #[test]
    fn test_window_bounds_are_closed() {
        let events = vec![
            event(now() - Duration::days(7), DoseStatus::Confirmed),
            event(now(), DoseStatus::Skipped),
            event(now() - Duration::days(7) - Duration::seconds(1), DoseStatus::Missed),
            event(now() + Duration::seconds(1), DoseStatus::Missed),
        ];
        let report = build_report(&SUBJECT, &events, now(), 7).unwrap();
        assert_eq!(report.summary.counts.total, 2);
        assert_eq!(report.summary.counts.missed, 0);
        assert_eq!(report.summary.compliance, "50.0%");
    }

    #[test]
    fn test_days_bucket_in_device_timezone() {
        // 20:00 UTC on June 7 is already June 8 in +05:30
        let at = Utc.with_ymd_and_hms(2024, 6, 7, 20, 0, 0).unwrap();
        let subject = ReportSubject {
            timezone: "+05:30",
            ..SUBJECT
        };
        let report = build_report(&subject, &[event(at, DoseStatus::Dispensed)], now(), 7).unwrap();
        assert_eq!(report.daily_stats["2024-06-08"].dispensed, 1);
        assert_eq!(report.daily_stats["2024-06-07"].total, 0);
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(matches!(
            build_report(&SUBJECT, &[], now(), 0),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_oversized_window_rejected() {
        for days in [MAX_WINDOW_DAYS + 1, 200_000_000, u32::MAX] {
            assert!(matches!(
                build_report(&SUBJECT, &[], now(), days),
                Err(Error::InvalidInput { ref field, .. }) if field == "window_days"
            ));
        }
        assert!(build_report(&SUBJECT, &[], now(), MAX_WINDOW_DAYS).is_ok());
    }

    #[test]
    fn test_window_start_near_earliest_date() {
        let earliest = DateTime::<Utc>::MIN_UTC + Duration::days(1);
        assert!(window_start(earliest, 1).is_ok());
        assert!(window_start(earliest, 2).is_err());
    }

    #[test]
    fn test_summary_json_shape() {
        let report = build_report(&SUBJECT, &[event(now(), DoseStatus::Confirmed)], now(), 7).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["summary"]["confirmed"], 1);
        assert_eq!(json["summary"]["compliance"], "100.0%");
        assert_eq!(json["patientName"], "Asha");
    }
}
