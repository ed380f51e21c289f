use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::models::{AlertLevel, AlertSummary, ExpiryAlert, InstructorRecord, RecipientGroup};

/// Whole days until the document expires. Both sides are calendar dates,
/// so a document expiring today yields 0 and yesterday yields -1.
pub fn days_until_expiry(expiry_date: NaiveDate, today: NaiveDate) -> i64 {
    (expiry_date - today).num_days()
}

/// Threshold policy: maps a days-remaining count to a severity tier.
/// Returns `None` beyond the 90-day horizon.
pub fn classify(days_remaining: i64) -> Option<AlertLevel> {
    match days_remaining {
        d if d <= 0 => Some(AlertLevel::Expired),
        1..=7 => Some(AlertLevel::Critical),
        8..=30 => Some(AlertLevel::Warning),
        31..=90 => Some(AlertLevel::Info),
        _ => None,
    }
}

/// Scans every instructor's active documents and returns one alert per
/// tracked document inside the 90-day horizon. The result is sorted most
/// urgent first: by severity tier, then by ascending days remaining.
/// Pure over its inputs; callers pass `today` so the clock is injectable.
pub fn scan(instructors: &[InstructorRecord], today: NaiveDate) -> Vec<ExpiryAlert> {
    let mut alerts = Vec::new();

    for instructor in instructors {
        for doc in instructor.documents.iter().filter(|d| !d.is_archived) {
            if !doc.kind.is_tracked() {
                continue;
            }
            let Some(expiry_date) = doc.expiry_date else {
                continue;
            };

            let days_remaining = days_until_expiry(expiry_date, today);
            let Some(level) = classify(days_remaining) else {
                continue;
            };

            alerts.push(ExpiryAlert {
                instructor_id: instructor.id,
                instructor_name: instructor.full_name.clone(),
                instructor_email: instructor.email.clone(),
                document_id: doc.id,
                document_name: doc.name.clone(),
                document_kind: doc.kind,
                expiry_date,
                days_remaining,
                level,
            });
        }
    }

    // sort_by_key is stable, so equal (tier, days) pairs keep input order
    alerts.sort_by_key(|a| (a.level.rank(), a.days_remaining));
    alerts
}

pub fn summarize(alerts: &[ExpiryAlert]) -> AlertSummary {
    let mut summary = AlertSummary {
        total: alerts.len(),
        ..AlertSummary::default()
    };

    for alert in alerts {
        match alert.level {
            AlertLevel::Expired => summary.expired += 1,
            AlertLevel::Critical => summary.critical += 1,
            AlertLevel::Warning => summary.warning += 1,
            AlertLevel::Info => summary.info += 1,
        }
    }

    summary
}

/// Groups alerts by recipient email. Recipients with no alerts are simply
/// absent; each group keeps its alerts in scan order.
pub fn group_by_recipient(alerts: &[ExpiryAlert]) -> BTreeMap<String, RecipientGroup> {
    let mut groups: BTreeMap<String, RecipientGroup> = BTreeMap::new();

    for alert in alerts {
        groups
            .entry(alert.instructor_email.clone())
            .or_insert_with(|| RecipientGroup {
                name: alert.instructor_name.clone(),
                alerts: Vec::new(),
            })
            .alerts
            .push(alert.clone());
    }

    groups
}
