use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::expiry;
use crate::models::{
    AlertLevel, DispatchReport, DocumentKind, ExpiryAlert, InstructorRecord,
    NotificationLogEntry, RecipientOutcome, SkipReason,
};
use crate::report;

/// Outbound mail seam. The real relay (SMTP, provider API) lives outside
/// this crate; anything that can deliver a rendered message satisfies it.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str, text: &str) -> anyhow::Result<()>;
}

/// Persisted send history consulted for same-day dedup. Append-only: rows
/// are never updated or deleted.
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    /// True if a successful send for this exact (email, kind, level) triple
    /// was already logged on `today`. Failed attempts never count, so they
    /// are retried on the next cycle.
    async fn was_sent_today(
        &self,
        recipient_email: &str,
        document_kind: DocumentKind,
        level: AlertLevel,
        today: NaiveDate,
    ) -> anyhow::Result<bool>;

    async fn record(&self, entry: &NotificationLogEntry) -> anyhow::Result<()>;
}

fn log_entry(alert: &ExpiryAlert, email_sent: bool, error: Option<String>) -> NotificationLogEntry {
    NotificationLogEntry {
        id: Uuid::new_v4(),
        alert_level: alert.level,
        recipient_email: alert.instructor_email.clone(),
        recipient_name: alert.instructor_name.clone(),
        document_kind: alert.document_kind,
        document_name: alert.document_name.clone(),
        expiry_date: alert.expiry_date,
        days_remaining: alert.days_remaining,
        sent_at: Utc::now(),
        email_sent,
        error_message: error,
    }
}

/// Scans the given instructors and emails each one whose credentials need
/// attention, at most once per day per (document type, level) pair.
///
/// Info-tier alerts stay on the dashboard and never email. A transport
/// failure for one recipient does not stop the rest; every attempt, failed
/// or not, lands in the ledger. A recipient whose ledger rows cannot be
/// written is reported as failed even when the mail went out, so the next
/// cycle retries rather than leaving an unauditable send.
pub async fn dispatch(
    instructors: &[InstructorRecord],
    ledger: &dyn NotificationLedger,
    transport: &dyn MailTransport,
    admin_email: Option<&str>,
    today: NaiveDate,
) -> DispatchReport {
    let alerts = expiry::scan(instructors, today);
    let groups = expiry::group_by_recipient(&alerts);

    let mut results = Vec::new();

    for (email, group) in &groups {
        let qualifying: Vec<&ExpiryAlert> = group
            .alerts
            .iter()
            .filter(|a| a.level != AlertLevel::Info)
            .collect();

        if qualifying.is_empty() {
            results.push(RecipientOutcome {
                email: email.clone(),
                name: group.name.clone(),
                sent: false,
                skipped: Some(SkipReason::InfoOnly),
                error: None,
                alerts_count: group.alerts.len(),
            });
            continue;
        }

        // Dedup each alert on its own (email, type, level) triple; an
        // instructor may have several qualifying documents in one batch.
        let mut fresh: Vec<&ExpiryAlert> = Vec::new();
        let mut ledger_error: Option<String> = None;
        for alert in &qualifying {
            match ledger
                .was_sent_today(email, alert.document_kind, alert.level, today)
                .await
            {
                Ok(true) => {}
                Ok(false) => fresh.push(alert),
                Err(err) => {
                    ledger_error = Some(err.to_string());
                    break;
                }
            }
        }

        if let Some(err) = ledger_error {
            // Cannot verify dedup state; do not risk a resend.
            results.push(RecipientOutcome {
                email: email.clone(),
                name: group.name.clone(),
                sent: false,
                skipped: None,
                error: Some(err),
                alerts_count: qualifying.len(),
            });
            continue;
        }

        if fresh.is_empty() {
            results.push(RecipientOutcome {
                email: email.clone(),
                name: group.name.clone(),
                sent: false,
                skipped: Some(SkipReason::AlreadySentToday),
                error: None,
                alerts_count: qualifying.len(),
            });
            continue;
        }

        let message = report::render_instructor_email(&group.name, &fresh);
        match transport
            .send(email, &message.subject, &message.html, &message.text)
            .await
        {
            Ok(()) => {
                let mut write_error: Option<String> = None;
                for alert in &fresh {
                    if let Err(err) = ledger.record(&log_entry(alert, true, None)).await {
                        write_error.get_or_insert(err.to_string());
                    }
                }
                results.push(RecipientOutcome {
                    email: email.clone(),
                    name: group.name.clone(),
                    sent: write_error.is_none(),
                    skipped: None,
                    error: write_error,
                    alerts_count: fresh.len(),
                });
            }
            Err(err) => {
                let reason = err.to_string();
                for alert in &fresh {
                    if let Err(log_err) = ledger
                        .record(&log_entry(alert, false, Some(reason.clone())))
                        .await
                    {
                        eprintln!("ledger write failed for {email}: {log_err}");
                    }
                }
                results.push(RecipientOutcome {
                    email: email.clone(),
                    name: group.name.clone(),
                    sent: false,
                    skipped: None,
                    error: Some(reason),
                    alerts_count: fresh.len(),
                });
            }
        }
    }

    // Admin digest covers the whole alert list, info included. It carries
    // no dedup guard: every invocation resends it, which doubles as a
    // liveness signal for the admin.
    if let Some(admin) = admin_email {
        if !alerts.is_empty() {
            let digest = report::render_admin_digest(&alerts);
            if let Err(err) = transport
                .send(admin, &digest.subject, &digest.html, &digest.text)
                .await
            {
                eprintln!("admin digest send failed: {err}");
            }
        }
    }

    let instructors_notified = results.iter().filter(|r| r.sent).count();
    DispatchReport {
        total_alerts: alerts.len(),
        instructors_notified,
        results,
    }
}

/// File-drop transport for CLI runs: writes each rendered message into a
/// directory for a relay (or a human) to pick up.
pub struct OutboxTransport {
    dir: PathBuf,
}

impl OutboxTransport {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl MailTransport for OutboxTransport {
    async fn send(&self, to: &str, subject: &str, html: &str, text: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let slug: String = to
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%f");
        let path = self.dir.join(format!("{stamp}-{slug}.eml"));
        let body = format!(
            "To: {to}\nSubject: {subject}\nContent-Type: multipart/alternative\n\n{text}\n\n--\n\n{html}\n"
        );
        std::fs::write(path, body)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentRecord;
    use chrono::Duration;
    use std::sync::Mutex;

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    fn document(kind: DocumentKind, days_out: i64) -> DocumentRecord {
        DocumentRecord {
            id: Uuid::new_v4(),
            name: kind.display_name().to_string(),
            kind,
            expiry_date: Some(today() + Duration::days(days_out)),
            is_archived: false,
        }
    }

    fn instructor(name: &str, email: &str, documents: Vec<DocumentRecord>) -> InstructorRecord {
        InstructorRecord {
            id: Uuid::new_v4(),
            full_name: name.to_string(),
            email: email.to_string(),
            documents,
        }
    }

    #[derive(Default)]
    struct MemoryLedger {
        entries: Mutex<Vec<NotificationLogEntry>>,
        fail_writes: bool,
    }

    #[async_trait]
    impl NotificationLedger for MemoryLedger {
        async fn was_sent_today(
            &self,
            recipient_email: &str,
            document_kind: DocumentKind,
            level: AlertLevel,
            today: NaiveDate,
        ) -> anyhow::Result<bool> {
            let entries = self.entries.lock().unwrap();
            Ok(entries.iter().any(|e| {
                e.email_sent
                    && e.recipient_email == recipient_email
                    && e.document_kind == document_kind
                    && e.alert_level == level
                    && e.sent_at.date_naive() == today
            }))
        }

        async fn record(&self, entry: &NotificationLogEntry) -> anyhow::Result<()> {
            if self.fail_writes {
                anyhow::bail!("ledger unavailable");
            }
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryTransport {
        sent: Mutex<Vec<(String, String)>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl MailTransport for MemoryTransport {
        async fn send(
            &self,
            to: &str,
            subject: &str,
            _html: &str,
            _text: &str,
        ) -> anyhow::Result<()> {
            if self.fail_for.as_deref() == Some(to) {
                anyhow::bail!("relay refused connection");
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn sends_and_records_for_qualifying_recipient() {
        let instructors = vec![instructor(
            "Jan Kowalski",
            "jan@example.com",
            vec![document(DocumentKind::Medical, 5)],
        )];
        let ledger = MemoryLedger::default();
        let transport = MemoryTransport::default();

        let report = dispatch(&instructors, &ledger, &transport, None, today()).await;

        assert_eq!(report.total_alerts, 1);
        assert_eq!(report.instructors_notified, 1);
        assert!(report.results[0].sent);
        assert_eq!(report.results[0].alerts_count, 1);

        let entries = ledger.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].email_sent);
        assert_eq!(entries[0].alert_level, AlertLevel::Critical);
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_run_same_day_is_deduplicated() {
        let instructors = vec![instructor(
            "Jan Kowalski",
            "jan@example.com",
            vec![document(DocumentKind::Medical, 5)],
        )];
        let ledger = MemoryLedger::default();
        let transport = MemoryTransport::default();

        let first = dispatch(&instructors, &ledger, &transport, None, today()).await;
        assert!(first.results[0].sent);

        let second = dispatch(&instructors, &ledger, &transport, None, today()).await;
        assert!(!second.results[0].sent);
        assert_eq!(
            second.results[0].skipped,
            Some(SkipReason::AlreadySentToday)
        );

        assert_eq!(transport.sent.lock().unwrap().len(), 1);
        assert_eq!(ledger.entries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dedup_resets_at_the_day_boundary() {
        let instructors = vec![instructor(
            "Jan Kowalski",
            "jan@example.com",
            vec![document(DocumentKind::Medical, 5)],
        )];
        let ledger = MemoryLedger::default();
        let transport = MemoryTransport::default();

        let first = dispatch(&instructors, &ledger, &transport, None, today()).await;
        assert!(first.results[0].sent);

        // same alert the next calendar day goes out again
        let next_day = today() + Duration::days(1);
        let second = dispatch(&instructors, &ledger, &transport, None, next_day).await;
        assert!(second.results[0].sent);
        assert_eq!(second.results[0].skipped, None);

        assert_eq!(transport.sent.lock().unwrap().len(), 2);
        assert_eq!(ledger.entries.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn info_only_recipient_is_skipped_without_logging() {
        let instructors = vec![instructor(
            "Jan Kowalski",
            "jan@example.com",
            vec![document(DocumentKind::Medical, 60)],
        )];
        let ledger = MemoryLedger::default();
        let transport = MemoryTransport::default();

        let report = dispatch(&instructors, &ledger, &transport, None, today()).await;

        assert_eq!(report.results[0].skipped, Some(SkipReason::InfoOnly));
        // the info alerts still count, so the report reconciles with total_alerts
        assert_eq!(report.results[0].alerts_count, 1);
        assert!(transport.sent.lock().unwrap().is_empty());
        assert!(ledger.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_is_isolated_per_recipient() {
        let instructors = vec![
            instructor(
                "Adam Nowak",
                "adam@example.com",
                vec![document(DocumentKind::License, 3)],
            ),
            instructor(
                "Ewa Wilk",
                "ewa@example.com",
                vec![document(DocumentKind::Medical, -2)],
            ),
        ];
        let ledger = MemoryLedger::default();
        let transport = MemoryTransport {
            fail_for: Some("adam@example.com".to_string()),
            ..MemoryTransport::default()
        };

        let report = dispatch(&instructors, &ledger, &transport, None, today()).await;

        let adam = report
            .results
            .iter()
            .find(|r| r.email == "adam@example.com")
            .unwrap();
        let ewa = report
            .results
            .iter()
            .find(|r| r.email == "ewa@example.com")
            .unwrap();

        assert!(!adam.sent);
        assert!(adam.error.as_deref().unwrap().contains("relay refused"));
        assert!(ewa.sent);
        assert_eq!(report.instructors_notified, 1);

        // both attempts hit the ledger, the failed one with email_sent=false
        let entries = ledger.entries.lock().unwrap();
        assert_eq!(entries.len(), 2);
        let failed = entries
            .iter()
            .find(|e| e.recipient_email == "adam@example.com")
            .unwrap();
        assert!(!failed.email_sent);
        assert!(failed.error_message.is_some());
    }

    #[tokio::test]
    async fn failed_attempt_does_not_block_retry() {
        let instructors = vec![instructor(
            "Adam Nowak",
            "adam@example.com",
            vec![document(DocumentKind::License, 3)],
        )];
        let ledger = MemoryLedger::default();

        let failing = MemoryTransport {
            fail_for: Some("adam@example.com".to_string()),
            ..MemoryTransport::default()
        };
        let first = dispatch(&instructors, &ledger, &failing, None, today()).await;
        assert!(!first.results[0].sent);

        // next cycle with a healthy relay goes through
        let healthy = MemoryTransport::default();
        let second = dispatch(&instructors, &ledger, &healthy, None, today()).await;
        assert!(second.results[0].sent);
    }

    #[tokio::test]
    async fn ledger_write_failure_marks_recipient_failed() {
        let instructors = vec![instructor(
            "Jan Kowalski",
            "jan@example.com",
            vec![document(DocumentKind::Medical, 5)],
        )];
        let ledger = MemoryLedger {
            fail_writes: true,
            ..MemoryLedger::default()
        };
        let transport = MemoryTransport::default();

        let report = dispatch(&instructors, &ledger, &transport, None, today()).await;

        assert!(!report.results[0].sent);
        assert!(report.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("ledger unavailable"));
        assert_eq!(report.instructors_notified, 0);
    }

    #[tokio::test]
    async fn dedup_is_per_document_type_within_a_batch() {
        let medical = document(DocumentKind::Medical, 5);
        let license = document(DocumentKind::License, 5);
        let instructors_medical = vec![instructor(
            "Jan Kowalski",
            "jan@example.com",
            vec![medical.clone()],
        )];
        let instructors_both = vec![instructor(
            "Jan Kowalski",
            "jan@example.com",
            vec![medical, license],
        )];

        let ledger = MemoryLedger::default();
        let transport = MemoryTransport::default();

        // morning run covered the medical certificate only
        dispatch(&instructors_medical, &ledger, &transport, None, today()).await;

        // a license uploaded later the same day still gets its own notice
        let report = dispatch(&instructors_both, &ledger, &transport, None, today()).await;
        assert!(report.results[0].sent);
        assert_eq!(report.results[0].alerts_count, 1);

        let entries = ledger.entries.lock().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .any(|e| e.document_kind == DocumentKind::License));
    }

    #[tokio::test]
    async fn admin_digest_includes_info_and_survives_failure() {
        let instructors = vec![instructor(
            "Jan Kowalski",
            "jan@example.com",
            vec![document(DocumentKind::Medical, 60)],
        )];
        let ledger = MemoryLedger::default();
        let transport = MemoryTransport::default();

        let report = dispatch(
            &instructors,
            &ledger,
            &transport,
            Some("ops@example.com"),
            today(),
        )
        .await;
        assert_eq!(report.total_alerts, 1);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ops@example.com");
        drop(sent);

        // digest failure must not fail the dispatch call
        let broken = MemoryTransport {
            fail_for: Some("ops@example.com".to_string()),
            ..MemoryTransport::default()
        };
        let report = dispatch(
            &instructors,
            &ledger,
            &broken,
            Some("ops@example.com"),
            today(),
        )
        .await;
        assert_eq!(report.total_alerts, 1);
    }
}
