use std::collections::HashMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::expiry;
use crate::models::{AlertLevel, DocumentKind, ExpiryAlert};

pub struct EmailMessage {
    pub subject: String,
    pub html: String,
    pub text: String,
}

fn days_phrase(days_remaining: i64) -> String {
    if days_remaining < 0 {
        format!("expired {} days ago", -days_remaining)
    } else if days_remaining == 0 {
        "expires today".to_string()
    } else {
        format!("{days_remaining} days remaining")
    }
}

/// Per-instructor notice covering the given batch of alerts. The subject is
/// marked urgent when any document has already lapsed.
pub fn render_instructor_email(name: &str, alerts: &[&ExpiryAlert]) -> EmailMessage {
    let expired_count = alerts
        .iter()
        .filter(|a| a.level == AlertLevel::Expired)
        .count();

    let subject = if expired_count > 0 {
        format!("[URGENT] Credential check: {expired_count} document(s) expired")
    } else {
        "Credential check: documents approaching expiry".to_string()
    };

    let mut text = String::new();
    let _ = writeln!(text, "Hello {name},");
    let _ = writeln!(text);
    let _ = writeln!(text, "The following credentials on file need your attention:");
    for alert in alerts {
        let _ = writeln!(
            text,
            "- {} (valid until {}): {} [{}]",
            alert.document_name,
            alert.expiry_date,
            days_phrase(alert.days_remaining),
            alert.level.label()
        );
    }
    let _ = writeln!(text);
    let _ = writeln!(
        text,
        "Please renew and upload the updated documents to the instructor portal."
    );
    let _ = writeln!(
        text,
        "Under Part-FCL and Part-DTO, instructors are responsible for keeping their ratings current."
    );

    let mut rows = String::new();
    for alert in alerts {
        let _ = writeln!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            alert.document_name,
            alert.expiry_date,
            days_phrase(alert.days_remaining),
            alert.level.label()
        );
    }
    let html = format!(
        "<html><body><p>Hello <strong>{name}</strong>,</p>\
         <p>The following credentials on file need your attention:</p>\
         <table><thead><tr><th>Document</th><th>Valid until</th><th>Status</th><th>Level</th></tr></thead>\
         <tbody>{rows}</tbody></table>\
         <p>Please renew and upload the updated documents to the instructor portal.</p>\
         </body></html>"
    );

    EmailMessage {
        subject,
        html,
        text,
    }
}

/// Daily digest for the admin mailbox: every alert in the scan, info tier
/// included, grouped per instructor in scan order.
pub fn render_admin_digest(alerts: &[ExpiryAlert]) -> EmailMessage {
    let summary = expiry::summarize(alerts);
    let subject = format!(
        "[DIGEST] Credential watch: {} alert(s) ({} expired, {} critical)",
        summary.total, summary.expired, summary.critical
    );

    let mut text = String::new();
    let _ = writeln!(text, "Credential expiry digest");
    let _ = writeln!(
        text,
        "{} alert(s): {} expired, {} critical, {} warning, {} info",
        summary.total, summary.expired, summary.critical, summary.warning, summary.info
    );
    let _ = writeln!(text);

    let mut rows = String::new();
    for (email, group) in expiry::group_by_recipient(alerts) {
        let _ = writeln!(text, "{} <{}>", group.name, email);
        for alert in &group.alerts {
            let _ = writeln!(
                text,
                "  - {} (valid until {}): {} [{}]",
                alert.document_name,
                alert.expiry_date,
                days_phrase(alert.days_remaining),
                alert.level.label()
            );
            let _ = writeln!(
                rows,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                group.name,
                alert.document_name,
                alert.expiry_date,
                alert.level.label()
            );
        }
    }

    let html = format!(
        "<html><body><p>Credential expiry digest: <strong>{}</strong> alert(s).</p>\
         <table><thead><tr><th>Instructor</th><th>Document</th><th>Valid until</th><th>Level</th></tr></thead>\
         <tbody>{rows}</tbody></table></body></html>",
        summary.total
    );

    EmailMessage {
        subject,
        html,
        text,
    }
}

/// Markdown credential-status report written by the `report` subcommand.
pub fn build_report(scope: Option<&str>, as_of: NaiveDate, alerts: &[ExpiryAlert]) -> String {
    let summary = expiry::summarize(alerts);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all instructors");

    let _ = writeln!(output, "# Credential Expiry Report");
    let _ = writeln!(output, "Generated for {} (as of {})", scope_label, as_of);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- expired: {}", summary.expired);
    let _ = writeln!(output, "- critical: {}", summary.critical);
    let _ = writeln!(output, "- warning: {}", summary.warning);
    let _ = writeln!(output, "- info: {}", summary.info);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Document Mix");

    let mut by_kind: HashMap<DocumentKind, usize> = HashMap::new();
    for alert in alerts {
        *by_kind.entry(alert.document_kind).or_insert(0) += 1;
    }
    if by_kind.is_empty() {
        let _ = writeln!(output, "No documents inside the 90-day horizon.");
    } else {
        let mut kinds: Vec<(DocumentKind, usize)> = by_kind.into_iter().collect();
        kinds.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.as_str().cmp(b.0.as_str())));
        for (kind, count) in kinds {
            let _ = writeln!(output, "- {}: {} alert(s)", kind.display_name(), count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Most Urgent");

    if alerts.is_empty() {
        let _ = writeln!(output, "No credentials need attention.");
    } else {
        for alert in alerts.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}) {}: {} [{}]",
                alert.instructor_name,
                alert.instructor_email,
                alert.document_name,
                days_phrase(alert.days_remaining),
                alert.level.label()
            );
        }
    }

    output
}
