use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    AlertLevel, DocumentKind, DocumentRecord, InstructorRecord, NotificationLogEntry,
};
use crate::notify::NotificationLedger;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let today = Utc::now().date_naive();
    let instructors = vec![
        (
            Uuid::parse_str("7b1d9c8e-51a3-4f2b-9c6d-2f8e03b1a6f4")?,
            "Adam Nowak",
            "adam.nowak@sierrazulu.example",
            "PL.FCL.FI-1023",
        ),
        (
            Uuid::parse_str("1f4a2b3c-8d7e-4a5b-b1c2-d3e4f5a6b7c8")?,
            "Ewa Wilk",
            "ewa.wilk@sierrazulu.example",
            "PL.FCL.FI-0877",
        ),
        (
            Uuid::parse_str("c9b8a7d6-e5f4-4321-a0b1-c2d3e4f5a6b7")?,
            "Piotr Zawadzki",
            "piotr.zawadzki@sierrazulu.example",
            "PL.FCL.CRI-0412",
        ),
    ];

    for (id, name, email, license_number) in instructors {
        sqlx::query(
            r#"
            INSERT INTO credential_watch.instructors (id, full_name, email, role, license_number)
            VALUES ($1, $2, $3, 'instructor', $4)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, license_number = EXCLUDED.license_number
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(license_number)
        .execute(pool)
        .await?;
    }

    // Offsets relative to today so the seed always demonstrates each tier.
    let documents: Vec<(&str, DocumentKind, Option<i64>)> = vec![
        ("adam.nowak@sierrazulu.example", DocumentKind::Medical, Some(-4)),
        ("adam.nowak@sierrazulu.example", DocumentKind::License, Some(5)),
        ("adam.nowak@sierrazulu.example", DocumentKind::Logbook, None),
        ("ewa.wilk@sierrazulu.example", DocumentKind::Radio, Some(21)),
        ("ewa.wilk@sierrazulu.example", DocumentKind::Medical, Some(75)),
        ("piotr.zawadzki@sierrazulu.example", DocumentKind::Identity, Some(200)),
    ];

    for (email, kind, days_out) in documents {
        let instructor_id: Uuid =
            sqlx::query("SELECT id FROM credential_watch.instructors WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?
                .get("id");

        let expiry_date = days_out.map(|d| today + Duration::days(d));

        // reruns must not re-issue (and archive) unchanged documents
        let unchanged: bool = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM credential_watch.documents
                WHERE instructor_id = $1
                  AND doc_type = $2
                  AND expiry_date IS NOT DISTINCT FROM $3
                  AND NOT is_archived
            ) AS present
            "#,
        )
        .bind(instructor_id)
        .bind(kind.as_str())
        .bind(expiry_date)
        .fetch_one(pool)
        .await?
        .get("present");

        if !unchanged {
            upsert_document(
                pool,
                instructor_id,
                kind,
                kind.display_name(),
                expiry_date,
            )
            .await?;
        }
    }

    Ok(())
}

/// Inserts a document, archiving any active document of the same type for
/// the same instructor in the same transaction. Keeps the at-most-one
/// active document per (instructor, type) invariant.
pub async fn upsert_document(
    pool: &PgPool,
    instructor_id: Uuid,
    kind: DocumentKind,
    name: &str,
    expiry_date: Option<NaiveDate>,
) -> anyhow::Result<Uuid> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE credential_watch.documents
        SET is_archived = TRUE
        WHERE instructor_id = $1 AND doc_type = $2 AND NOT is_archived
        "#,
    )
    .bind(instructor_id)
    .bind(kind.as_str())
    .execute(&mut *tx)
    .await?;

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO credential_watch.documents
        (id, instructor_id, name, doc_type, expiry_date, is_archived)
        VALUES ($1, $2, $3, $4, $5, FALSE)
        "#,
    )
    .bind(id)
    .bind(instructor_id)
    .bind(name)
    .bind(kind.as_str())
    .bind(expiry_date)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(id)
}

/// Loads instructor-role accounts with their active documents. Rows whose
/// document type falls outside the closed set are skipped rather than
/// failing the whole fetch.
pub async fn fetch_instructors(
    pool: &PgPool,
    email: Option<&str>,
) -> anyhow::Result<Vec<InstructorRecord>> {
    let mut query = String::from(
        "SELECT i.id AS instructor_id, i.full_name, i.email, \
         d.id AS document_id, d.name AS document_name, d.doc_type, d.expiry_date \
         FROM credential_watch.instructors i \
         LEFT JOIN credential_watch.documents d \
           ON d.instructor_id = i.id AND NOT d.is_archived \
         WHERE i.role = 'instructor'",
    );
    if email.is_some() {
        query.push_str(" AND i.email = $1");
    }
    query.push_str(" ORDER BY i.email, d.expiry_date");

    let mut rows = sqlx::query(&query);
    if let Some(value) = email {
        rows = rows.bind(value.to_lowercase());
    }
    let records = rows.fetch_all(pool).await?;

    let mut instructors: Vec<InstructorRecord> = Vec::new();
    for row in records {
        let instructor_id: Uuid = row.get("instructor_id");
        if instructors.last().map(|i| i.id) != Some(instructor_id) {
            instructors.push(InstructorRecord {
                id: instructor_id,
                full_name: row.get("full_name"),
                email: row.get("email"),
                documents: Vec::new(),
            });
        }

        let document_id: Option<Uuid> = row.get("document_id");
        let Some(document_id) = document_id else {
            continue;
        };
        let doc_type: String = row.get("doc_type");
        let Some(kind) = DocumentKind::parse(&doc_type) else {
            continue;
        };

        if let Some(instructor) = instructors.last_mut() {
            instructor.documents.push(DocumentRecord {
                id: document_id,
                name: row.get("document_name"),
                kind,
                expiry_date: row.get("expiry_date"),
                is_archived: false,
            });
        }
    }

    Ok(instructors)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        email: String,
        document_type: String,
        document_name: Option<String>,
        expiry_date: Option<NaiveDate>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let kind = DocumentKind::parse(&row.document_type)
            .with_context(|| format!("unknown document type '{}'", row.document_type))?;

        let instructor_id: Uuid = sqlx::query(
            r#"
            INSERT INTO credential_watch.instructors (id, full_name, email, role)
            VALUES ($1, $2, $3, 'instructor')
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.full_name)
        .bind(row.email.to_lowercase())
        .fetch_one(pool)
        .await?
        .get("id");

        let name = row
            .document_name
            .unwrap_or_else(|| kind.display_name().to_string());
        upsert_document(pool, instructor_id, kind, &name, row.expiry_date).await?;
        inserted += 1;
    }

    Ok(inserted)
}

pub async fn fetch_history(pool: &PgPool, limit: i64) -> anyhow::Result<Vec<NotificationLogEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT id, alert_level, recipient_email, recipient_name, document_type,
               document_name, expiry_date, days_remaining, sent_at, email_sent, error_message
        FROM credential_watch.notification_log
        ORDER BY sent_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::new();
    for row in rows {
        let level: String = row.get("alert_level");
        let doc_type: String = row.get("document_type");
        entries.push(NotificationLogEntry {
            id: row.get("id"),
            alert_level: AlertLevel::parse(&level)
                .with_context(|| format!("unknown alert level '{level}' in notification log"))?,
            recipient_email: row.get("recipient_email"),
            recipient_name: row.get("recipient_name"),
            document_kind: DocumentKind::parse(&doc_type)
                .with_context(|| format!("unknown document type '{doc_type}' in notification log"))?,
            document_name: row.get("document_name"),
            expiry_date: row.get("expiry_date"),
            days_remaining: row.get("days_remaining"),
            sent_at: row.get("sent_at"),
            email_sent: row.get("email_sent"),
            error_message: row.get("error_message"),
        });
    }

    Ok(entries)
}

/// Ledger backed by the notification_log table. "Today" is the calendar
/// day of the database server's clock, which the deployment keeps in the
/// same timezone as the dispatching process.
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationLedger for PgLedger {
    async fn was_sent_today(
        &self,
        recipient_email: &str,
        document_kind: DocumentKind,
        level: AlertLevel,
        today: NaiveDate,
    ) -> anyhow::Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM credential_watch.notification_log
                WHERE recipient_email = $1
                  AND document_type = $2
                  AND alert_level = $3
                  AND email_sent
                  AND DATE(sent_at) = $4
            ) AS sent
            "#,
        )
        .bind(recipient_email)
        .bind(document_kind.as_str())
        .bind(level.as_str())
        .bind(today)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("sent"))
    }

    async fn record(&self, entry: &NotificationLogEntry) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO credential_watch.notification_log
            (id, alert_level, recipient_email, recipient_name, document_type,
             document_name, expiry_date, days_remaining, sent_at, email_sent, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id)
        .bind(entry.alert_level.as_str())
        .bind(&entry.recipient_email)
        .bind(&entry.recipient_name)
        .bind(entry.document_kind.as_str())
        .bind(&entry.document_name)
        .bind(entry.expiry_date)
        .bind(entry.days_remaining)
        .bind(entry.sent_at)
        .bind(entry.email_sent)
        .bind(entry.error_message.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
