//! Contact repository
//!
//! Contact lifecycle ownership sits elsewhere; the dispatch side reads
//! contact snapshots for rendering and updates engagement state driven
//! by delivery feedback.

use mailsurge_common::types::ContactId;
use sqlx::PgPool;

use crate::models::Contact;

/// Contact repository
#[derive(Clone)]
pub struct ContactRepository {
    pool: PgPool,
}

impl ContactRepository {
    /// Create a new contact repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch the contact snapshots for a set of IDs
    pub async fn get_many(&self, ids: &[ContactId]) -> Result<Vec<Contact>, sqlx::Error> {
        sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
    }

    /// Record a send against a contact's engagement counters
    pub async fn record_send(&self, id: ContactId) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE contacts SET
                total_emails_sent = total_emails_sent + 1,
                last_email_sent_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
