//! Database queries for the record store.

use custodia_core::db::unix_timestamp;
use sqlx::{Sqlite, Transaction};

use super::db::{DatabaseError, RecordDatabase};
use super::models::{StoredRecord, Tags};

async fn replace_tags(
    tx: &mut Transaction<'_, Sqlite>,
    record_type: &str,
    id: &str,
    tags: &Tags,
) -> Result<(), DatabaseError> {
    sqlx::query("DELETE FROM record_tags WHERE record_type = ? AND record_id = ?")
        .bind(record_type)
        .bind(id)
        .execute(&mut **tx)
        .await?;

    for (name, value) in tags {
        sqlx::query(
            "INSERT INTO record_tags (record_type, record_id, name, value) VALUES (?, ?, ?, ?)",
        )
        .bind(record_type)
        .bind(id)
        .bind(name)
        .bind(value)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

impl RecordDatabase {
    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert a new record and its tags.
    pub async fn insert_record(
        &self,
        record_type: &str,
        id: &str,
        value: &str,
        tags: &Tags,
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO records (record_type, id, value, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record_type)
        .bind(id)
        .bind(value)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        replace_tags(&mut tx, record_type, id, tags).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Replace a record's value and tags in one transaction.
    pub async fn update_record(
        &self,
        record_type: &str,
        id: &str,
        value: &str,
        tags: &Tags,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE records SET value = ?, updated_at = ? WHERE record_type = ? AND id = ?",
        )
        .bind(value)
        .bind(unix_timestamp())
        .bind(record_type)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("{record_type} {id}")));
        }

        replace_tags(&mut tx, record_type, id, tags).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Replace a record only while its stored `state` tag still reads
    /// `expected_state`. Returns `false` when another writer moved it first.
    pub async fn update_record_in_state(
        &self,
        record_type: &str,
        id: &str,
        expected_state: &str,
        value: &str,
        tags: &Tags,
    ) -> Result<bool, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE records SET value = ?, updated_at = ? \
             WHERE record_type = ? AND id = ? AND EXISTS (SELECT 1 FROM record_tags t \
             WHERE t.record_type = records.record_type AND t.record_id = records.id \
             AND t.name = 'state' AND t.value = ?)",
        )
        .bind(value)
        .bind(unix_timestamp())
        .bind(record_type)
        .bind(id)
        .bind(expected_state)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<(i64,)> =
                sqlx::query_as("SELECT 1 FROM records WHERE record_type = ? AND id = ?")
                    .bind(record_type)
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return match exists {
                Some(_) => Ok(false),
                None => Err(DatabaseError::NotFound(format!("{record_type} {id}"))),
            };
        }

        replace_tags(&mut tx, record_type, id, tags).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Delete a record. Returns whether a row existed.
    pub async fn delete_record(&self, record_type: &str, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM records WHERE record_type = ? AND id = ?")
            .bind(record_type)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn find_record(
        &self,
        record_type: &str,
        id: &str,
    ) -> Result<Option<StoredRecord>, DatabaseError> {
        Ok(sqlx::query_as::<_, StoredRecord>(
            "SELECT * FROM records WHERE record_type = ? AND id = ?",
        )
        .bind(record_type)
        .bind(id)
        .fetch_optional(self.pool())
        .await?)
    }

    pub async fn get_record(
        &self,
        record_type: &str,
        id: &str,
    ) -> Result<StoredRecord, DatabaseError> {
        self.find_record(record_type, id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("{record_type} {id}")))
    }

    /// Records of `record_type` carrying every tag in `query`, oldest first.
    pub async fn find_records(
        &self,
        record_type: &str,
        query: &Tags,
    ) -> Result<Vec<StoredRecord>, DatabaseError> {
        let mut sql = String::from("SELECT r.* FROM records r WHERE r.record_type = ?");
        for _ in query {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM record_tags t WHERE t.record_type = r.record_type \
                 AND t.record_id = r.id AND t.name = ? AND t.value = ?)",
            );
        }
        sql.push_str(" ORDER BY r.created_at, r.rowid");

        let mut statement = sqlx::query_as::<_, StoredRecord>(&sql).bind(record_type);
        for (name, value) in query {
            statement = statement.bind(name).bind(value);
        }
        Ok(statement.fetch_all(self.pool()).await?)
    }

    pub async fn record_tags(&self, record_type: &str, id: &str) -> Result<Tags, DatabaseError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT name, value FROM record_tags WHERE record_type = ? AND record_id = ?",
        )
        .bind(record_type)
        .bind(id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().collect())
    }
}
