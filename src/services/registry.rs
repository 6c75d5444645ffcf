//! ObjectRegistry: the durable content hash to location record store.
//!
//! The registry is the single source of truth for where an object lives.
//! Every location change goes through [`ObjectRegistry::compare_and_set_location`],
//! which only writes when the row still holds the location the caller read,
//! so a manipulator acting on a stale candidate cannot clobber a newer state.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use tracing::debug;

use crate::{
    errors::TierResult,
    models::{ContentHash, ObjectLocation, ObjectRecord},
};

#[derive(Clone)]
pub struct ObjectRegistry {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl ObjectRegistry {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Cheap connectivity probe.
    pub async fn ping(&self) -> TierResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn get(&self, hash: &ContentHash) -> TierResult<Option<ObjectRecord>> {
        let record = sqlx::query_as::<_, ObjectRecord>(
            "SELECT contenthash, location, filesize, timeduplicated, timeorphaned
             FROM objects WHERE contenthash = ?",
        )
        .bind(hash)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    /// Fetch the records that exist among `hashes`, in hash order.
    pub async fn get_many(&self, hashes: &[ContentHash]) -> TierResult<Vec<ObjectRecord>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT contenthash, location, filesize, timeduplicated, timeorphaned \
             FROM objects WHERE contenthash IN (",
        );
        let mut separated = builder.separated(", ");
        for hash in hashes {
            separated.push_bind(hash.clone());
        }
        separated.push_unseparated(") ORDER BY contenthash ASC");

        let records = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(records)
    }

    /// Create the record for a newly observed hash.
    ///
    /// Returns false when a record already exists; the existing row wins.
    pub async fn insert_if_absent(
        &self,
        hash: &ContentHash,
        location: ObjectLocation,
        filesize: Option<i64>,
        now: DateTime<Utc>,
    ) -> TierResult<bool> {
        let timeduplicated = location.has_remote().then(|| now.timestamp());
        let result = sqlx::query(
            "INSERT INTO objects (contenthash, location, filesize, timeduplicated, timeorphaned)
             VALUES (?, ?, ?, ?, NULL)
             ON CONFLICT(contenthash) DO NOTHING",
        )
        .bind(hash)
        .bind(location)
        .bind(filesize)
        .bind(timeduplicated)
        .execute(&*self.db)
        .await?;

        let inserted = result.rows_affected() == 1;
        debug!(contenthash = %hash, %location, inserted, "insert_if_absent");
        Ok(inserted)
    }

    /// Atomically move `hash` from `expected` to `new`.
    ///
    /// `expected = None` matches a never-classified row. Entering DUPLICATED
    /// refreshes `timeduplicated`; entering EXTERNAL sets it only if it was
    /// never set. Entering ORPHANED stamps `timeorphaned` on first detection,
    /// and leaving ORPHANED clears it. Returns false when the row changed
    /// underneath the caller (or no longer exists).
    pub async fn compare_and_set_location(
        &self,
        hash: &ContentHash,
        expected: Option<ObjectLocation>,
        new: ObjectLocation,
        now: DateTime<Utc>,
    ) -> TierResult<bool> {
        let now = now.timestamp();
        let result = sqlx::query(
            "UPDATE objects SET
                location = ?1,
                timeduplicated = CASE
                    WHEN ?1 = ?2 THEN ?4
                    WHEN ?1 = ?3 THEN COALESCE(timeduplicated, ?4)
                    ELSE timeduplicated END,
                timeorphaned = CASE
                    WHEN ?1 = ?5 THEN COALESCE(timeorphaned, ?4)
                    ELSE NULL END
             WHERE contenthash = ?6 AND location IS ?7",
        )
        .bind(new)
        .bind(ObjectLocation::Duplicated)
        .bind(ObjectLocation::External)
        .bind(now)
        .bind(ObjectLocation::Orphaned)
        .bind(hash)
        .bind(expected)
        .execute(&*self.db)
        .await?;

        let updated = result.rows_affected() == 1;
        debug!(
            contenthash = %hash,
            from = ?expected,
            to = %new,
            updated,
            "compare_and_set_location"
        );
        Ok(updated)
    }

    /// Record a measured size. A known size is never replaced by NULL, and a
    /// larger observation wins over a smaller one.
    pub async fn update_filesize(&self, hash: &ContentHash, filesize: i64) -> TierResult<bool> {
        let result = sqlx::query(
            "UPDATE objects SET filesize = MAX(COALESCE(filesize, 0), ?)
             WHERE contenthash = ?",
        )
        .bind(filesize)
        .bind(hash)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Physically delete a record, but only while it is still ORPHANED.
    pub async fn delete_orphaned(&self, hash: &ContentHash) -> TierResult<bool> {
        let result = sqlx::query("DELETE FROM objects WHERE contenthash = ? AND location = ?")
            .bind(hash)
            .bind(ObjectLocation::Orphaned)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn hash(n: u8) -> ContentHash {
        ContentHash::parse(&format!("{:02x}", n).repeat(20)).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    async fn registry() -> ObjectRegistry {
        ObjectRegistry::new(Arc::new(db::connect_in_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn insert_if_absent_keeps_first_record() {
        let registry = registry().await;
        let h = hash(1);

        assert!(registry
            .insert_if_absent(&h, ObjectLocation::Local, Some(10), at(100))
            .await
            .unwrap());
        assert!(!registry
            .insert_if_absent(&h, ObjectLocation::External, Some(99), at(200))
            .await
            .unwrap());

        let record = registry.get(&h).await.unwrap().unwrap();
        assert_eq!(record.location, Some(ObjectLocation::Local));
        assert_eq!(record.filesize, Some(10));
        assert_eq!(record.timeduplicated, None);
    }

    #[tokio::test]
    async fn compare_and_set_rejects_stale_expectation() {
        let registry = registry().await;
        let h = hash(2);
        registry
            .insert_if_absent(&h, ObjectLocation::Local, Some(10), at(100))
            .await
            .unwrap();

        assert!(!registry
            .compare_and_set_location(
                &h,
                Some(ObjectLocation::Duplicated),
                ObjectLocation::External,
                at(150)
            )
            .await
            .unwrap());
        assert!(registry
            .compare_and_set_location(
                &h,
                Some(ObjectLocation::Local),
                ObjectLocation::Duplicated,
                at(150)
            )
            .await
            .unwrap());

        let record = registry.get(&h).await.unwrap().unwrap();
        assert_eq!(record.location, Some(ObjectLocation::Duplicated));
        assert_eq!(record.timeduplicated, Some(150));
    }

    #[tokio::test]
    async fn compare_and_set_matches_null_location() {
        let registry = registry().await;
        let h = hash(3);
        sqlx::query("INSERT INTO objects (contenthash) VALUES (?)")
            .bind(&h)
            .execute(registry.pool())
            .await
            .unwrap();

        assert!(registry
            .compare_and_set_location(&h, None, ObjectLocation::Local, at(10))
            .await
            .unwrap());
        let record = registry.get(&h).await.unwrap().unwrap();
        assert_eq!(record.location, Some(ObjectLocation::Local));
    }

    #[tokio::test]
    async fn timeduplicated_is_refreshed_not_cleared() {
        let registry = registry().await;
        let h = hash(4);
        registry
            .insert_if_absent(&h, ObjectLocation::Duplicated, Some(10), at(100))
            .await
            .unwrap();
        registry
            .compare_and_set_location(
                &h,
                Some(ObjectLocation::Duplicated),
                ObjectLocation::External,
                at(200),
            )
            .await
            .unwrap();
        assert_eq!(
            registry.get(&h).await.unwrap().unwrap().timeduplicated,
            Some(100)
        );

        registry
            .compare_and_set_location(
                &h,
                Some(ObjectLocation::External),
                ObjectLocation::Error,
                at(300),
            )
            .await
            .unwrap();
        assert_eq!(
            registry.get(&h).await.unwrap().unwrap().timeduplicated,
            Some(100)
        );

        registry
            .compare_and_set_location(
                &h,
                Some(ObjectLocation::Error),
                ObjectLocation::Duplicated,
                at(400),
            )
            .await
            .unwrap();
        assert_eq!(
            registry.get(&h).await.unwrap().unwrap().timeduplicated,
            Some(400)
        );
    }

    #[tokio::test]
    async fn timeorphaned_set_once_and_cleared_on_exit() {
        let registry = registry().await;
        let h = hash(5);
        registry
            .insert_if_absent(&h, ObjectLocation::Local, Some(10), at(100))
            .await
            .unwrap();
        registry
            .compare_and_set_location(
                &h,
                Some(ObjectLocation::Local),
                ObjectLocation::Orphaned,
                at(500),
            )
            .await
            .unwrap();
        assert_eq!(
            registry.get(&h).await.unwrap().unwrap().timeorphaned,
            Some(500)
        );

        registry
            .compare_and_set_location(
                &h,
                Some(ObjectLocation::Orphaned),
                ObjectLocation::Local,
                at(600),
            )
            .await
            .unwrap();
        assert_eq!(registry.get(&h).await.unwrap().unwrap().timeorphaned, None);
    }

    #[tokio::test]
    async fn filesize_never_regresses() {
        let registry = registry().await;
        let h = hash(6);
        registry
            .insert_if_absent(&h, ObjectLocation::Local, None, at(100))
            .await
            .unwrap();

        registry.update_filesize(&h, 50).await.unwrap();
        registry.update_filesize(&h, 20).await.unwrap();
        assert_eq!(registry.get(&h).await.unwrap().unwrap().filesize, Some(50));
    }

    #[tokio::test]
    async fn delete_orphaned_requires_orphaned_state() {
        let registry = registry().await;
        let h = hash(7);
        registry
            .insert_if_absent(&h, ObjectLocation::Local, Some(1), at(100))
            .await
            .unwrap();
        assert!(!registry.delete_orphaned(&h).await.unwrap());

        registry
            .compare_and_set_location(
                &h,
                Some(ObjectLocation::Local),
                ObjectLocation::Orphaned,
                at(100),
            )
            .await
            .unwrap();
        assert!(registry.delete_orphaned(&h).await.unwrap());
        assert!(registry.get(&h).await.unwrap().is_none());
    }
}
