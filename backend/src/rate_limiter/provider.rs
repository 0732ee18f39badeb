// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use sqlx::PgPool;

use super::{Allowance, RLKey, StorageProvider};

pub struct RLPostgresStorage {
    pool: PgPool,
}

impl RLPostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        RLPostgresStorage { pool }
    }
}

#[async_trait::async_trait]
impl StorageProvider for RLPostgresStorage {
    async fn get(&self, key: &RLKey) -> Option<Allowance> {
        Allowance::load(&self.pool, key).await.ok().flatten()
    }

    async fn set(&self, key: RLKey, allowance: Allowance) {
        if let Err(e) = allowance.store(&self.pool, &key).await {
            tracing::error!(%e, "failed to store allowance in postgres");
        }
    }
}

pub mod persistence {
    use sqlx::{
        query, query_as,
        types::chrono::{DateTime, Utc},
        PgExecutor,
    };

    use crate::{errors::StorageError, rate_limiter::RLKey};

    use super::Allowance;

    impl Allowance {
        pub(in crate::rate_limiter) async fn load(
            connection: impl PgExecutor<'_>,
            key: &RLKey,
        ) -> Result<Option<Allowance>, StorageError> {
            struct AllowanceRecord {
                remaining: i64,
                valid_until: DateTime<Utc>,
            }

            let record = query_as!(
                AllowanceRecord,
                r#"SELECT
                    remaining AS "remaining: _",
                    valid_until AS "valid_until: _"
                FROM allowance_records
                WHERE key_value = $1"#,
                key.serialize(),
            )
            .fetch_optional(connection)
            .await?;
            Ok(record.map(|record| Allowance {
                remaining: record.remaining as u64,
                valid_until: record.valid_until,
            }))
        }

        pub(in crate::rate_limiter) async fn store(
            &self,
            connection: impl PgExecutor<'_>,
            key: &RLKey,
        ) -> Result<(), StorageError> {
            query!(
                "INSERT INTO allowance_records
                    (key_value, remaining, valid_until)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (key_value) DO UPDATE
                    SET remaining = EXCLUDED.remaining, valid_until = EXCLUDED.valid_until",
                key.serialize(),
                self.remaining as i64,
                DateTime::<Utc>::from(self.valid_until),
            )
            .execute(connection)
            .await?;
            Ok(())
        }

        #[allow(dead_code)]
        pub(in crate::rate_limiter) async fn delete_expired(
            connection: impl PgExecutor<'_>,
        ) -> Result<(), sqlx::Error> {
            query!("DELETE FROM allowance_records WHERE valid_until < NOW()")
                .execute(connection)
                .await?;
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use chrono::TimeDelta;
        use sqlx::PgPool;

        use super::*;

        async fn store_random_allowance(pool: &PgPool, key: &RLKey) -> anyhow::Result<Allowance> {
            let allowance = Allowance {
                remaining: 10,
                valid_until: Utc::now() + TimeDelta::hours(1),
            };
            allowance.store(pool, key).await?;
            Ok(allowance)
        }

        #[sqlx::test]
        async fn load_allowance(pool: PgPool) -> anyhow::Result<()> {
            let key = RLKey::new(b"test_limiter", &[]);
            let allowance = store_random_allowance(&pool, &key).await?;

            let loaded = Allowance::load(&pool, &key)
                .await?
                .expect("missing allowance record");
            assert_eq!(loaded, allowance);

            Ok(())
        }

        #[sqlx::test]
        async fn delete_expired_allowances(pool: PgPool) -> anyhow::Result<()> {
            let key = RLKey::new(b"test_limiter", &[]);
            let allowance = store_random_allowance(&pool, &key).await?;

            Allowance::delete_expired(&pool).await?;

            let loaded = Allowance::load(&pool, &key)
                .await?
                .expect("missing allowance record");
            assert_eq!(loaded, allowance);

            let expired_key = RLKey::new(b"expired_limiter", &[]);
            let expired_allowance = Allowance {
                remaining: 0,
                valid_until: Utc::now() - TimeDelta::weeks(1),
            };
            expired_allowance.store(&pool, &expired_key).await?;

            Allowance::delete_expired(&pool).await?;

            let loaded_expired = Allowance::load(&pool, &expired_key).await?;
            assert!(loaded_expired.is_none());

            Ok(())
        }
    }
}
