use tracing::{debug, instrument};

use super::core::Database;
use super::entity::entity_table;
use crate::entity::{normalize, EntityKey, EntityKind};
use crate::error::StoreError;
use crate::TARGET_DB;

impl Database {
    /// Canonical normalized name an alias points to, if one is registered
    pub(super) async fn alias_target(
        &self,
        kind: EntityKind,
        normalized_alias: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT normalized_canonical
            FROM entity_aliases
            WHERE entity_kind = ?1 AND normalized_alias = ?2
            "#,
        )
        .bind(kind.to_string())
        .bind(normalized_alias)
        .fetch_optional(self.pool())
        .await
    }

    #[instrument(target = "db", level = "debug", skip(self))]
    pub(super) async fn register_alias(
        &self,
        alias: &EntityKey,
        canonical: &str,
    ) -> Result<(), StoreError> {
        let normalized_canonical = normalize(canonical);
        let normalized_alias = alias.normalized();
        let table = entity_table(alias.kind);

        let canonical_exists = sqlx::query(&format!(
            "SELECT 1 FROM {} WHERE normalized_name = ?1",
            table
        ))
        .bind(&normalized_canonical)
        .fetch_optional(self.pool())
        .await?
        .is_some();
        if !canonical_exists {
            return Err(StoreError::Missing(EntityKey::new(alias.kind, canonical)));
        }

        // A name that is itself a stored entity never becomes an alias
        let alias_is_entity = sqlx::query(&format!(
            "SELECT 1 FROM {} WHERE normalized_name = ?1",
            table
        ))
        .bind(&normalized_alias)
        .fetch_optional(self.pool())
        .await?
        .is_some();
        if normalized_alias == normalized_canonical || alias_is_entity {
            debug!(
                target: TARGET_DB,
                "Skipping alias {} for {}", alias, canonical
            );
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO entity_aliases (entity_kind, normalized_alias, normalized_canonical, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(entity_kind, normalized_alias) DO UPDATE SET
                normalized_canonical = excluded.normalized_canonical
            "#,
        )
        .bind(alias.kind.to_string())
        .bind(&normalized_alias)
        .bind(&normalized_canonical)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;

        debug!(target: TARGET_DB, "Alias {} -> {}", alias, canonical);
        Ok(())
    }
}
