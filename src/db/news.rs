use sqlx::{Row, SqliteConnection};
use std::collections::BTreeSet;

use super::core::Database;
use crate::entity::{normalize, EntityKey, EntityKind, NewsItem};
use crate::store::NewsReplace;

impl Database {
    pub(super) async fn news_for(
        &self,
        kind: EntityKind,
        normalized_owner: &str,
    ) -> Result<Vec<NewsItem>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT news_img, news_link, news_title
            FROM news
            WHERE entity_kind = ?1 AND normalized_owner = ?2
            ORDER BY position
            "#,
        )
        .bind(kind.to_string())
        .bind(normalized_owner)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(NewsItem {
                    news_img: row.try_get("news_img")?,
                    news_link: row.try_get("news_link")?,
                    news_title: row.try_get("news_title")?,
                })
            })
            .collect()
    }

    /// One name per stored news pool, as written when the pool was stored
    pub(super) async fn news_owner_names(
        &self,
        kind: EntityKind,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT MIN(owner_name) AS owner
            FROM news
            WHERE entity_kind = ?1
            GROUP BY normalized_owner
            ORDER BY owner
            "#,
        )
        .bind(kind.to_string())
        .fetch_all(self.pool())
        .await
    }
}

/// Normalized owners whose pools a news replace deletes, each once
fn cleared_owners(key: &EntityKey, news: &NewsReplace) -> BTreeSet<String> {
    let mut cleared: BTreeSet<String> = news.clear_owners.iter().map(|o| normalize(o)).collect();
    cleared.insert(key.normalized());
    cleared
}

/// Clear the listed pools plus the canonical one, then insert the new items
pub(super) async fn replace_news(
    conn: &mut SqliteConnection,
    key: &EntityKey,
    news: &NewsReplace,
) -> Result<(), sqlx::Error> {
    let kind = key.kind.to_string();
    let canonical = key.normalized();

    for owner in &cleared_owners(key, news) {
        sqlx::query("DELETE FROM news WHERE entity_kind = ?1 AND normalized_owner = ?2")
            .bind(&kind)
            .bind(owner)
            .execute(&mut *conn)
            .await?;
    }

    for (position, item) in news.items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO news (entity_kind, owner_name, normalized_owner, position,
                              news_img, news_link, news_title)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&kind)
        .bind(&key.name)
        .bind(&canonical)
        .bind(position as i64)
        .bind(&item.news_img)
        .bind(&item.news_link)
        .bind(&item.news_title)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::cleared_owners;
    use crate::db::Database;
    use crate::entity::{EntityKey, EntityKind, EntityProfile, NewsItem, TeamProfile};
    use crate::store::{EntityStore, NewsReplace, SnapshotWrite};

    fn news_write(name: &str, clear_owners: &[&str], titles: &[&str]) -> SnapshotWrite {
        let mut write = SnapshotWrite::new(
            EntityKey::team(name),
            EntityProfile::Team(TeamProfile {
                name: name.to_string(),
                team_img: String::new(),
            }),
            chrono::Utc::now(),
        );
        write.news = Some(NewsReplace {
            clear_owners: clear_owners.iter().map(|s| s.to_string()).collect(),
            items: titles
                .iter()
                .map(|t| NewsItem {
                    news_title: t.to_string(),
                    ..Default::default()
                })
                .collect(),
        });
        write
    }

    #[tokio::test]
    async fn test_pool_reassigned_to_canonical_owner() {
        let db = Database::in_memory().await.unwrap();
        db.put(news_write("Chelsea FC", &[], &["old one", "old two"]))
            .await
            .unwrap();
        assert_eq!(
            db.news_owners(EntityKind::Team).await.unwrap(),
            vec!["Chelsea FC".to_string()]
        );

        let snapshot = db
            .put(news_write("Chelsea", &["Chelsea FC"], &["fresh"]))
            .await
            .unwrap();

        assert_eq!(snapshot.news.len(), 1);
        assert_eq!(snapshot.news[0].news_title, "fresh");
        assert_eq!(
            db.news_owners(EntityKind::Team).await.unwrap(),
            vec!["Chelsea".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unrelated_pools_survive() {
        let db = Database::in_memory().await.unwrap();
        db.put(news_write("Arsenal", &[], &["gunners"])).await.unwrap();
        db.put(news_write("Chelsea", &[], &["blues"])).await.unwrap();
        db.put(news_write("Chelsea", &[], &["blues again"]))
            .await
            .unwrap();

        let arsenal = db.get(&EntityKey::team("Arsenal")).await.unwrap().unwrap();
        assert_eq!(arsenal.news[0].news_title, "gunners");
        assert_eq!(db.news_owners(EntityKind::Team).await.unwrap().len(), 2);
    }

    #[test]
    fn test_cleared_owners_are_distinct() {
        let replace = NewsReplace {
            clear_owners: vec![
                "Chelsea FC".into(),
                "The Blues".into(),
                "chelsea fc".into(),
                "Chelsea".into(),
            ],
            items: vec![],
        };
        let cleared: Vec<String> = cleared_owners(&EntityKey::team("Chelsea"), &replace)
            .into_iter()
            .collect();
        assert_eq!(cleared, vec!["chelsea", "chelsea fc", "the blues"]);
    }

    #[tokio::test]
    async fn test_repeated_owners_replace_once() {
        let db = Database::in_memory().await.unwrap();
        db.put(news_write("Chelsea FC", &[], &["old"])).await.unwrap();

        let snapshot = db
            .put(news_write(
                "Chelsea",
                &["Chelsea FC", "Chelsea", "chelsea fc"],
                &["fresh"],
            ))
            .await
            .unwrap();

        assert_eq!(snapshot.news.len(), 1);
        assert_eq!(
            db.news_owners(EntityKind::Team).await.unwrap(),
            vec!["Chelsea".to_string()]
        );
    }
}
