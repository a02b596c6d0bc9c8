use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};
use tracing::{debug, instrument};

use super::core::Database;
use crate::entity::{
    EntityKey, EntityKind, EntityProfile, EntitySnapshot, Fixture, PlayerProfile, PlayerStatLine,
    RosterEntry, StatLine, TeamProfile, TeamStatLine,
};
use crate::error::StoreError;
use crate::store::{EntityStore, SnapshotWrite};
use crate::TARGET_DB;

pub(super) fn entity_table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Player => "players",
        EntityKind::Team => "teams",
    }
}

fn parse_timestamp(table: &'static str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table,
            reason: format!("fetched_at '{}': {}", value, e),
        })
}

impl Database {
    /// Normalized name of the stored entity a key refers to, directly or via alias
    pub(super) async fn resolve_normalized(
        &self,
        key: &EntityKey,
    ) -> Result<Option<String>, sqlx::Error> {
        let normalized = key.normalized();
        let direct = sqlx::query(&format!(
            "SELECT 1 FROM {} WHERE normalized_name = ?1",
            entity_table(key.kind)
        ))
        .bind(&normalized)
        .fetch_optional(self.pool())
        .await?;

        if direct.is_some() {
            return Ok(Some(normalized));
        }

        self.alias_target(key.kind, &normalized).await
    }

    async fn load_snapshot(
        &self,
        kind: EntityKind,
        normalized: &str,
    ) -> Result<Option<EntitySnapshot>, StoreError> {
        let mut conn = self.pool().acquire().await?;
        let table = entity_table(kind);

        let Some(row) = sqlx::query(&format!(
            "SELECT * FROM {} WHERE normalized_name = ?1",
            table
        ))
        .bind(normalized)
        .fetch_optional(&mut *conn)
        .await?
        else {
            return Ok(None);
        };

        let id: i64 = row.try_get("id")?;
        let name: String = row.try_get("name")?;
        let fetched_at: String = row.try_get("fetched_at")?;
        let source_ref: Option<String> = row.try_get("source_ref")?;

        let (profile, stats, fixtures, roster) = match kind {
            EntityKind::Player => {
                let profile = EntityProfile::Player(PlayerProfile {
                    name: name.clone(),
                    country: row.try_get("country")?,
                    height: row.try_get("height")?,
                    positions: row.try_get("positions")?,
                    age: row.try_get("age")?,
                    shirt_no: row.try_get("shirt_no")?,
                    player_img: row.try_get("player_img")?,
                    club_img: row.try_get("club_img")?,
                });
                let stats = load_player_stats(&mut *conn, id).await?;
                (profile, stats, Vec::new(), Vec::new())
            }
            EntityKind::Team => {
                let profile = EntityProfile::Team(TeamProfile {
                    name: name.clone(),
                    team_img: row.try_get("team_img")?,
                });
                let stats = load_team_stats(&mut *conn, id).await?;
                let fixtures = load_fixtures(&mut *conn, id).await?;
                let roster = load_roster(&mut *conn, id).await?;
                (profile, stats, fixtures, roster)
            }
        };
        drop(conn);

        let news = self.news_for(kind, normalized).await?;

        Ok(Some(EntitySnapshot {
            key: EntityKey::new(kind, name),
            profile,
            stats,
            fixtures,
            roster,
            news,
            fetched_at: parse_timestamp(table, &fetched_at)?,
            source_ref,
        }))
    }
}

async fn load_player_stats(
    conn: &mut SqliteConnection,
    player_id: i64,
) -> Result<Vec<StatLine>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT tournament, apps, goals, assists, yellow, red, motm, rating
        FROM player_stats
        WHERE player_id = ?1
        ORDER BY position
        "#,
    )
    .bind(player_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(StatLine::Player(PlayerStatLine {
                tournament: row.try_get("tournament")?,
                apps: row.try_get("apps")?,
                goals: row.try_get("goals")?,
                assists: row.try_get("assists")?,
                yellow: row.try_get("yellow")?,
                red: row.try_get("red")?,
                motm: row.try_get("motm")?,
                rating: row.try_get("rating")?,
            }))
        })
        .collect()
}

async fn load_team_stats(
    conn: &mut SqliteConnection,
    team_id: i64,
) -> Result<Vec<StatLine>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT tournament, apps, goals, shots_pg, poss, passes, rating
        FROM team_stats
        WHERE team_id = ?1
        ORDER BY position
        "#,
    )
    .bind(team_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(StatLine::Team(TeamStatLine {
                tournament: row.try_get("tournament")?,
                apps: row.try_get("apps")?,
                goals: row.try_get("goals")?,
                shots_pg: row.try_get("shots_pg")?,
                poss: row.try_get("poss")?,
                passes: row.try_get("passes")?,
                rating: row.try_get("rating")?,
            }))
        })
        .collect()
}

async fn load_fixtures(
    conn: &mut SqliteConnection,
    team_id: i64,
) -> Result<Vec<Fixture>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT league, date, home, result, away FROM team_fixtures WHERE team_id = ?1 ORDER BY position",
    )
    .bind(team_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(Fixture {
                league: row.try_get("league")?,
                date: row.try_get("date")?,
                home: row.try_get("home")?,
                result: row.try_get("result")?,
                away: row.try_get("away")?,
            })
        })
        .collect()
}

async fn load_roster(
    conn: &mut SqliteConnection,
    team_id: i64,
) -> Result<Vec<RosterEntry>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT name, img, dob, nat, market_value FROM team_players WHERE team_id = ?1 ORDER BY position",
    )
    .bind(team_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(RosterEntry {
                name: row.try_get("name")?,
                img: row.try_get("img")?,
                dob: row.try_get("dob")?,
                nat: row.try_get("nat")?,
                market_value: row.try_get("market_value")?,
            })
        })
        .collect()
}

/// Insert or update the entity row, keeping the first stored spelling of its name
async fn upsert_entity(
    conn: &mut SqliteConnection,
    write: &SnapshotWrite,
) -> Result<i64, StoreError> {
    let normalized = write.key.normalized();
    let fetched_at = write.fetched_at.to_rfc3339();

    let row = match &write.profile {
        EntityProfile::Player(p) => {
            sqlx::query(
                r#"
                INSERT INTO players (name, normalized_name, country, height, positions, age,
                                     shirt_no, player_img, club_img, source_ref, fetched_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(normalized_name) DO UPDATE SET
                    country = excluded.country,
                    height = excluded.height,
                    positions = excluded.positions,
                    age = excluded.age,
                    shirt_no = excluded.shirt_no,
                    player_img = excluded.player_img,
                    club_img = excluded.club_img,
                    source_ref = excluded.source_ref,
                    fetched_at = excluded.fetched_at
                RETURNING id
                "#,
            )
            .bind(&write.key.name)
            .bind(&normalized)
            .bind(&p.country)
            .bind(&p.height)
            .bind(&p.positions)
            .bind(&p.age)
            .bind(&p.shirt_no)
            .bind(&p.player_img)
            .bind(&p.club_img)
            .bind(&write.source_ref)
            .bind(&fetched_at)
            .fetch_one(&mut *conn)
            .await?
        }
        EntityProfile::Team(t) => {
            sqlx::query(
                r#"
                INSERT INTO teams (name, normalized_name, team_img, source_ref, fetched_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(normalized_name) DO UPDATE SET
                    team_img = excluded.team_img,
                    source_ref = excluded.source_ref,
                    fetched_at = excluded.fetched_at
                RETURNING id
                "#,
            )
            .bind(&write.key.name)
            .bind(&normalized)
            .bind(&t.team_img)
            .bind(&write.source_ref)
            .bind(&fetched_at)
            .fetch_one(&mut *conn)
            .await?
        }
    };

    Ok(row.try_get("id")?)
}

async fn replace_stats(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    owner_id: i64,
    stats: &[StatLine],
) -> Result<(), StoreError> {
    match kind {
        EntityKind::Player => {
            sqlx::query("DELETE FROM player_stats WHERE player_id = ?1")
                .bind(owner_id)
                .execute(&mut *conn)
                .await?;
        }
        EntityKind::Team => {
            sqlx::query("DELETE FROM team_stats WHERE team_id = ?1")
                .bind(owner_id)
                .execute(&mut *conn)
                .await?;
        }
    }

    for (position, line) in stats.iter().enumerate() {
        match (kind, line) {
            (EntityKind::Player, StatLine::Player(s)) => {
                sqlx::query(
                    r#"
                    INSERT INTO player_stats (player_id, position, tournament, apps, goals,
                                              assists, yellow, red, motm, rating)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    "#,
                )
                .bind(owner_id)
                .bind(position as i64)
                .bind(&s.tournament)
                .bind(&s.apps)
                .bind(&s.goals)
                .bind(&s.assists)
                .bind(&s.yellow)
                .bind(&s.red)
                .bind(&s.motm)
                .bind(&s.rating)
                .execute(&mut *conn)
                .await?;
            }
            (EntityKind::Team, StatLine::Team(s)) => {
                sqlx::query(
                    r#"
                    INSERT INTO team_stats (team_id, position, tournament, apps, goals,
                                            shots_pg, poss, passes, rating)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                )
                .bind(owner_id)
                .bind(position as i64)
                .bind(&s.tournament)
                .bind(&s.apps)
                .bind(&s.goals)
                .bind(&s.shots_pg)
                .bind(&s.poss)
                .bind(&s.passes)
                .bind(&s.rating)
                .execute(&mut *conn)
                .await?;
            }
            _ => {
                return Err(StoreError::Corrupt {
                    table: entity_table(kind),
                    reason: "stat line does not belong to this entity kind".to_string(),
                })
            }
        }
    }
    Ok(())
}

async fn replace_fixtures(
    conn: &mut SqliteConnection,
    team_id: i64,
    fixtures: &[Fixture],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM team_fixtures WHERE team_id = ?1")
        .bind(team_id)
        .execute(&mut *conn)
        .await?;

    for (position, f) in fixtures.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO team_fixtures (team_id, position, league, date, home, result, away)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(team_id)
        .bind(position as i64)
        .bind(&f.league)
        .bind(&f.date)
        .bind(&f.home)
        .bind(&f.result)
        .bind(&f.away)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn replace_roster(
    conn: &mut SqliteConnection,
    team_id: i64,
    roster: &[RosterEntry],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM team_players WHERE team_id = ?1")
        .bind(team_id)
        .execute(&mut *conn)
        .await?;

    for (position, p) in roster.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO team_players (team_id, position, name, img, dob, nat, market_value)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(team_id)
        .bind(position as i64)
        .bind(&p.name)
        .bind(&p.img)
        .bind(&p.dob)
        .bind(&p.nat)
        .bind(&p.market_value)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl EntityStore for Database {
    async fn get(&self, key: &EntityKey) -> Result<Option<EntitySnapshot>, StoreError> {
        match self.resolve_normalized(key).await? {
            Some(normalized) => self.load_snapshot(key.kind, &normalized).await,
            None => Ok(None),
        }
    }

    #[instrument(target = "db", level = "debug", skip(self, write), fields(key = %write.key))]
    async fn put(&self, write: SnapshotWrite) -> Result<EntitySnapshot, StoreError> {
        let kind = write.key.kind;
        if write.profile.kind() != kind {
            return Err(StoreError::Corrupt {
                table: entity_table(kind),
                reason: format!("{} profile written under {}", write.profile.kind(), write.key),
            });
        }

        let mut transaction = self.pool().begin().await?;
        let owner_id = upsert_entity(&mut *transaction, &write).await?;

        if let Some(stats) = &write.stats {
            replace_stats(&mut *transaction, kind, owner_id, stats).await?;
        }
        if let (EntityKind::Team, Some(fixtures)) = (kind, &write.fixtures) {
            replace_fixtures(&mut *transaction, owner_id, fixtures).await?;
        }
        if let (EntityKind::Team, Some(roster)) = (kind, &write.roster) {
            replace_roster(&mut *transaction, owner_id, roster).await?;
        }
        if let Some(news) = &write.news {
            super::news::replace_news(&mut *transaction, &write.key, news).await?;
        }

        transaction.commit().await?;
        debug!(
            target: TARGET_DB,
            "Stored {} replacing {:?}", write.key, write.replaced_categories()
        );

        self.load_snapshot(kind, &write.key.normalized())
            .await?
            .ok_or(StoreError::Missing(write.key))
    }

    async fn delete(&self, key: &EntityKey) -> Result<bool, StoreError> {
        let Some(normalized) = self.resolve_normalized(key).await? else {
            return Ok(false);
        };

        let mut transaction = self.pool().begin().await?;
        sqlx::query(&format!(
            "DELETE FROM {} WHERE normalized_name = ?1",
            entity_table(key.kind)
        ))
        .bind(&normalized)
        .execute(&mut *transaction)
        .await?;
        sqlx::query("DELETE FROM news WHERE entity_kind = ?1 AND normalized_owner = ?2")
            .bind(key.kind.to_string())
            .bind(&normalized)
            .execute(&mut *transaction)
            .await?;
        sqlx::query(
            "DELETE FROM entity_aliases WHERE entity_kind = ?1 AND normalized_canonical = ?2",
        )
        .bind(key.kind.to_string())
        .bind(&normalized)
        .execute(&mut *transaction)
        .await?;
        transaction.commit().await?;

        debug!(target: TARGET_DB, "Deleted {}", key);
        Ok(true)
    }

    async fn list_keys(&self, kind: EntityKind) -> Result<Vec<EntityKey>, StoreError> {
        let names: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT name FROM {} ORDER BY name",
            entity_table(kind)
        ))
        .fetch_all(self.pool())
        .await?;

        Ok(names
            .into_iter()
            .map(|name| EntityKey::new(kind, name))
            .collect())
    }

    async fn news_owners(&self, kind: EntityKind) -> Result<Vec<String>, StoreError> {
        Ok(self.news_owner_names(kind).await?)
    }

    async fn add_alias(&self, alias: &EntityKey, canonical: &str) -> Result<(), StoreError> {
        self.register_alias(alias, canonical).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::NewsItem;
    use crate::store::NewsReplace;

    fn team_write(name: &str) -> SnapshotWrite {
        SnapshotWrite::new(
            EntityKey::team(name),
            EntityProfile::Team(TeamProfile {
                name: name.to_string(),
                team_img: "crest.png".into(),
            }),
            Utc::now(),
        )
    }

    fn team_stat(tournament: &str, goals: &str) -> StatLine {
        StatLine::Team(TeamStatLine {
            tournament: tournament.into(),
            goals: goals.into(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_round_trip_keeps_order_and_categories() {
        let db = Database::in_memory().await.unwrap();

        let mut write = team_write("Chelsea");
        write.stats = Some(vec![team_stat("Premier League", "77"), team_stat("FA Cup", "9")]);
        write.fixtures = Some(vec![Fixture {
            league: "EPL".into(),
            home: "Chelsea".into(),
            away: "Arsenal".into(),
            ..Default::default()
        }]);
        write.news = Some(NewsReplace {
            clear_owners: vec![],
            items: vec![NewsItem {
                news_title: "Chelsea win".into(),
                ..Default::default()
            }],
        });
        write.source_ref = Some("https://example.test/chelsea".into());
        db.put(write).await.unwrap();

        let snapshot = db.get(&EntityKey::team("CHELSEA")).await.unwrap().unwrap();
        assert_eq!(snapshot.key.name, "Chelsea");
        assert_eq!(
            snapshot.stats,
            vec![team_stat("Premier League", "77"), team_stat("FA Cup", "9")]
        );
        assert_eq!(snapshot.fixtures.len(), 1);
        assert_eq!(snapshot.news.len(), 1);
        assert_eq!(snapshot.source_ref.as_deref(), Some("https://example.test/chelsea"));
    }

    #[tokio::test]
    async fn test_partial_write_leaves_other_categories() {
        let db = Database::in_memory().await.unwrap();

        let mut write = team_write("Arsenal");
        write.stats = Some(vec![team_stat("Premier League", "80")]);
        write.roster = Some(vec![RosterEntry {
            name: "Bukayo Saka".into(),
            ..Default::default()
        }]);
        db.put(write).await.unwrap();

        let mut write = team_write("Arsenal");
        write.stats = Some(vec![team_stat("Premier League", "81")]);
        let snapshot = db.put(write).await.unwrap();

        assert_eq!(snapshot.stats, vec![team_stat("Premier League", "81")]);
        assert_eq!(snapshot.roster.len(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_stat_line_rolls_back() {
        let db = Database::in_memory().await.unwrap();

        let mut write = team_write("Everton");
        write.stats = Some(vec![team_stat("Premier League", "40")]);
        db.put(write).await.unwrap();

        let mut write = team_write("Everton");
        write.stats = Some(vec![
            team_stat("Premier League", "41"),
            StatLine::Player(PlayerStatLine::default()),
        ]);
        assert!(db.put(write).await.is_err());

        let snapshot = db.get(&EntityKey::team("Everton")).await.unwrap().unwrap();
        assert_eq!(snapshot.stats, vec![team_stat("Premier League", "40")]);
    }

    #[tokio::test]
    async fn test_delete_cascades_and_lists() {
        let db = Database::in_memory().await.unwrap();

        let mut write = team_write("Liverpool");
        write.stats = Some(vec![team_stat("Premier League", "70")]);
        db.put(write).await.unwrap();
        db.put(team_write("Brentford")).await.unwrap();

        let names: Vec<String> = db
            .list_keys(EntityKind::Team)
            .await
            .unwrap()
            .into_iter()
            .map(|k| k.name)
            .collect();
        assert_eq!(names, vec!["Brentford", "Liverpool"]);

        assert!(db.delete(&EntityKey::team("liverpool")).await.unwrap());
        assert!(db.get(&EntityKey::team("Liverpool")).await.unwrap().is_none());
        assert_eq!(db.collect_stats().await.unwrap(), "0:1:0:0:0:0:0:0");
    }
}
