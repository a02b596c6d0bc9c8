use tracing::info;

use super::core::Database;
use crate::TARGET_DB;

impl Database {
    pub(crate) async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS players (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                normalized_name TEXT NOT NULL UNIQUE,
                country TEXT NOT NULL DEFAULT '',
                height TEXT NOT NULL DEFAULT '',
                positions TEXT NOT NULL DEFAULT '',
                age TEXT NOT NULL DEFAULT '',
                shirt_no TEXT NOT NULL DEFAULT '',
                player_img TEXT NOT NULL DEFAULT '',
                club_img TEXT NOT NULL DEFAULT '',
                source_ref TEXT,
                fetched_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS teams (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                normalized_name TEXT NOT NULL UNIQUE,
                team_img TEXT NOT NULL DEFAULT '',
                source_ref TEXT,
                fetched_at TEXT NOT NULL
            );

            -- Related records; position keeps the order they were scraped in
            CREATE TABLE IF NOT EXISTS player_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                player_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                tournament TEXT NOT NULL,
                apps TEXT NOT NULL,
                goals TEXT NOT NULL,
                assists TEXT NOT NULL,
                yellow TEXT NOT NULL,
                red TEXT NOT NULL,
                motm TEXT NOT NULL,
                rating TEXT NOT NULL,
                FOREIGN KEY (player_id) REFERENCES players (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_player_stats_player_id ON player_stats (player_id);

            CREATE TABLE IF NOT EXISTS team_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                tournament TEXT NOT NULL,
                apps TEXT NOT NULL,
                goals TEXT NOT NULL,
                shots_pg TEXT NOT NULL,
                poss TEXT NOT NULL,
                passes TEXT NOT NULL,
                rating TEXT NOT NULL,
                FOREIGN KEY (team_id) REFERENCES teams (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_team_stats_team_id ON team_stats (team_id);

            CREATE TABLE IF NOT EXISTS team_fixtures (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                league TEXT NOT NULL,
                date TEXT NOT NULL,
                home TEXT NOT NULL,
                result TEXT NOT NULL,
                away TEXT NOT NULL,
                FOREIGN KEY (team_id) REFERENCES teams (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_team_fixtures_team_id ON team_fixtures (team_id);

            CREATE TABLE IF NOT EXISTS team_players (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                img TEXT NOT NULL,
                dob TEXT NOT NULL,
                nat TEXT NOT NULL,
                market_value TEXT NOT NULL,
                FOREIGN KEY (team_id) REFERENCES teams (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_team_players_team_id ON team_players (team_id);

            -- News pools are keyed by the name attached at scrape time
            CREATE TABLE IF NOT EXISTS news (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_kind TEXT NOT NULL, -- PLAYER, TEAM
                owner_name TEXT NOT NULL,
                normalized_owner TEXT NOT NULL,
                position INTEGER NOT NULL,
                news_img TEXT NOT NULL,
                news_link TEXT NOT NULL,
                news_title TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_news_owner ON news (entity_kind, normalized_owner);

            CREATE TABLE IF NOT EXISTS entity_aliases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_kind TEXT NOT NULL,
                normalized_alias TEXT NOT NULL,
                normalized_canonical TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (entity_kind, normalized_alias)
            );
            CREATE INDEX IF NOT EXISTS idx_entity_aliases_canonical ON entity_aliases (entity_kind, normalized_canonical);
            "#,
        )
        .execute(&mut *conn)
        .await?;
        info!(target: TARGET_DB, "Tables ensured to exist");

        Ok(())
    }
}
