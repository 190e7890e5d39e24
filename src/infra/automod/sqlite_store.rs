// SQLite-backed automod storage.
//
// Tables:
// - automod_config: Per-guild moderation settings (tiers and immune roles as JSON)
// - automod_rules: Rule definitions as JSON, keyed by (guild_id, rule_id)
// - automod_infractions: Append-only infraction ledger

use crate::core::automod::{
    AutomodError, AutomodRule, ConfigStore, EscalationTier, GuildModerationConfig, Infraction,
    InfractionSource, InfractionStore, InfractionType, NewInfraction, RuleStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

pub struct SqliteAutomodStore {
    pool: Pool<Sqlite>,
    points_window: Option<Duration>,
}

fn storage_err(e: impl std::fmt::Display) -> AutomodError {
    AutomodError::StorageError(e.to_string())
}

impl SqliteAutomodStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;

        let store = Self {
            pool,
            points_window: None,
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Only count points from infractions newer than `window`. `None` = all time.
    pub fn with_points_window(mut self, window: Option<Duration>) -> Self {
        self.points_window = window;
        self
    }

    async fn migrate(&self) -> Result<(), AutomodError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS automod_config (
                guild_id INTEGER PRIMARY KEY,
                automod_enabled BOOLEAN NOT NULL DEFAULT 0,
                immune_roles TEXT NOT NULL DEFAULT '[]',
                escalation_tiers TEXT NOT NULL DEFAULT '[]',
                log_channel_id INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS automod_rules (
                guild_id INTEGER NOT NULL,
                rule_id INTEGER NOT NULL,
                enabled BOOLEAN NOT NULL DEFAULT 1,
                definition TEXT NOT NULL,
                PRIMARY KEY (guild_id, rule_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS automod_infractions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                source TEXT NOT NULL,
                infraction_type TEXT NOT NULL,
                reason TEXT NOT NULL,
                rule_id INTEGER,
                rule_name TEXT,
                matched_content TEXT,
                points_assigned INTEGER NOT NULL DEFAULT 0,
                channel_id INTEGER,
                message_id INTEGER,
                escalation_points INTEGER,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_automod_infractions_member
                ON automod_infractions(guild_id, user_id, created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Write a guild's settings. Used by seeding; enforcement only reads.
    pub async fn save_config(
        &self,
        guild_id: u64,
        config: &GuildModerationConfig,
    ) -> Result<(), AutomodError> {
        let immune_roles = serde_json::to_string(&config.immune_roles).map_err(storage_err)?;
        let tiers = serde_json::to_string(&config.escalation_tiers).map_err(storage_err)?;

        sqlx::query(
            r#"
            INSERT INTO automod_config (guild_id, automod_enabled, immune_roles, escalation_tiers, log_channel_id)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(guild_id) DO UPDATE SET
                automod_enabled = excluded.automod_enabled,
                immune_roles = excluded.immune_roles,
                escalation_tiers = excluded.escalation_tiers,
                log_channel_id = excluded.log_channel_id
            "#,
        )
        .bind(guild_id as i64)
        .bind(config.automod_enabled)
        .bind(immune_roles)
        .bind(tiers)
        .bind(config.log_channel_id.map(|id| id as i64))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    /// Insert or replace a rule. Callers validate first.
    pub async fn upsert_rule(&self, rule: &AutomodRule) -> Result<(), AutomodError> {
        let definition = serde_json::to_string(rule).map_err(storage_err)?;

        sqlx::query(
            r#"
            INSERT INTO automod_rules (guild_id, rule_id, enabled, definition)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(guild_id, rule_id) DO UPDATE SET
                enabled = excluded.enabled,
                definition = excluded.definition
            "#,
        )
        .bind(rule.guild_id as i64)
        .bind(rule.id as i64)
        .bind(rule.enabled)
        .bind(definition)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}

// Fixed-width UTC timestamps so text comparison orders them correctly.
fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn infraction_from_row(row: &SqliteRow) -> Result<Infraction, AutomodError> {
    let source: String = row.get("source");
    let source = match source.as_str() {
        "AUTOMOD" => InfractionSource::Automod,
        other => return Err(storage_err(format!("unknown infraction source '{}'", other))),
    };
    let type_str: String = row.get("infraction_type");
    let infraction_type = InfractionType::parse(&type_str)
        .ok_or_else(|| storage_err(format!("unknown infraction type '{}'", type_str)))?;
    let created_at: String = row.get("created_at");

    Ok(Infraction {
        id: row.get::<i64, _>("id") as u64,
        guild_id: row.get::<i64, _>("guild_id") as u64,
        user_id: row.get::<i64, _>("user_id") as u64,
        source,
        infraction_type,
        reason: row.get("reason"),
        rule_id: row.get::<Option<i64>, _>("rule_id").map(|v| v as u64),
        rule_name: row.get("rule_name"),
        matched_content: row.get("matched_content"),
        points_assigned: row.get::<i64, _>("points_assigned") as u32,
        channel_id: row.get::<Option<i64>, _>("channel_id").map(|v| v as u64),
        message_id: row.get::<Option<i64>, _>("message_id").map(|v| v as u64),
        escalation_points: row
            .get::<Option<i64>, _>("escalation_points")
            .map(|v| v as u32),
        created_at: parse_timestamp(&created_at),
    })
}

#[async_trait]
impl ConfigStore for SqliteAutomodStore {
    async fn get_config(&self, guild_id: u64) -> Result<Option<GuildModerationConfig>, AutomodError> {
        let row = sqlx::query("SELECT * FROM automod_config WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let immune_roles: String = row.get("immune_roles");
        let tiers: String = row.get("escalation_tiers");
        Ok(Some(GuildModerationConfig {
            automod_enabled: row.get("automod_enabled"),
            immune_roles: serde_json::from_str(&immune_roles).map_err(storage_err)?,
            escalation_tiers: serde_json::from_str::<Vec<EscalationTier>>(&tiers)
                .map_err(storage_err)?,
            log_channel_id: row
                .get::<Option<i64>, _>("log_channel_id")
                .map(|v| v as u64),
        }))
    }
}

#[async_trait]
impl RuleStore for SqliteAutomodStore {
    async fn get_enabled_rules(&self, guild_id: u64) -> Result<Vec<AutomodRule>, AutomodError> {
        let rows = sqlx::query(
            "SELECT rule_id, definition FROM automod_rules WHERE guild_id = ? AND enabled = 1",
        )
        .bind(guild_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let definition: String = row.get("definition");
            match serde_json::from_str::<AutomodRule>(&definition) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    tracing::warn!(
                        guild_id,
                        rule_id = row.get::<i64, _>("rule_id"),
                        error = %e,
                        "Skipping unreadable automod rule"
                    );
                }
            }
        }
        Ok(rules)
    }
}

#[async_trait]
impl InfractionStore for SqliteAutomodStore {
    async fn record_infraction(&self, infraction: NewInfraction) -> Result<Infraction, AutomodError> {
        let result = sqlx::query(
            r#"
            INSERT INTO automod_infractions (
                guild_id, user_id, source, infraction_type, reason, rule_id, rule_name,
                matched_content, points_assigned, channel_id, message_id, escalation_points,
                created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(infraction.guild_id as i64)
        .bind(infraction.user_id as i64)
        .bind(infraction.source.as_str())
        .bind(infraction.infraction_type.as_str())
        .bind(&infraction.reason)
        .bind(infraction.rule_id.map(|v| v as i64))
        .bind(&infraction.rule_name)
        .bind(&infraction.matched_content)
        .bind(infraction.points_assigned as i64)
        .bind(infraction.channel_id.map(|v| v as i64))
        .bind(infraction.message_id.map(|v| v as i64))
        .bind(infraction.escalation_points.map(|v| v as i64))
        .bind(format_timestamp(infraction.created_at))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(Infraction::from_new(
            result.last_insert_rowid() as u64,
            infraction,
        ))
    }

    async fn active_points(&self, guild_id: u64, user_id: u64) -> Result<u32, AutomodError> {
        // Epoch lower bound when there is no window.
        let since = self
            .points_window
            .and_then(|w| Utc::now().checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(points_assigned), 0) AS total
            FROM automod_infractions
            WHERE guild_id = ? AND user_id = ? AND created_at >= ?
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .bind(format_timestamp(since))
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;

        let total: i64 = row.get("total");
        Ok(total.clamp(0, u32::MAX as i64) as u32)
    }

    async fn escalation_recorded_at(
        &self,
        guild_id: u64,
        user_id: u64,
        points: u32,
    ) -> Result<bool, AutomodError> {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM automod_infractions
            WHERE guild_id = ? AND user_id = ? AND infraction_type = ? AND escalation_points = ?
            LIMIT 1
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .bind(InfractionType::Escalation.as_str())
        .bind(points as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.is_some())
    }

    async fn recent_infractions(
        &self,
        guild_id: u64,
        user_id: u64,
        limit: usize,
    ) -> Result<Vec<Infraction>, AutomodError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM automod_infractions
            WHERE guild_id = ? AND user_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(infraction_from_row).collect()
    }
}
