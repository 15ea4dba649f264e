mod schema;

use std::num::ParseIntError;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::models::*;
use crate::store::PersistentStore;

/// SQLite-backed [`PersistentStore`].
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(default_path()?)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    /// Every configured guild with its policy, ordered by guild id.
    pub fn list_guild_policies(&self) -> Result<Vec<(GuildId, GuildPolicy)>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT guild_id, creator_resource_id, container_id, name_template, default_capacity,
                    default_quality, auto_secondary_resource, editable
             FROM guild_policies ORDER BY CAST(guild_id AS INTEGER)",
        )?;

        let policies = stmt
            .query_map([], |row| Ok((id_column(row, 0)?, policy_from_row(row, 1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(policies)
    }
}

/// `tempvoice.db` in the platform data directory.
pub fn default_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "tempvoice")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("tempvoice.db"))
}

impl PersistentStore for Database {
    // ============================================================
    // Guild policy operations
    // ============================================================

    fn get_guild_policy(&self, guild_id: GuildId) -> Result<Option<GuildPolicy>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let policy = conn
            .query_row(
                "SELECT creator_resource_id, container_id, name_template, default_capacity,
                        default_quality, auto_secondary_resource, editable
                 FROM guild_policies WHERE guild_id = ?",
                [guild_id.to_string()],
                |row| policy_from_row(row, 0),
            )
            .optional()?;

        Ok(policy)
    }

    fn set_guild_policy(&self, guild_id: GuildId, policy: &GuildPolicy) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO guild_policies (guild_id, creator_resource_id, container_id, name_template,
                 default_capacity, default_quality, auto_secondary_resource, editable, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(guild_id) DO UPDATE SET
                 creator_resource_id = excluded.creator_resource_id,
                 container_id = excluded.container_id,
                 name_template = excluded.name_template,
                 default_capacity = excluded.default_capacity,
                 default_quality = excluded.default_quality,
                 auto_secondary_resource = excluded.auto_secondary_resource,
                 editable = excluded.editable,
                 updated_at = excluded.updated_at",
            (
                guild_id.to_string(),
                policy.creator_resource_id.to_string(),
                policy.container_id.map(|id| id.to_string()),
                &policy.name_template,
                policy.default_capacity,
                policy.default_quality,
                policy.auto_secondary_resource,
                policy.editable,
                &now,
                &now,
            ),
        )
        .with_context(|| format!("Failed to save policy for guild {}", guild_id))?;

        Ok(())
    }

    // ============================================================
    // Temporary resource operations
    // ============================================================

    fn add_temp_resource(&self, resource: &TempResource) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO temp_resources (resource_id, guild_id, owner_id, secondary_resource_id, created_at)
             VALUES (?, ?, ?, ?, ?)",
            (
                resource.resource_id.to_string(),
                resource.guild_id.to_string(),
                resource.owner_id.to_string(),
                resource.secondary_resource_id.map(|id| id.to_string()),
                resource.created_at.to_rfc3339(),
            ),
        )
        .with_context(|| format!("Failed to record channel {}", resource.resource_id))?;
        Ok(())
    }

    fn get_temp_resource(&self, resource_id: ResourceId) -> Result<Option<TempResource>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let resource = conn
            .query_row(
                "SELECT resource_id, guild_id, owner_id, secondary_resource_id, created_at
                 FROM temp_resources WHERE resource_id = ?",
                [resource_id.to_string()],
                resource_from_row,
            )
            .optional()?;

        Ok(resource)
    }

    fn remove_temp_resource(&self, resource_id: ResourceId) -> Result<bool> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM permission_grants WHERE resource_id = ?",
            [resource_id.to_string()],
        )?;
        let rows = tx.execute(
            "DELETE FROM temp_resources WHERE resource_id = ?",
            [resource_id.to_string()],
        )?;
        tx.commit()?;
        Ok(rows > 0)
    }

    fn list_temp_resources(&self, guild_id: GuildId) -> Result<Vec<TempResource>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT resource_id, guild_id, owner_id, secondary_resource_id, created_at
             FROM temp_resources WHERE guild_id = ? ORDER BY created_at, resource_id",
        )?;

        let resources = stmt
            .query_map([guild_id.to_string()], resource_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(resources)
    }

    fn list_temp_resource_guilds(&self) -> Result<Vec<GuildId>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT DISTINCT guild_id FROM temp_resources ORDER BY CAST(guild_id AS INTEGER)",
        )?;

        let guilds = stmt
            .query_map([], |row| id_column(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(guilds)
    }

    fn set_temp_resource_owner(&self, resource_id: ResourceId, owner_id: MemberId) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE temp_resources SET owner_id = ? WHERE resource_id = ?",
            (owner_id.to_string(), resource_id.to_string()),
        )?;
        Ok(rows > 0)
    }

    fn set_secondary_resource(
        &self,
        resource_id: ResourceId,
        secondary_resource_id: Option<ResourceId>,
    ) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE temp_resources SET secondary_resource_id = ? WHERE resource_id = ?",
            (
                secondary_resource_id.map(|id| id.to_string()),
                resource_id.to_string(),
            ),
        )?;
        Ok(rows > 0)
    }

    // ============================================================
    // Permission grant operations
    // ============================================================

    fn add_permission_grant(
        &self,
        resource_id: ResourceId,
        user_id: MemberId,
        mode: GrantMode,
    ) -> Result<PermissionGrant> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let now = Utc::now();

        conn.execute(
            "INSERT INTO permission_grants (resource_id, user_id, mode, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(resource_id, user_id) DO UPDATE SET
                 mode = excluded.mode,
                 created_at = excluded.created_at",
            (
                resource_id.to_string(),
                user_id.to_string(),
                mode.as_str(),
                now.to_rfc3339(),
            ),
        )?;

        Ok(PermissionGrant {
            resource_id,
            user_id,
            mode,
            created_at: now,
        })
    }

    fn list_permission_grants(&self, resource_id: ResourceId) -> Result<Vec<PermissionGrant>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT resource_id, user_id, mode, created_at
             FROM permission_grants WHERE resource_id = ? ORDER BY created_at, user_id",
        )?;

        let grants = stmt
            .query_map([resource_id.to_string()], |row| {
                Ok(PermissionGrant {
                    resource_id: id_column(row, 0)?,
                    user_id: id_column(row, 1)?,
                    mode: GrantMode::from_str(&row.get::<_, String>(2)?)
                        .unwrap_or(GrantMode::Deny),
                    created_at: parse_datetime(row.get::<_, String>(3)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(grants)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn policy_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<GuildPolicy> {
    Ok(GuildPolicy {
        creator_resource_id: id_column(row, offset)?,
        container_id: optional_id_column(row, offset + 1)?,
        name_template: row.get(offset + 2)?,
        default_capacity: row.get(offset + 3)?,
        default_quality: row.get(offset + 4)?,
        auto_secondary_resource: row.get(offset + 5)?,
        editable: row.get(offset + 6)?,
    })
}

fn resource_from_row(row: &Row<'_>) -> rusqlite::Result<TempResource> {
    Ok(TempResource {
        resource_id: id_column(row, 0)?,
        guild_id: id_column(row, 1)?,
        owner_id: id_column(row, 2)?,
        secondary_resource_id: optional_id_column(row, 3)?,
        created_at: parse_datetime(row.get::<_, String>(4)?),
    })
}

fn id_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseIntError>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_id_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = ParseIntError>,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => raw.parse().map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        }),
        None => Ok(None),
    }
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
