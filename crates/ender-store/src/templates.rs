//! Template (blueprint) catalogue access
//!
//! Tags, JVM args and engine properties live in JSON text columns; deleting
//! a template still referenced by a server fails on the foreign key.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db::encode_ts;
use crate::error::{Result, StoreError};
use crate::models::Template;

const TEMPLATE_COLUMNS: &str = "id, name, description, minecraft_version, java_version, \
     server_type, min_memory_mb, max_memory_mb, tags_json, jvm_args_json, properties_json, \
     archive_path, startup_command";

fn scan_template(row: &SqliteRow) -> Result<Template> {
    let tags_json: String = row.try_get("tags_json")?;
    let jvm_args_json: String = row.try_get("jvm_args_json")?;
    let properties_json: String = row.try_get("properties_json")?;

    Ok(Template {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        minecraft_version: row.try_get("minecraft_version")?,
        java_version: row.try_get("java_version")?,
        server_type: row.try_get("server_type")?,
        min_memory_mb: row.try_get("min_memory_mb")?,
        max_memory_mb: row.try_get("max_memory_mb")?,
        tags: serde_json::from_str(&tags_json)?,
        jvm_args: serde_json::from_str(&jvm_args_json)?,
        properties: serde_json::from_str(&properties_json)?,
        archive_path: row.try_get("archive_path")?,
        startup_command: row.try_get("startup_command")?,
    })
}

/// Access to the `templates` table.
#[derive(Clone)]
pub struct TemplateStore {
    pool: SqlitePool,
}

impl TemplateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<Template>> {
        let rows = sqlx::query(&format!("SELECT {TEMPLATE_COLUMNS} FROM templates"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(scan_template).collect()
    }

    pub async fn get(&self, id: &str) -> Result<Template> {
        let row = sqlx::query(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("template", id))?;
        scan_template(&row)
    }

    pub async fn insert(&self, template: &Template) -> Result<()> {
        sqlx::query(
            "INSERT INTO templates (id, name, description, minecraft_version, java_version, \
             server_type, min_memory_mb, max_memory_mb, tags_json, jvm_args_json, \
             properties_json, archive_path, startup_command, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&template.id)
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.minecraft_version)
        .bind(&template.java_version)
        .bind(&template.server_type)
        .bind(template.min_memory_mb)
        .bind(template.max_memory_mb)
        .bind(serde_json::to_string(&template.tags)?)
        .bind(serde_json::to_string(&template.jvm_args)?)
        .bind(serde_json::to_string(&template.properties)?)
        .bind(&template.archive_path)
        .bind(&template.startup_command)
        .bind(encode_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update(&self, id: &str, template: &Template) -> Result<Template> {
        let result = sqlx::query(
            "UPDATE templates SET name = ?, description = ?, minecraft_version = ?, \
             java_version = ?, server_type = ?, min_memory_mb = ?, max_memory_mb = ?, \
             tags_json = ?, jvm_args_json = ?, properties_json = ?, archive_path = ?, \
             startup_command = ? WHERE id = ?",
        )
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.minecraft_version)
        .bind(&template.java_version)
        .bind(&template.server_type)
        .bind(template.min_memory_mb)
        .bind(template.max_memory_mb)
        .bind(serde_json::to_string(&template.tags)?)
        .bind(serde_json::to_string(&template.jvm_args)?)
        .bind(serde_json::to_string(&template.properties)?)
        .bind(&template.archive_path)
        .bind(&template.startup_command)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("template", id));
        }
        self.get(id).await
    }

    /// Fails with a constraint violation while any server references the
    /// template.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM templates WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("template", id));
        }
        Ok(())
    }
}
