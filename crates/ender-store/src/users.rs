//! User account catalogue access

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db::{decode_ts, encode_ts};
use crate::error::{Result, StoreError};
use crate::models::User;

fn scan_user(row: &SqliteRow) -> Result<User> {
    let created_at: String = row.try_get("created_at")?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        created_at: decode_ts(&created_at)?,
        password_hash: row.try_get("password_hash")?,
    })
}

/// Access to the `users` table.
#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> Result<User> {
        let row = sqlx::query(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("user", id))?;
        scan_user(&row)
    }

    pub async fn get_by_email(&self, email: &str) -> Result<User> {
        let row = sqlx::query(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("user", email))?;
        scan_user(&row)
    }

    pub async fn insert(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(encode_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update(&self, id: &str, username: &str, email: &str) -> Result<User> {
        let result = sqlx::query("UPDATE users SET username = ?, email = ? WHERE id = ?")
            .bind(username)
            .bind(email)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("user", id));
        }
        self.get(id).await
    }

    pub async fn set_password_hash(&self, id: &str, hash: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("user", id));
        }
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("user", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    fn sample_user(id: &str, email: &str) -> User {
        User {
            id: id.to_string(),
            username: format!("user-{id}"),
            email: email.to_string(),
            created_at: Utc::now(),
            password_hash: "$argon2id$fake".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let store = UserStore::new(connect_in_memory().await.unwrap());
        store
            .insert(&sample_user("u1", "a@example.com"))
            .await
            .unwrap();

        let by_id = store.get("u1").await.unwrap();
        assert_eq!(by_id.email, "a@example.com");

        let by_email = store.get_by_email("a@example.com").await.unwrap();
        assert_eq!(by_email.id, "u1");
        assert_eq!(by_email.password_hash, "$argon2id$fake");
    }

    #[tokio::test]
    async fn test_unique_email_enforced() {
        let store = UserStore::new(connect_in_memory().await.unwrap());
        store
            .insert(&sample_user("u1", "a@example.com"))
            .await
            .unwrap();
        assert!(store
            .insert(&sample_user("u2", "a@example.com"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = UserStore::new(connect_in_memory().await.unwrap());
        store
            .insert(&sample_user("u1", "a@example.com"))
            .await
            .unwrap();

        let updated = store.update("u1", "renamed", "b@example.com").await.unwrap();
        assert_eq!(updated.username, "renamed");

        store.set_password_hash("u1", "$argon2id$new").await.unwrap();
        assert_eq!(store.get("u1").await.unwrap().password_hash, "$argon2id$new");

        store.delete("u1").await.unwrap();
        assert!(matches!(
            store.get("u1").await,
            Err(StoreError::NotFound { .. })
        ));
    }
}
