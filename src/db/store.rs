//! Entity store: point lookups and writes used by the admin core
//!
//! Uses sqlx runtime queries instead of compile-time macros so no
//! DATABASE_URL is needed during compilation.

use crate::{
    db::models::{
        Account, AccountId, Action, IssuedPractice, KeyId, KeyPatch, NewAccount, NewKey,
        NewPerson, Permission, PracticeId, RbacObject, RegistrationKey, Person, Role, RoleId,
    },
    error::{AdminError, AdminResult},
};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

const KEY_COLUMNS: &str = "id, role_id, body, max_usages, current_usages, created_at, group_name, is_valid, invalidated_at";
const ACCOUNT_COLUMNS: &str =
    "id, login, password_hash, created_at, is_active, deactivated_at, key_id";

/// Persistence contract consumed by the mediators, the key lifecycle and the
/// registration workflow. Every lookup by key reports a miss as `NotFound`.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn account_by_id(&self, id: AccountId) -> AdminResult<Account>;
    async fn account_by_login(&self, login: &str) -> AdminResult<Account>;

    async fn key_by_id(&self, id: KeyId) -> AdminResult<RegistrationKey>;
    async fn key_by_body(&self, body: &str) -> AdminResult<RegistrationKey>;
    async fn keys_by_params(&self, limit: i64, offset: i64) -> AdminResult<Vec<RegistrationKey>>;
    async fn insert_key(&self, key: NewKey) -> AdminResult<RegistrationKey>;
    /// Apply only the fields present in `patch` and return the stored row.
    /// A guarded patch that no longer matches fails with `Conflict`.
    async fn update_key(&self, id: KeyId, patch: KeyPatch) -> AdminResult<RegistrationKey>;
    async fn exhausted_valid_keys(&self) -> AdminResult<Vec<RegistrationKey>>;
    async fn count_keys(&self) -> AdminResult<i64>;

    async fn role_by_id(&self, id: RoleId) -> AdminResult<Role>;
    async fn permissions_by_role_id(&self, role_id: RoleId) -> AdminResult<Vec<Permission>>;

    async fn save_person(&self, person: NewPerson) -> AdminResult<Person>;
    async fn hard_delete_person(&self, uuid: Uuid) -> AdminResult<()>;
    async fn save_account(&self, account: NewAccount) -> AdminResult<Account>;
    async fn hard_delete_account(&self, id: AccountId) -> AdminResult<()>;

    async fn issued_practice_by_id(&self, id: PracticeId) -> AdminResult<IssuedPractice>;

    /// Cheap liveness probe
    async fn ping(&self) -> AdminResult<()>;
}

/// SQLite-backed entity store
#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    /// Create a new store over an existing pool
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }
}

fn key_from_row(row: &SqliteRow) -> AdminResult<RegistrationKey> {
    Ok(RegistrationKey {
        id: row.try_get("id")?,
        role_id: row.try_get("role_id")?,
        body: row.try_get("body")?,
        max_usages: row.try_get("max_usages")?,
        current_usages: row.try_get("current_usages")?,
        created_at: row.try_get("created_at")?,
        group_name: row.try_get("group_name")?,
        is_valid: row.try_get("is_valid")?,
        invalidated_at: row.try_get("invalidated_at")?,
    })
}

fn account_from_row(row: &SqliteRow) -> AdminResult<Account> {
    Ok(Account {
        id: row.try_get("id")?,
        login: row.try_get("login")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
        is_active: row.try_get("is_active")?,
        deactivated_at: row.try_get("deactivated_at")?,
        key_id: row.try_get("key_id")?,
    })
}

fn permission_from_row(row: &SqliteRow) -> AdminResult<Permission> {
    Ok(Permission {
        id: row.try_get("id")?,
        role_id: row.try_get("role_id")?,
        object: RbacObject {
            id: row.try_get("object_id")?,
            name: row.try_get("object_name")?,
            lifecycle: row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("object_deleted_at")?
                .into(),
        },
        action: Action {
            id: row.try_get("action_id")?,
            name: row.try_get("action_name")?,
            lifecycle: row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("action_deleted_at")?
                .into(),
        },
    })
}

/// Map a unique-constraint violation to `Conflict`, everything else to `Database`
fn conflict_on_unique(e: sqlx::Error, what: &str) -> AdminError {
    match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AdminError::Conflict(format!("{} already exists", what))
        }
        _ => AdminError::Database(e),
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn account_by_id(&self, id: AccountId) -> AdminResult<Account> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM account WHERE id = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("account {}", id)))?;

        account_from_row(&row)
    }

    async fn account_by_login(&self, login: &str) -> AdminResult<Account> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM account WHERE login = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(login)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("account with login {}", login)))?;

        account_from_row(&row)
    }

    async fn key_by_id(&self, id: KeyId) -> AdminResult<RegistrationKey> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM registration_key WHERE id = ?1",
            KEY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("registration key {}", id)))?;

        key_from_row(&row)
    }

    async fn key_by_body(&self, body: &str) -> AdminResult<RegistrationKey> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM registration_key WHERE body = ?1",
            KEY_COLUMNS
        ))
        .bind(body)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AdminError::NotFound("registration key with given body".to_string()))?;

        key_from_row(&row)
    }

    async fn keys_by_params(&self, limit: i64, offset: i64) -> AdminResult<Vec<RegistrationKey>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM registration_key ORDER BY id LIMIT ?1 OFFSET ?2",
            KEY_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(key_from_row).collect()
    }

    async fn insert_key(&self, key: NewKey) -> AdminResult<RegistrationKey> {
        let result = sqlx::query(
            "INSERT INTO registration_key (role_id, body, max_usages, current_usages, created_at, group_name, is_valid)
             VALUES (?1, ?2, ?3, 0, ?4, ?5, 1)",
        )
        .bind(key.role_id)
        .bind(&key.body)
        .bind(key.max_usages)
        .bind(key.created_at)
        .bind(&key.group_name)
        .execute(&self.db)
        .await
        .map_err(|e| conflict_on_unique(e, "registration key body"))?;

        self.key_by_id(KeyId(result.last_insert_rowid())).await
    }

    async fn update_key(&self, id: KeyId, patch: KeyPatch) -> AdminResult<RegistrationKey> {
        if patch.is_empty() {
            return self.key_by_id(id).await;
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE registration_key SET ");
        let mut assignments = query.separated(", ");
        if let Some(current_usages) = patch.current_usages {
            assignments.push("current_usages = ");
            assignments.push_bind_unseparated(current_usages);
        }
        if let Some(is_valid) = patch.is_valid {
            assignments.push("is_valid = ");
            assignments.push_bind_unseparated(is_valid);
        }
        if let Some(invalidated_at) = patch.invalidated_at {
            assignments.push("invalidated_at = ");
            assignments.push_bind_unseparated(invalidated_at);
        }

        query.push(" WHERE id = ");
        query.push_bind(id);

        if let Some(expected) = patch.expected_usages {
            query.push(" AND is_valid = 1 AND current_usages = ");
            query.push_bind(expected);
            if let Some(next) = patch.current_usages {
                query.push(" AND max_usages >= ");
                query.push_bind(next);
            }
        }

        let result = query.build().execute(&self.db).await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing row from a guard that no longer holds
            let current = self.key_by_id(id).await?;
            return Err(AdminError::Conflict(format!(
                "registration key {} changed concurrently (usage {} of {}, valid: {})",
                id, current.current_usages, current.max_usages, current.is_valid
            )));
        }

        self.key_by_id(id).await
    }

    async fn exhausted_valid_keys(&self) -> AdminResult<Vec<RegistrationKey>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM registration_key WHERE is_valid = 1 AND current_usages >= max_usages ORDER BY id",
            KEY_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(key_from_row).collect()
    }

    async fn count_keys(&self) -> AdminResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM registration_key")
            .fetch_one(&self.db)
            .await?;

        Ok(count)
    }

    async fn role_by_id(&self, id: RoleId) -> AdminResult<Role> {
        let row = sqlx::query("SELECT id, name, deleted_at FROM role WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("role {}", id)))?;

        Ok(Role {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            lifecycle: row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("deleted_at")?
                .into(),
        })
    }

    async fn permissions_by_role_id(&self, role_id: RoleId) -> AdminResult<Vec<Permission>> {
        let rows = sqlx::query(
            "SELECT p.id, p.role_id,
                    o.id AS object_id, o.name AS object_name, o.deleted_at AS object_deleted_at,
                    a.id AS action_id, a.name AS action_name, a.deleted_at AS action_deleted_at
             FROM permission p
             JOIN rbac_object o ON o.id = p.object_id
             JOIN action a ON a.id = p.action_id
             WHERE p.role_id = ?1
             ORDER BY p.id",
        )
        .bind(role_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(permission_from_row).collect()
    }

    async fn save_person(&self, person: NewPerson) -> AdminResult<Person> {
        sqlx::query(
            "INSERT INTO person (uuid, first_name, middle_name, last_name, account_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(person.uuid)
        .bind(&person.first_name)
        .bind(&person.middle_name)
        .bind(&person.last_name)
        .bind(person.account_id)
        .execute(&self.db)
        .await?;

        Ok(Person {
            uuid: person.uuid,
            first_name: person.first_name,
            middle_name: person.middle_name,
            last_name: person.last_name,
            account_id: person.account_id,
        })
    }

    async fn hard_delete_person(&self, uuid: Uuid) -> AdminResult<()> {
        sqlx::query("DELETE FROM person WHERE uuid = ?1")
            .bind(uuid)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn save_account(&self, account: NewAccount) -> AdminResult<Account> {
        let result = sqlx::query(
            "INSERT INTO account (login, password_hash, created_at, is_active, key_id)
             VALUES (?1, ?2, ?3, 1, ?4)",
        )
        .bind(&account.login)
        .bind(&account.password_hash)
        .bind(account.created_at)
        .bind(account.key_id)
        .execute(&self.db)
        .await
        .map_err(|e| conflict_on_unique(e, &format!("login {}", account.login)))?;

        Ok(Account {
            id: AccountId(result.last_insert_rowid()),
            login: account.login,
            password_hash: account.password_hash,
            created_at: account.created_at,
            is_active: true,
            deactivated_at: None,
            key_id: account.key_id,
        })
    }

    async fn hard_delete_account(&self, id: AccountId) -> AdminResult<()> {
        let result = sqlx::query("DELETE FROM account WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AdminError::NotFound(format!("account {}", id)));
        }

        Ok(())
    }

    async fn issued_practice_by_id(&self, id: PracticeId) -> AdminResult<IssuedPractice> {
        let row = sqlx::query("SELECT id, title, issued_at FROM issued_practice WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("issued practice {}", id)))?;

        let target_groups: Vec<String> = sqlx::query_scalar(
            "SELECT group_name FROM issued_practice_group WHERE practice_id = ?1 ORDER BY group_name",
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        Ok(IssuedPractice {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            target_groups,
            issued_at: row.try_get("issued_at")?,
        })
    }

    async fn ping(&self) -> AdminResult<()> {
        crate::db::test_connection(&self.db).await
    }
}
