use super::{AccountGrant, AppGrant, CookbookGrant, PermissionError, SystemGrant};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};

/// Lookup side of the permission records. `Ok(None)` means no record (or no
/// such cookbook/app); `Err` means the lookup itself failed.
pub trait PermissionStore: Send + Sync {
    fn system(&self, user_id: i64) -> Result<Option<SystemGrant>, PermissionError>;

    fn account(&self, user_id: i64, account_id: i64)
        -> Result<Option<AccountGrant>, PermissionError>;

    fn cookbook(
        &self,
        user_id: i64,
        account_id: i64,
        cookbook_uuid: &str,
    ) -> Result<Option<CookbookGrant>, PermissionError>;

    fn app(
        &self,
        user_id: i64,
        account_id: i64,
        app_uuid: &str,
    ) -> Result<Option<AppGrant>, PermissionError>;
}

pub struct SqlitePermissionStore {
    db_path: PathBuf,
}

impl SqlitePermissionStore {
    pub fn open(db_path: &Path) -> Result<Self, PermissionError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| PermissionError::CreateParent {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, PermissionError> {
        let connection =
            Connection::open(&self.db_path).map_err(|source| PermissionError::Open {
                path: self.db_path.display().to_string(),
                source,
            })?;
        connection
            .execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(sql)?;
        Ok(connection)
    }

    fn ensure_schema(&self) -> Result<(), PermissionError> {
        self.connect()?
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS cookbooks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    account_id INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS apps (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    account_id INTEGER NOT NULL,
                    cookbook_id INTEGER NOT NULL REFERENCES cookbooks(id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS permissions_system (
                    user_id INTEGER PRIMARY KEY,
                    can_administer INTEGER NOT NULL DEFAULT 0,
                    is_owner INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS permissions_accounts (
                    user_id INTEGER NOT NULL,
                    account_id INTEGER NOT NULL,
                    can_administer INTEGER NOT NULL DEFAULT 0,
                    can_create_apps INTEGER NOT NULL DEFAULT 0,
                    can_view_apps INTEGER NOT NULL DEFAULT 0,
                    can_create_cookbooks INTEGER NOT NULL DEFAULT 0,
                    can_view_cookbooks INTEGER NOT NULL DEFAULT 0,
                    is_owner INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (user_id, account_id)
                );

                CREATE TABLE IF NOT EXISTS permissions_cookbooks (
                    user_id INTEGER NOT NULL,
                    account_id INTEGER NOT NULL,
                    cookbook_id INTEGER NOT NULL REFERENCES cookbooks(id) ON DELETE CASCADE,
                    can_view INTEGER NOT NULL DEFAULT 0,
                    can_edit INTEGER NOT NULL DEFAULT 0,
                    is_owner INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (user_id, account_id, cookbook_id)
                );

                CREATE TABLE IF NOT EXISTS permissions_apps (
                    user_id INTEGER NOT NULL,
                    account_id INTEGER NOT NULL,
                    app_id INTEGER NOT NULL REFERENCES apps(id) ON DELETE CASCADE,
                    cookbook_id INTEGER NOT NULL REFERENCES cookbooks(id) ON DELETE CASCADE,
                    can_shared INTEGER NOT NULL DEFAULT 0,
                    can_individual INTEGER NOT NULL DEFAULT 0,
                    can_administer INTEGER NOT NULL DEFAULT 0,
                    is_owner INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (user_id, account_id, app_id)
                );
                ",
            )
            .map_err(sql)
    }

    pub fn register_cookbook(&self, uuid: &str, account_id: i64) -> Result<i64, PermissionError> {
        let connection = self.connect()?;
        connection
            .execute(
                "INSERT INTO cookbooks (uuid, account_id) VALUES (?1, ?2)
                 ON CONFLICT(uuid) DO UPDATE SET account_id = excluded.account_id",
                params![uuid, account_id],
            )
            .map_err(sql)?;
        lookup_id(&connection, "cookbooks", uuid)?
            .ok_or_else(|| PermissionError::UnknownResource(uuid.to_string()))
    }

    pub fn register_app(
        &self,
        uuid: &str,
        account_id: i64,
        cookbook_uuid: &str,
    ) -> Result<i64, PermissionError> {
        let connection = self.connect()?;
        let cookbook_id = lookup_id(&connection, "cookbooks", cookbook_uuid)?
            .ok_or_else(|| PermissionError::UnknownResource(cookbook_uuid.to_string()))?;
        connection
            .execute(
                "INSERT INTO apps (uuid, account_id, cookbook_id) VALUES (?1, ?2, ?3)
                 ON CONFLICT(uuid) DO UPDATE SET
                    account_id = excluded.account_id,
                    cookbook_id = excluded.cookbook_id",
                params![uuid, account_id, cookbook_id],
            )
            .map_err(sql)?;
        lookup_id(&connection, "apps", uuid)?
            .ok_or_else(|| PermissionError::UnknownResource(uuid.to_string()))
    }

    pub fn grant_system(&self, user_id: i64, grant: &SystemGrant) -> Result<(), PermissionError> {
        self.connect()?
            .execute(
                "INSERT INTO permissions_system (user_id, can_administer, is_owner)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                    can_administer = excluded.can_administer,
                    is_owner = excluded.is_owner",
                params![user_id, grant.can_administer, grant.is_owner],
            )
            .map_err(sql)?;
        Ok(())
    }

    pub fn grant_account(
        &self,
        user_id: i64,
        account_id: i64,
        grant: &AccountGrant,
    ) -> Result<(), PermissionError> {
        self.connect()?
            .execute(
                "INSERT INTO permissions_accounts
                    (user_id, account_id, can_administer, can_create_apps, can_view_apps,
                     can_create_cookbooks, can_view_cookbooks, is_owner)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(user_id, account_id) DO UPDATE SET
                    can_administer = excluded.can_administer,
                    can_create_apps = excluded.can_create_apps,
                    can_view_apps = excluded.can_view_apps,
                    can_create_cookbooks = excluded.can_create_cookbooks,
                    can_view_cookbooks = excluded.can_view_cookbooks,
                    is_owner = excluded.is_owner",
                params![
                    user_id,
                    account_id,
                    grant.can_administer,
                    grant.can_create_apps,
                    grant.can_view_apps,
                    grant.can_create_cookbooks,
                    grant.can_view_cookbooks,
                    grant.is_owner,
                ],
            )
            .map_err(sql)?;
        Ok(())
    }

    pub fn grant_cookbook(
        &self,
        user_id: i64,
        account_id: i64,
        cookbook_uuid: &str,
        grant: &CookbookGrant,
    ) -> Result<(), PermissionError> {
        let connection = self.connect()?;
        let cookbook_id = lookup_id(&connection, "cookbooks", cookbook_uuid)?
            .ok_or_else(|| PermissionError::UnknownResource(cookbook_uuid.to_string()))?;
        connection
            .execute(
                "INSERT INTO permissions_cookbooks
                    (user_id, account_id, cookbook_id, can_view, can_edit, is_owner)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, account_id, cookbook_id) DO UPDATE SET
                    can_view = excluded.can_view,
                    can_edit = excluded.can_edit,
                    is_owner = excluded.is_owner",
                params![
                    user_id,
                    account_id,
                    cookbook_id,
                    grant.can_view,
                    grant.can_edit,
                    grant.is_owner,
                ],
            )
            .map_err(sql)?;
        Ok(())
    }

    pub fn grant_app(
        &self,
        user_id: i64,
        account_id: i64,
        app_uuid: &str,
        grant: &AppGrant,
    ) -> Result<(), PermissionError> {
        let connection = self.connect()?;
        let (app_id, cookbook_id): (i64, i64) = connection
            .query_row(
                "SELECT id, cookbook_id FROM apps WHERE uuid = ?1",
                params![app_uuid],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(sql)?
            .ok_or_else(|| PermissionError::UnknownResource(app_uuid.to_string()))?;
        connection
            .execute(
                "INSERT INTO permissions_apps
                    (user_id, account_id, app_id, cookbook_id, can_shared, can_individual,
                     can_administer, is_owner)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(user_id, account_id, app_id) DO UPDATE SET
                    can_shared = excluded.can_shared,
                    can_individual = excluded.can_individual,
                    can_administer = excluded.can_administer,
                    is_owner = excluded.is_owner",
                params![
                    user_id,
                    account_id,
                    app_id,
                    cookbook_id,
                    grant.can_shared,
                    grant.can_individual,
                    grant.can_administer,
                    grant.is_owner,
                ],
            )
            .map_err(sql)?;
        Ok(())
    }
}

impl PermissionStore for SqlitePermissionStore {
    fn system(&self, user_id: i64) -> Result<Option<SystemGrant>, PermissionError> {
        self.connect()?
            .query_row(
                "SELECT can_administer, is_owner FROM permissions_system WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(SystemGrant {
                        can_administer: row.get(0)?,
                        is_owner: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(sql)
    }

    fn account(
        &self,
        user_id: i64,
        account_id: i64,
    ) -> Result<Option<AccountGrant>, PermissionError> {
        self.connect()?
            .query_row(
                "SELECT can_administer, can_create_apps, can_view_apps,
                        can_create_cookbooks, can_view_cookbooks, is_owner
                 FROM permissions_accounts
                 WHERE user_id = ?1 AND account_id = ?2",
                params![user_id, account_id],
                |row| {
                    Ok(AccountGrant {
                        can_administer: row.get(0)?,
                        can_create_apps: row.get(1)?,
                        can_view_apps: row.get(2)?,
                        can_create_cookbooks: row.get(3)?,
                        can_view_cookbooks: row.get(4)?,
                        is_owner: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(sql)
    }

    fn cookbook(
        &self,
        user_id: i64,
        account_id: i64,
        cookbook_uuid: &str,
    ) -> Result<Option<CookbookGrant>, PermissionError> {
        self.connect()?
            .query_row(
                "SELECT p.can_view, p.can_edit, p.is_owner
                 FROM permissions_cookbooks p
                 JOIN cookbooks c ON c.id = p.cookbook_id
                 WHERE p.user_id = ?1 AND p.account_id = ?2 AND c.uuid = ?3",
                params![user_id, account_id, cookbook_uuid],
                |row| {
                    Ok(CookbookGrant {
                        can_view: row.get(0)?,
                        can_edit: row.get(1)?,
                        is_owner: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(sql)
    }

    fn app(
        &self,
        user_id: i64,
        account_id: i64,
        app_uuid: &str,
    ) -> Result<Option<AppGrant>, PermissionError> {
        self.connect()?
            .query_row(
                "SELECT p.can_shared, p.can_individual, p.can_administer, p.is_owner
                 FROM permissions_apps p
                 JOIN apps a ON a.id = p.app_id
                 WHERE p.user_id = ?1 AND p.account_id = ?2 AND a.uuid = ?3",
                params![user_id, account_id, app_uuid],
                |row| {
                    Ok(AppGrant {
                        can_shared: row.get(0)?,
                        can_individual: row.get(1)?,
                        can_administer: row.get(2)?,
                        is_owner: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(sql)
    }
}

fn lookup_id(
    connection: &Connection,
    table: &str,
    uuid: &str,
) -> Result<Option<i64>, PermissionError> {
    connection
        .query_row(
            &format!("SELECT id FROM {table} WHERE uuid = ?1"),
            params![uuid],
            |row| row.get(0),
        )
        .optional()
        .map_err(sql)
}

fn sql(source: rusqlite::Error) -> PermissionError {
    PermissionError::Sql { source }
}
