use std::path::Path;

use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database as SeaDatabase, DatabaseConnection};

/// Shared connection handle. One pool per process; units of work are
/// transactions opened on `conn` and returned on every exit path.
pub struct Database {
    pub conn: DatabaseConnection,
}

impl Database {
    /// Open or create a SQLite database at the given path and bring the
    /// schema up to date.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).wrap_err_with(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let url = format!("sqlite://{}?mode=rwc", path.display());
        let conn = SeaDatabase::connect(&url)
            .await
            .wrap_err_with(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_unprepared("PRAGMA foreign_keys = ON")
            .await
            .wrap_err("Failed to enable foreign keys")?;

        Migrator::up(&conn, None)
            .await
            .wrap_err("Failed to run database migrations")?;

        Ok(Self { conn })
    }
}
