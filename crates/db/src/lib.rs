use anyhow::{Context, Result};
use async_trait::async_trait;
use deploy_hook_core::{
    config::DbConfig,
    models::Project,
    services::{InsertOutcome, ProjectStore},
};
use sqlx::{Pool, Row, Sqlite, SqlitePool, migrate::MigrateDatabase, sqlite::SqliteRow};

#[derive(Clone)]
pub struct Database {
    pub pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DbConfig) -> Result<Self> {
        if !Sqlite::database_exists(&config.url).await.unwrap_or(false) {
            tracing::info!(url = %config.url, "Creating database");
            Sqlite::create_database(&config.url).await.context("Failed to create database")?;
            tracing::info!("Database created");
        }
        let pool =
            SqlitePool::connect(&config.url).await.context("Failed to connect to database")?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running migrations first.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(Self { pool })
    }

    pub async fn close(&self) { self.pool.close().await }

    pub async fn get_project(&self, repository_id: u64) -> Result<Option<Project>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(
            r#"
            SELECT repository_id, repository_full_name, platform_project_id, platform_service_id
            FROM projects
            WHERE repository_id = ?
            "#,
        )
        .bind(to_db_id(repository_id)?)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("Failed to fetch project for repository {repository_id}"))?;
        row.as_ref().map(project_from_row).transpose()
    }

    pub async fn insert_project(&self, project: &Project) -> Result<InsertOutcome> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO projects (repository_id, repository_full_name, platform_project_id, platform_service_id, created_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (repository_id) DO NOTHING
            "#,
        )
        .bind(to_db_id(project.repository_id)?)
        .bind(&project.repository_full_name)
        .bind(&project.platform_project_id)
        .bind(&project.platform_service_id)
        .execute(&mut *conn)
        .await
        .with_context(|| {
            format!("Failed to insert project for repository {}", project.repository_id)
        })?;
        Ok(if result.rows_affected() == 0 { InsertOutcome::Conflict } else { InsertOutcome::Inserted })
    }
}

#[async_trait]
impl ProjectStore for Database {
    async fn get_project(&self, repository_id: u64) -> Result<Option<Project>> {
        Database::get_project(self, repository_id).await
    }

    async fn insert_project(&self, project: &Project) -> Result<InsertOutcome> {
        Database::insert_project(self, project).await
    }
}

fn to_db_id(repository_id: u64) -> Result<i64> {
    i64::try_from(repository_id)
        .with_context(|| format!("Repository ID {repository_id} out of range"))
}

fn project_from_row(row: &SqliteRow) -> Result<Project> {
    let repository_id: i64 = row.try_get("repository_id")?;
    Ok(Project {
        repository_id: u64::try_from(repository_id)
            .with_context(|| format!("Invalid stored repository ID {repository_id}"))?,
        repository_full_name: row.try_get("repository_full_name")?,
        platform_project_id: row.try_get("platform_project_id")?,
        platform_service_id: row.try_get("platform_service_id")?,
    })
}
