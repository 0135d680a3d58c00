use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ConnectionTrait, DbConn, DbErr, EntityTrait, SqlErr, SqlxSqliteConnector,
    sqlx::{SqlitePool, sqlite::SqliteConnectOptions},
};
use thiserror::Error;
use tracing::{info, instrument};

use crate::{
    config::db_conn_capsule,
    orm::short_link,
    validation::{NewShortLink, RedirectTime, RedirectType},
};

const CREATE_TABLE: &str = r#"CREATE TABLE "url" (
    "id" varchar(20) NOT NULL PRIMARY KEY,
    "title" varchar(255) NOT NULL DEFAULT '',
    "url" varchar(1024) NOT NULL,
    "redirect_type" varchar(4) NOT NULL,
    "redirect_time" INTEGER NOT NULL,
    "view" INTEGER,
    "password" varchar(50),
    "date" INTEGER,
    "ip" varchar(255)
)"#;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open store {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: sea_orm::sqlx::Error,
    },
    #[error("failed to create schema: {0}")]
    Schema(#[source] DbErr),
    #[error("query failed: {0}")]
    Query(#[from] DbErr),
}

#[derive(Debug, Error)]
pub enum InsertError {
    #[error("short link ID is already taken")]
    IdTaken,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShortLink {
    pub id: String,
    pub url: String,
    pub title: String,
    pub redirect_type: RedirectType,
    pub redirect_time: RedirectTime,
}

impl ShortLink {
    #[must_use]
    pub fn new(
        id: String,
        NewShortLink {
            url,
            title,
            redirect_type,
            redirect_time,
        }: NewShortLink,
    ) -> Self {
        Self {
            id,
            url,
            title,
            redirect_type,
            redirect_time,
        }
    }
}

impl From<short_link::Model> for ShortLink {
    fn from(model: short_link::Model) -> Self {
        Self {
            id: model.id,
            url: model.url,
            title: model.title,
            redirect_type: RedirectType::from_param(&model.redirect_type),
            redirect_time: RedirectTime::from_stored(model.redirect_time),
        }
    }
}

/// Opens the store at `path`, creating it first when the file is absent.
///
/// Missing parent directories are created and the fixed schema is applied,
/// but only for a file that did not exist yet. An existing file is opened
/// as-is and never migrated.
///
/// # Errors
/// Will return [`Err`] if a directory, the file, or the schema cannot be
/// created, or if the store cannot be opened.
#[instrument]
pub async fn ensure_store(path: &Path) -> Result<DbConn, StorageError> {
    let is_new = !path.exists();

    if is_new
        && let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
    {
        fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
            path: parent.to_owned(),
            source,
        })?;
    }

    // The path goes in as a filename, never through a `sqlite://` URL, so
    // `?`, `#` and `%` in it are not read as URL syntax
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options)
        .await
        .map_err(|source| StorageError::Connect {
            path: path.to_owned(),
            source,
        })?;
    let db = SqlxSqliteConnector::from_sqlx_sqlite_pool(pool);

    if is_new {
        db.execute_unprepared(CREATE_TABLE)
            .await
            .map_err(StorageError::Schema)?;
        info!(path = %path.display(), "Created new store");
    }

    Ok(db)
}

pub fn short_link_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn ShortLinkRepository> {
    let db = get.as_ref(db_conn_capsule).clone();
    Arc::new(ShortLinkRepositoryImpl { db })
}

#[async_trait]
pub trait ShortLinkRepository: Send + Sync {
    /// Stores a new link; links are never updated afterwards.
    async fn insert(&self, link: ShortLink) -> Result<(), InsertError>;

    /// Absence is `Ok(None)`, not an error.
    async fn find_by_id(&self, id: &str) -> Result<Option<ShortLink>, StorageError>;
}

struct ShortLinkRepositoryImpl {
    db: DbConn,
}

#[async_trait]
impl ShortLinkRepository for ShortLinkRepositoryImpl {
    #[instrument(skip(self))]
    async fn insert(&self, link: ShortLink) -> Result<(), InsertError> {
        let to_insert = short_link::ActiveModel {
            id: Set(link.id),
            title: Set(link.title),
            url: Set(link.url),
            redirect_type: Set(link.redirect_type.as_str().to_owned()),
            redirect_time: Set(link.redirect_time.seconds()),
            view: NotSet,
            password: NotSet,
            date: NotSet,
            ip: NotSet,
        };

        match short_link::Entity::insert(to_insert)
            .exec_without_returning(&self.db)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(InsertError::IdTaken)
            }
            Err(err) => Err(StorageError::Query(err).into()),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: &str) -> Result<Option<ShortLink>, StorageError> {
        Ok(short_link::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(ShortLink::from))
    }
}
