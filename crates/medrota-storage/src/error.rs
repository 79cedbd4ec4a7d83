use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid {column} value in {table}: {value}")]
    InvalidColumn {
        table: &'static str,
        column: &'static str,
        value: String,
    },
}

pub type Result<T> = std::result::Result<T, StorageError>;
