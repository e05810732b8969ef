use sqlx::postgres::PgRow;

use crate::Result;

mod collection;
mod database;

pub use database::PostgresStore;

pub trait DbRow {
    fn from_row(row: &PgRow) -> Result<Self>
    where
        Self: Sized;
}

pub trait DbInit {
    /// DDL statements creating the collection if it does not exist.
    fn schema() -> Vec<String>;
}
