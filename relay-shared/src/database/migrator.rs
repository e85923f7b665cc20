//! Shared migrator used both by `relay-server`'s bootstrap and every crate's
//! `#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]` tests.

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
