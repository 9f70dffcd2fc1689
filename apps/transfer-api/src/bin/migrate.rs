//! Creates or upgrades the `users` table.
//!
//! `transfer-migrate [--test]`. With `--test` the `_test` database next to
//! DATABASE_URL is migrated instead, which is what the store tests expect.

use std::path::Path;

use diesel::pg::PgConnection;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

fn main() {
    // Running from the workspace root still picks up the crate's .env.
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path(Path::new(env!("CARGO_MANIFEST_DIR")).join(".env"));
    }

    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL env var is required");
    let url = if std::env::args().skip(1).any(|arg| arg == "--test") {
        with_test_db_suffix(&url)
    } else {
        url
    };

    let mut conn = PgConnection::establish(&url).expect("failed to connect to database");
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .expect("failed to run migrations");

    for version in &applied {
        println!("applied {version}");
    }
    println!("user store up to date ({} new)", applied.len());
}

/// `postgres://host/transfer?x=y` becomes `postgres://host/transfer_test?x=y`.
/// Already-suffixed URLs are returned unchanged.
fn with_test_db_suffix(database_url: &str) -> String {
    let (base, query) = match database_url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (database_url, None),
    };
    let Some((host, db)) = base.rsplit_once('/') else {
        return database_url.to_string();
    };
    if db.is_empty() || db.ends_with("_test") {
        return database_url.to_string();
    }

    match query {
        Some(query) => format!("{host}/{db}_test?{query}"),
        None => format!("{host}/{db}_test"),
    }
}
