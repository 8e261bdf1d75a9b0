//! SQLite connection pooling and migrations.

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::{Error, Result};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Per-connection pragmas: enforce foreign keys and bound writer waits to
/// the store timeout.
#[derive(Debug)]
struct ConnectionPragmas {
    busy_timeout_ms: u64,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionPragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
            self.busy_timeout_ms
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Create a connection pool for the given database path or URL.
pub fn create_pool(url: &str) -> Result<DbPool> {
    create_pool_with_timeout(url, 5_000)
}

/// Create a pool with an explicit busy timeout in milliseconds.
pub fn create_pool_with_timeout(url: &str, busy_timeout_ms: u64) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(url);
    let mut builder = Pool::builder().connection_customizer(Box::new(ConnectionPragmas {
        busy_timeout_ms,
    }));

    // An in-memory database exists per connection; a pool larger than one
    // would hand out empty databases.
    if url.contains(":memory:") {
        builder = builder.max_size(1);
    }

    builder
        .build(manager)
        .map_err(|e| Error::Connection(e.to_string()))
}

/// Run pending embedded migrations.
pub fn run_migrations(pool: &DbPool) -> Result<()> {
    let mut conn = pool.get().map_err(|e| Error::Connection(e.to_string()))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| Error::Database(e.to_string()))?;
    Ok(())
}
