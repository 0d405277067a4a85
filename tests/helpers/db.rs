use orgauthz::authz::Authz;
use orgauthz::hr::HrService;
use orgauthz::settings::{self, FactBackend, FanOut};
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tempfile::NamedTempFile;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        // Connect to database
        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        // Run migrations
        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

/// A migrated database with the authorization core and HR service on top.
pub struct TestOrg {
    pub db: TestDb,
    pub authz: Authz,
    pub hr: HrService,
}

impl TestOrg {
    pub async fn new(store: FactBackend, fan_out: FanOut) -> Self {
        let db = TestDb::new().await;
        let cfg = settings::Authz {
            store,
            fan_out,
            ..Default::default()
        };
        let authz = Authz::from_settings(db.connection().clone(), &cfg);
        let hr = HrService::new(db.connection().clone(), authz.clone());
        Self { db, authz, hr }
    }

    /// Database-backed facts with materialized fan-out (the defaults).
    pub async fn default_setup() -> Self {
        Self::new(FactBackend::Database, FanOut::Materialized).await
    }

    /// Every backend and fan-out combination.
    pub async fn all_setups() -> Vec<Self> {
        let mut setups = Vec::new();
        for store in [FactBackend::Database, FactBackend::Memory] {
            for fan_out in [FanOut::Materialized, FanOut::Derived] {
                setups.push(Self::new(store, fan_out).await);
            }
        }
        setups
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.connection()
    }
}
