#[cfg(test)]
pub mod test_utils {
    use std::fs;
    use std::sync::Once;

    use rocket::local::asynchronous::Client;
    use sqlx::{Pool, Sqlite};
    use tempfile::TempDir;

    use crate::database::{SeedOptions, SeedSet, WhitelistRegistry, connect, db_init};
    use crate::env::DEFAULT_MAPPING_TABLES;
    use crate::error::AppError;
    use crate::init_rocket;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    // bcrypt's minimum cost keeps the fixture fast
    const TEST_HASH_COST: u32 = 4;

    const STUDENTS_CSV: &str = include_str!("../../data/students.csv");
    const SECTIONS_CSV: &str = include_str!("../../data/sections.csv");
    const SECTION_STUDENTS_CSV: &str = include_str!("../../data/section_students.csv");
    const REHEARSALS_CSV: &str = include_str!("../../data/rehearsals.csv");
    const ATTENDANCE_CSV: &str = include_str!("../../data/attendance.csv");
    const USERS_CSV: &str = include_str!("../../data/users.csv");

    #[derive(Default)]
    pub struct TestDbBuilder {
        seeds: Vec<(String, Vec<u8>)>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        /// The roster shipped in `data/`: students 1-3, sections 1-2,
        /// rehearsals 5 and 6, no attendance, and user `conductor`.
        pub fn standard() -> Self {
            Self::new()
                .seed("students", STUDENTS_CSV)
                .seed("sections", SECTIONS_CSV)
                .seed("section_students", SECTION_STUDENTS_CSV)
                .seed("rehearsals", REHEARSALS_CSV)
                .seed("attendance", ATTENDANCE_CSV)
                .seed("users", USERS_CSV)
        }

        pub fn seed(self, table: &str, contents: &str) -> Self {
            self.seed_file(&format!("{}.csv", table), contents.as_bytes())
        }

        pub fn seed_file(mut self, file_name: &str, contents: &[u8]) -> Self {
            self.seeds.push((file_name.to_string(), contents.to_vec()));
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter("debug")
                    .with_test_writer()
                    .try_init();
            });

            let dir = tempfile::tempdir()?;
            let seed_dir = dir.path().join("seeds");
            fs::create_dir_all(&seed_dir)?;

            for (file_name, contents) in &self.seeds {
                fs::write(seed_dir.join(file_name), contents)?;
            }

            let pool = connect(&dir.path().join("orchestra.db")).await?;
            let seeds = SeedSet::new(seed_dir);
            let registry = WhitelistRegistry::new();
            let options = SeedOptions {
                mapping_tables: DEFAULT_MAPPING_TABLES.iter().map(|t| t.to_string()).collect(),
                password_hash_cost: TEST_HASH_COST,
            };

            db_init(&pool, &seeds, &registry, &options).await?;

            Ok(TestDb {
                pool,
                seeds,
                registry,
                options,
                _dir: dir,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub seeds: SeedSet,
        pub registry: WhitelistRegistry,
        pub options: SeedOptions,
        _dir: TempDir,
    }

    impl TestDb {
        pub fn write_seed(&self, file_name: &str, contents: &str) {
            fs::write(self.seeds.dir().join(file_name), contents).expect("Failed to write seed file");
        }

        pub async fn count(&self, table: &str) -> i64 {
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{}\"", table))
                .fetch_one(&self.pool)
                .await
                .expect("Failed to count rows")
        }
    }

    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::standard()
            .build()
            .await
            .expect("Failed to create test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = init_rocket(
            rocket::Config::figment(),
            test_db.pool.clone(),
            test_db.registry.clone(),
            test_db.seeds.clone(),
        );

        let client = Client::tracked(rocket)
            .await
            .expect("Failed to create test client");

        (client, test_db)
    }
}
