use std::sync::{Arc, Once};

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera_common::config::EngineConfig;
use tessera_cursor::source::{MemorySource, TableDef};
use tessera_cursor::{Connection, Database, DataType, Value};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a `tracing` subscriber honouring `RUST_LOG`, once per process.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Returns `len` random bytes; the same seed gives the same bytes.
pub fn payload(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

/// Returns `len` random alphanumeric characters.
pub fn text(len: usize, seed: u64) -> String {
    StdRng::seed_from_u64(seed)
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A database over an in-memory source with a `docs` table:
///
/// | column | type    |                                   |
/// |--------|---------|-----------------------------------|
/// | id     | BIGINT  | primary key                       |
/// | title  | VARCHAR | indexed by `docs_title (title, id)` |
/// | body   | BLOB    |                                   |
/// | notes  | CLOB    |                                   |
pub struct Fixture {
    /// The database.
    pub db: Database,
    /// The source, for writes that bypass cursors.
    pub source: Arc<MemorySource>,
}

impl Fixture {
    /// Name of the fixture table.
    pub const TABLE: &'static str = "docs";

    /// Creates an empty fixture with test timeouts.
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(EngineConfig::for_testing())
    }

    /// Creates an empty fixture.
    pub fn with_config(config: EngineConfig) -> anyhow::Result<Self> {
        init_tracing();
        let source = Arc::new(MemorySource::new());
        source.create_table(Self::table_def())?;
        let db = Database::open(config, source.clone())?;
        Ok(Self { db, source })
    }

    /// Creates a fixture holding `rows` documents with ids `1..=rows`.
    pub fn seeded(rows: u64) -> anyhow::Result<Self> {
        let fixture = Self::new()?;
        for id in 1..=rows {
            fixture.insert_doc(id, 64, 32)?;
        }
        Ok(fixture)
    }

    /// The `docs` table definition.
    pub fn table_def() -> TableDef {
        TableDef::new(Self::TABLE)
            .column("id", DataType::BigInt, false)
            .column("title", DataType::Varchar, true)
            .column("body", DataType::Blob, true)
            .column("notes", DataType::Clob, true)
            .primary_key(&["id"])
            .index("docs_title", &["title", "id"], false)
    }

    /// Inserts a document with seeded body and notes of the given lengths.
    pub fn insert_doc(&self, id: u64, body_len: usize, notes_len: usize) -> anyhow::Result<()> {
        self.source.insert(
            Self::TABLE,
            vec![
                Value::BigInt(id as i64),
                Value::string(format!("doc {}", id)),
                Value::blob(payload(body_len, id)),
                Value::clob(text(notes_len, id)),
            ],
        )?;
        Ok(())
    }

    /// Opens a connection.
    pub fn connect(&self) -> Connection {
        self.db.connect()
    }
}
