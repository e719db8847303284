//! End-to-end tests: facade, middleware chain and SQLite executors

use query_resources::iterate::IterateOptions;
use query_resources::{
    CacheIdentity, CacheStore, ConnectionExecutor, FilesystemLoader, IsolationLevel, IterateMode,
    Loader, LoaderMiddleware, Options, Parameters, QueryError, QueryResourcesLoader, RawLoader,
};
use query_resources_sqlite::{sqlite_executor, SqliteConfig, SqliteConnection};
use serde_json::json;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const SCHEMA: &str = "
    CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, status TEXT NOT NULL);
    INSERT INTO users (id, name, status) VALUES
        (1, 'ada', 'active'), (2, 'bob', 'blocked'), (3, 'cy', 'active'),
        (4, 'dee', 'active'), (5, 'eve', 'blocked'), (6, 'fay', 'active'),
        (7, 'gus', 'active');
";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn seeded(name: &str) -> ConnectionExecutor<SqliteConnection> {
    let executor = sqlite_executor(name, &SqliteConfig::memory()).unwrap();
    executor.with_connection(|conn| conn.inner().execute_batch(SCHEMA).unwrap());
    executor
}

fn user_count(loader: &QueryResourcesLoader, executor: &str) -> serde_json::Value {
    loader
        .execute("SELECT COUNT(*) FROM users", None, Some(&Options::executor(executor)))
        .unwrap()
        .single_scalar()
        .unwrap()
}

#[test]
fn test_filesystem_queries_with_parameters() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("reports")).unwrap();
    fs::write(
        dir.path().join("reports/by_status.sql"),
        "SELECT name FROM users WHERE status = :status ORDER BY id",
    )
    .unwrap();

    let mut filesystem = FilesystemLoader::new();
    filesystem.add_path(dir.path().join("reports"), "reports").unwrap();
    let filesystem: Arc<dyn Loader> = Arc::new(filesystem);

    let loader = QueryResourcesLoader::builder()
        .executor("default", seeded("default"))
        .loader(LoaderMiddleware::new(
            Arc::new(RawLoader),
            vec![("filesystem", filesystem)],
        ))
        .build();

    let names = loader
        .execute(
            "@reports/by_status.sql",
            Some(&Parameters::new().string("status", "blocked")),
            Some(&Options::new().with_loader("filesystem")),
        )
        .unwrap()
        .scalar_list()
        .unwrap();
    assert_eq!(names, vec![json!("bob"), json!("eve")]);

    // Raw SQL still works through the default loader
    assert_eq!(user_count(&loader, "default"), json!(7));
}

#[test]
fn test_cached_results_until_invalidated() {
    init_tracing();
    let loader = QueryResourcesLoader::builder()
        .executor("default", seeded("default"))
        .build();

    let identity = CacheIdentity::create("users.active", ["users"], None);
    let options = Options::cached(identity);
    let active = |loader: &QueryResourcesLoader| {
        loader
            .execute(
                "SELECT COUNT(*) FROM users WHERE status = 'active'",
                None,
                Some(&options),
            )
            .unwrap()
            .single_scalar()
            .unwrap()
    };

    assert_eq!(active(&loader), json!(5));

    loader
        .execute("UPDATE users SET status = 'blocked' WHERE id = 1", None, None)
        .unwrap();
    assert_eq!(active(&loader), json!(5));

    let store = loader.cache_store().unwrap();
    assert_eq!(store.invalidate_tags(&["users".to_string()]), 1);
    assert_eq!(active(&loader), json!(4));
}

#[test]
fn test_failed_transaction_rolls_back_every_executor() {
    init_tracing();
    let loader = QueryResourcesLoader::builder()
        .executor("default", seeded("default"))
        .executor("audit", seeded("audit"))
        .build();

    let result: Result<(), QueryError> = loader.transactional(
        |loader| {
            loader.execute("DELETE FROM users WHERE id = 1", None, None)?;
            loader.execute(
                "DELETE FROM users WHERE id = 2",
                None,
                Some(&Options::executor("audit")),
            )?;
            loader.execute("DELETE FROM no_such_table", None, None)?;
            Ok(())
        },
        &[Options::new(), Options::executor("audit")],
    );

    assert!(matches!(result, Err(QueryError::Execution { .. })));
    assert_eq!(user_count(&loader, "default"), json!(7));
    assert_eq!(user_count(&loader, "audit"), json!(7));
}

#[test]
fn test_committed_transaction() {
    let loader = QueryResourcesLoader::builder()
        .executor("default", seeded("default"))
        .build();

    let deleted = loader
        .transactional(
            |loader| {
                loader.execute("DELETE FROM users WHERE status = 'blocked'", None, None)?;
                loader
                    .execute("SELECT changes()", None, None)?
                    .single_scalar()
            },
            &[],
        )
        .unwrap();

    assert_eq!(deleted, json!(2));
    assert_eq!(user_count(&loader, "default"), json!(5));
}

#[test]
fn test_nested_transaction_failure_keeps_outer_work() {
    init_tracing();
    let loader = QueryResourcesLoader::builder()
        .executor("default", seeded("default"))
        .build();

    loader
        .transactional(
            |loader| {
                loader.execute("DELETE FROM users WHERE id = 7", None, None)?;

                let inner: Result<(), QueryError> = loader.transactional(
                    |loader| {
                        loader.execute("DELETE FROM users", None, None)?;
                        Err(QueryError::logic("abandon inner scope"))
                    },
                    &[],
                );
                assert!(matches!(inner, Err(QueryError::Logic(_))));

                Ok(())
            },
            &[],
        )
        .unwrap();

    assert_eq!(user_count(&loader, "default"), json!(6));
}

#[test]
fn test_isolated_statement_restores_isolation() {
    let loader = QueryResourcesLoader::builder()
        .executor("default", seeded("default"))
        .build();

    let inside = loader
        .execute(
            "PRAGMA read_uncommitted",
            None,
            Some(&Options::new().with_isolation(IsolationLevel::ReadUncommitted)),
        )
        .unwrap()
        .single_scalar()
        .unwrap();
    assert_eq!(inside, json!(1));

    let after = loader
        .execute("PRAGMA read_uncommitted", None, None)
        .unwrap()
        .single_scalar()
        .unwrap();
    assert_eq!(after, json!(0));
}

#[test]
fn test_iterate_in_batches() {
    init_tracing();
    let loader = QueryResourcesLoader::builder()
        .executor("default", seeded("default"))
        .build();

    let batches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&batches);
    let settings = IterateOptions {
        mode: IterateMode::Column,
        batch_size: 3,
        on_batch_end: None,
    }
    .on_batch_end(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let names = loader
        .iterate(
            "SELECT name FROM users ORDER BY id;",
            Parameters::new(),
            &Options::new(),
            settings,
        )
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    assert_eq!(
        names,
        ["ada", "bob", "cy", "dee", "eve", "fay", "gus"]
            .iter()
            .map(|name| json!(name))
            .collect::<Vec<_>>()
    );
    assert_eq!(batches.load(Ordering::SeqCst), 3);
}

#[test]
fn test_single_result_errors() {
    let loader = QueryResourcesLoader::builder()
        .executor("default", seeded("default"))
        .build();

    let err = loader
        .execute("SELECT id FROM users WHERE id = 99", None, None)
        .unwrap()
        .single_scalar()
        .unwrap_err();
    assert!(err.is_no_result());

    let err = loader
        .execute("SELECT id FROM users", None, None)
        .unwrap()
        .single_row()
        .unwrap_err();
    assert!(err.is_non_unique_result());
}

#[test]
fn test_on_disk_database() {
    let dir = TempDir::new().unwrap();
    let config = SqliteConfig::new(dir.path().join("app.db"));

    let loader = QueryResourcesLoader::builder()
        .executor("default", sqlite_executor("default", &config).unwrap())
        .build();
    loader
        .execute("CREATE TABLE notes (id INTEGER PRIMARY KEY, body BLOB)", None, None)
        .unwrap();
    loader
        .execute(
            "INSERT INTO notes (body) VALUES (:body)",
            Some(&Parameters::new().binary("body", &[0xde, 0xad])),
            None,
        )
        .unwrap();

    let body = loader
        .execute("SELECT body FROM notes", None, None)
        .unwrap()
        .single_scalar()
        .unwrap();
    assert_eq!(body, json!("dead"));
}
