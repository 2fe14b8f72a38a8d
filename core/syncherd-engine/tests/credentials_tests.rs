use syncherd_engine::{CredentialStore, PgpassEntry, PgpassFile};
use syncherd_types::{CredentialError, DatabaseSpec};

fn entry(host: &str, port: Option<u16>) -> PgpassEntry {
    PgpassEntry {
        host: host.into(),
        port,
        dbname: "app".into(),
        user: "app".into(),
        password: "secret".into(),
    }
}

#[tokio::test]
async fn provision_writes_one_line_per_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".pgpass");
    let store = PgpassFile::new(&path);

    store
        .provision(&[entry("pg1", Some(5432)), entry("pg2", None)])
        .await
        .unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "pg1:5432:app:app:secret\npg2:*:app:app:secret\n");
}

#[cfg(unix)]
#[tokio::test]
async fn provisioned_file_is_private() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".pgpass");
    PgpassFile::new(&path)
        .provision(&[entry("pg1", None)])
        .await
        .unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[tokio::test]
async fn provision_replaces_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".pgpass");
    std::fs::write(&path, "stale:*:x:y:z\n").unwrap();

    PgpassFile::new(&path)
        .provision(&[entry("pg1", None)])
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "pg1:*:app:app:secret\n"
    );
}

#[tokio::test]
async fn cleanup_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".pgpass");
    let store = PgpassFile::new(&path);

    store.provision(&[entry("pg1", None)]).await.unwrap();
    store.cleanup().await.unwrap();
    assert!(!path.exists());
    store.cleanup().await.unwrap();
}

#[test]
fn entry_for_database_with_literal_password() {
    let db = DatabaseSpec {
        id: 4,
        dbname: "inventory".into(),
        host: "pg4".into(),
        user: "inv".into(),
        pass: "pw".into(),
        port: Some(6432),
    };
    let entry = PgpassEntry::for_database(&db).unwrap();
    assert_eq!(entry.line(), "pg4:6432:inventory:inv:pw");
}

#[test]
fn entry_for_database_with_unset_env_password() {
    let db = DatabaseSpec {
        id: 987_654,
        dbname: "x".into(),
        host: "h".into(),
        user: "u".into(),
        pass: "env".into(),
        port: None,
    };
    let err = PgpassEntry::for_database(&db).unwrap_err();
    assert_eq!(
        err,
        CredentialError::MissingEnv {
            var: "BUCARDO_DB987654".into(),
            db_id: 987_654
        }
    );
}
