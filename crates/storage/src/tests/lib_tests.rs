use super::*;

#[tokio::test]
async fn missing_key_reads_as_none() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    assert_eq!(storage.get("@bharatmandi_cart").await.expect("get"), None);
}

#[tokio::test]
async fn set_overwrites_previous_value() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.set("cart", "[]").await.expect("first write");
    storage
        .set("cart", r#"[{"id":"rice"}]"#)
        .await
        .expect("second write");

    assert_eq!(
        storage.get("cart").await.expect("get").as_deref(),
        Some(r#"[{"id":"rice"}]"#)
    );
    assert_eq!(storage.keys().await.expect("keys"), vec!["cart".to_string()]);
}

#[tokio::test]
async fn load_reports_update_time() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let before = Utc::now() - chrono::Duration::seconds(1);
    storage.set("cart", "[]").await.expect("write");

    let stored = storage.load("cart").await.expect("load").expect("present");
    assert_eq!(stored.value, "[]");
    assert!(stored.updated_at >= before);
}

#[tokio::test]
async fn remove_is_a_noop_for_missing_key() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.remove("absent").await.expect("remove absent");
    storage.set("cart", "[]").await.expect("write");
    storage.remove("cart").await.expect("remove");
    assert_eq!(storage.get("cart").await.expect("get"), None);
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("cart.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn memory_store_round_trips_and_removes() {
    let store = MemoryStore::with_entry("cart", "[]");
    assert_eq!(store.get("cart").await.expect("get").as_deref(), Some("[]"));
    store.remove("cart").await.expect("remove");
    assert_eq!(store.get("cart").await.expect("get"), None);
}

#[test]
fn parses_both_timestamp_layouts() {
    let rfc = parse_sqlite_timestamp("2026-01-02T03:04:05+00:00").expect("rfc3339");
    let sqlite = parse_sqlite_timestamp("2026-01-02 03:04:05").expect("sqlite default");
    assert_eq!(rfc, sqlite);
}

#[test]
fn memory_urls_have_no_file_path() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(
        sqlite_path("sqlite://./data/cart.db?mode=rwc"),
        Some(PathBuf::from("./data/cart.db"))
    );
}
