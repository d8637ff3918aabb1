//! Live Redis integration tests.
//!
//! Set TEST_REDIS_URL environment variable to run these tests.
//! Example: TEST_REDIS_URL="redis://:secret@localhost:6379/0"

use kv_multisource::config::DataSourceConfig;
use kv_multisource::db::DataSourceRegistry;
use kv_multisource::{MultiSourceClient, run_scoped};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::sync::Arc;
use std::time::Duration;

fn unique_key() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("kv-multisource-test:{}", suffix)
}

async fn setup_live() -> Option<MultiSourceClient> {
    let url = match std::env::var("TEST_REDIS_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_REDIS_URL not set");
            return None;
        }
    };
    let connection = DataSourceConfig::parse_url(&url).unwrap();
    let registry = Arc::new(DataSourceRegistry::new());
    registry.register("live", connection).await.unwrap();
    Some(MultiSourceClient::new(registry, "live"))
}

#[tokio::test]
async fn test_live_ping_and_database_isolation() {
    let Some(client) = setup_live().await else {
        return;
    };
    let key = unique_key();

    let db1 = client.db1("live").await.unwrap();
    let db2 = client.db2("live").await.unwrap();
    assert_eq!(db1.ping().await.unwrap(), "PONG");

    db1.set_ex(&key, "one", Duration::from_secs(30)).await.unwrap();
    assert_eq!(db2.get(&key).await.unwrap(), None);
    assert_eq!(db1.get(&key).await.unwrap(), Some("one".to_string()));
    assert_eq!(db1.del(&key).await.unwrap(), 1);
}

#[tokio::test]
async fn test_live_list_and_hash_commands() {
    let Some(client) = setup_live().await else {
        return;
    };
    let handle = client.db3("live").await.unwrap();
    let list = unique_key();
    let hash = unique_key();

    handle.rpush(&list, "a").await.unwrap();
    handle.lpush(&list, "b").await.unwrap();
    assert_eq!(handle.lrange(&list, 0, -1).await.unwrap(), vec!["b", "a"]);
    assert_eq!(handle.rpop(&list).await.unwrap(), Some("a".to_string()));
    assert_eq!(handle.llen(&list).await.unwrap(), 1);

    assert!(handle.hset(&hash, "f", "1").await.unwrap());
    assert_eq!(handle.hget(&hash, "f").await.unwrap(), Some("1".to_string()));

    handle.del(&list).await.unwrap();
    handle.del(&hash).await.unwrap();
}

#[tokio::test]
async fn test_live_scoped_helper() {
    let Some(client) = setup_live().await else {
        return;
    };
    let helper = client.default_helper().await.unwrap();
    let key = unique_key();

    run_scoped(4, async {
        helper.set(&key, "scoped").await.unwrap();
    })
    .await;

    let db4 = client.db4("live").await.unwrap();
    assert_eq!(db4.get(&key).await.unwrap(), Some("scoped".to_string()));
    db4.del(&key).await.unwrap();
}
