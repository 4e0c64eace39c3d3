mod common;

use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use craftvisor::{
    CreateParams, Distribution, InstanceRegistry, InstanceState, Metrics, RegistryError,
    ServerError,
};
use tokio::{net::TcpListener, task::JoinSet};

use common::{FakeJar, open_registry, test_config};

fn params(port: u16) -> CreateParams {
    CreateParams::new(Distribution::Vanilla, "1.21.1").port(port)
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn concurrent_get_or_create_shares_one_instance() {
    let root = tempfile::tempdir().unwrap();
    let jar = Arc::new(FakeJar {
        delay: Duration::from_millis(100),
        ..FakeJar::default()
    });
    let registry = Arc::new(open_registry(test_config(root.path(), "java".into()), jar.clone()).await);

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let registry = registry.clone();
        tasks.spawn(async move { registry.get_or_create("beta", params(25566)).await.unwrap() });
    }

    let mut instances = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        instances.push(joined.unwrap());
    }

    assert_eq!(jar.fetches.load(Ordering::SeqCst), 1);
    assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
    assert_eq!(
        registry.list().await.unwrap().into_iter().collect::<Vec<_>>(),
        vec!["beta".to_string()]
    );
}

#[tokio::test]
async fn different_parameters_conflict() {
    let root = tempfile::tempdir().unwrap();
    let registry = open_registry(
        test_config(root.path(), "java".into()),
        Arc::new(FakeJar::default()),
    )
    .await;

    registry.get_or_create("alpha", params(25565)).await.unwrap();

    let paper = CreateParams::new(Distribution::Paper, "1.21.1");
    let err = registry.get_or_create("alpha", paper).await.unwrap_err();
    assert!(matches!(err, RegistryError::NameConflict(_)));

    let newer = CreateParams::new(Distribution::Vanilla, "1.21.4");
    let err = registry.get_or_create("alpha", newer).await.unwrap_err();
    assert!(matches!(err, RegistryError::NameConflict(_)));

    // memory and port changes do not conflict; the stored values win
    let same = params(25570).memory(512, 4096);
    let instance = registry.get_or_create("alpha", same).await.unwrap();
    assert_eq!(instance.meta().await.port, 25565);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_any_fetch() {
    let root = tempfile::tempdir().unwrap();
    let jar = Arc::new(FakeJar::default());
    let registry = open_registry(test_config(root.path(), "java".into()), jar.clone()).await;

    for name in ["", "..", "a/b"] {
        let err = registry.get_or_create(name, params(25565)).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidParams(_)));
    }

    let err = registry
        .get_or_create("gamma", params(25565).memory(2048, 1024))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidParams(_)));

    assert_eq!(jar.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_creation_cleans_up_and_can_be_retried() {
    let root = tempfile::tempdir().unwrap();
    let jar = Arc::new(FakeJar {
        fail_first: true,
        ..FakeJar::default()
    });
    let registry = open_registry(test_config(root.path(), "java".into()), jar.clone()).await;

    let err = registry.get_or_create("delta", params(25565)).await.unwrap_err();
    assert!(matches!(err, RegistryError::Fetch(_)));
    assert!(!root.path().join("delta").exists());
    assert!(registry.list().await.unwrap().is_empty());

    registry.get_or_create("delta", params(25565)).await.unwrap();
    assert_eq!(jar.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn get_only_loads_existing_instances() {
    let root = tempfile::tempdir().unwrap();
    let registry = open_registry(
        test_config(root.path(), "java".into()),
        Arc::new(FakeJar::default()),
    )
    .await;

    let err = registry.get("nobody").await.unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));
}

#[tokio::test]
async fn reopened_registry_restores_instances() {
    let root = tempfile::tempdir().unwrap();
    let port = free_port().await;

    {
        let registry = open_registry(
            test_config(root.path(), "java".into()),
            Arc::new(FakeJar::default()),
        )
        .await;
        let instance = registry.get_or_create("epsilon", params(port)).await.unwrap();
        instance.accept_eula().await.unwrap();
    }

    let jar = Arc::new(FakeJar::default());
    let registry = open_registry(test_config(root.path(), "java".into()), jar.clone()).await;
    let instance = registry.get("epsilon").await.unwrap();

    assert_eq!(instance.status().await.state, InstanceState::Offline);
    assert!(instance.eula_accepted().await);
    assert_eq!(instance.meta().await.port, port);
    assert_eq!(jar.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reachable_port_on_reload_means_detached_online() {
    let root = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    {
        let registry = open_registry(
            test_config(root.path(), "java".into()),
            Arc::new(FakeJar::default()),
        )
        .await;
        registry.get_or_create("zeta", params(port)).await.unwrap();
    }

    let registry = open_registry(
        test_config(root.path(), "java".into()),
        Arc::new(FakeJar::default()),
    )
    .await;
    let instance = registry.get("zeta").await.unwrap();

    let status = instance.status().await;
    assert_eq!(status.state, InstanceState::Online);
    assert!(status.started_at.is_some());
    assert!(instance.handle().is_detached().await);

    // not ours to stop, so not ours to delete
    let err = registry.delete("zeta").await.unwrap_err();
    assert!(matches!(err, RegistryError::Server(ServerError::NotRunning)));
    assert!(root.path().join("zeta").exists());

    drop(listener);
    assert_eq!(instance.status().await.state, InstanceState::Offline);
    registry.delete("zeta").await.unwrap();
}

#[tokio::test]
async fn delete_removes_directory_and_handle() {
    let root = tempfile::tempdir().unwrap();
    let registry = open_registry(
        test_config(root.path(), "java".into()),
        Arc::new(FakeJar::default()),
    )
    .await;

    let port = free_port().await;
    registry.get_or_create("eta", params(port)).await.unwrap();
    registry.delete("eta").await.unwrap();

    assert!(!root.path().join("eta").exists());
    assert!(matches!(
        registry.get("eta").await.unwrap_err(),
        RegistryError::NotFound(_)
    ));
}

#[tokio::test]
async fn offline_metrics_are_zero_and_cached() {
    let root = tempfile::tempdir().unwrap();
    let registry = open_registry(
        test_config(root.path(), "java".into()),
        Arc::new(FakeJar::default()),
    )
    .await;

    let port = free_port().await;
    let instance = registry.get_or_create("theta", params(port)).await.unwrap();
    let generation = instance.handle().generation();

    assert_eq!(registry.metrics("theta").await.unwrap(), Metrics::default());
    assert_eq!(registry.metrics("theta").await.unwrap(), Metrics::default());
    assert_eq!(instance.handle().generation(), generation);
}

#[tokio::test]
async fn shutdown_with_nothing_running_completes() {
    let root = tempfile::tempdir().unwrap();
    let registry: InstanceRegistry = open_registry(
        test_config(root.path(), "java".into()),
        Arc::new(FakeJar::default()),
    )
    .await;
    let port = free_port().await;
    let instance = registry.get_or_create("iota", params(port)).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), registry.shutdown())
        .await
        .unwrap();
    assert_eq!(instance.status().await.state, InstanceState::Offline);
}

#[cfg(unix)]
#[tokio::test]
async fn metrics_cache_follows_state_transitions() {
    let root = tempfile::tempdir().unwrap();
    let java = common::fake_java(root.path(), common::CONSOLE_LOOP);
    let mut config = test_config(&root.path().join("servers"), java);
    config.metrics_ttl = Duration::from_secs(60);
    let registry = open_registry(config, Arc::new(FakeJar::default())).await;

    let port = free_port().await;
    let instance = registry.get_or_create("kappa", params(port)).await.unwrap();
    assert_eq!(registry.metrics("kappa").await.unwrap(), Metrics::default());

    instance.start().await.unwrap();
    instance.send_command("ready").await;
    instance.wait_until_online(Duration::from_secs(5)).await.unwrap();

    let online = registry.metrics("kappa").await.unwrap();
    assert_eq!(online.player_count, 2);
    if cfg!(target_os = "linux") {
        assert!(online.memory_mb > 0.0);
    }
    // same state, within the ttl
    assert_eq!(registry.metrics("kappa").await.unwrap(), online);

    instance.stop().await.unwrap();
    assert_eq!(registry.metrics("kappa").await.unwrap(), Metrics::default());
}

#[cfg(unix)]
#[tokio::test]
async fn shutdown_stops_every_running_instance() {
    let root = tempfile::tempdir().unwrap();
    let java = common::fake_java(root.path(), common::CONSOLE_LOOP);
    let registry = open_registry(
        test_config(&root.path().join("servers"), java),
        Arc::new(FakeJar::default()),
    )
    .await;

    let mut instances = Vec::new();
    for name in ["lambda", "mu"] {
        let port = free_port().await;
        let instance = registry.get_or_create(name, params(port)).await.unwrap();
        instance.start().await.unwrap();
        instance.send_command("ready").await;
        instance.wait_until_online(Duration::from_secs(5)).await.unwrap();
        instances.push(instance);
    }

    tokio::time::timeout(Duration::from_secs(10), registry.shutdown())
        .await
        .unwrap();

    for instance in &instances {
        assert_eq!(instance.status().await.state, InstanceState::Offline);
        assert!(instance.handle().pid().await.is_none());
        assert!(
            instance
                .handle()
                .logs()
                .await
                .iter()
                .any(|l| l.text.contains("Stopping server"))
        );
    }
}
