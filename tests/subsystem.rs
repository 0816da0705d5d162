// tests/subsystem.rs

mod common;
use crate::common::{fake_pool, init_tracing, with_timeout};

use std::sync::Arc;

use shellfleet::descriptor::CommandDescriptor;
use shellfleet::errors::FleetError;
use shellfleet::exec::RealExecutorBackend;
use shellfleet::progress::Reporter;
use shellfleet::subsystem::{CommandDeployment, Deployment, Subsystem, SubsystemGraph};
use shellfleet_test_utils::builders::{DescriptorBuilder, command_on, host};
use shellfleet_test_utils::fake_executor::FakeBackend;
use shellfleet_test_utils::fake_shell::{FakeConnector, Reply, ShellScript};

fn component(name: &str) -> CommandDescriptor {
    DescriptorBuilder::new(&format!("start-{name}"))
        .on(host("node1"))
        .with(|b| b.is_execution().execution_name(name))
        .build()
}

fn subsystem_of(alias: &str, descriptors: Vec<CommandDescriptor>, backend: &Arc<FakeBackend>) -> Arc<Subsystem> {
    Subsystem::new(
        alias,
        Arc::new(CommandDeployment::new(descriptors, backend.clone())),
    )
}

#[tokio::test]
async fn deployment_tracks_shutdown_state() {
    init_tracing();
    let backend = Arc::new(FakeBackend::new());
    let db = subsystem_of("db", vec![component("db")], &backend);

    assert!(db.is_shutdown());
    with_timeout(db.deploy()).await.unwrap();
    assert!(!db.is_shutdown());

    with_timeout(db.shutdown(false)).await.unwrap();
    assert!(db.is_shutdown());
    assert!(backend.stopped().is_empty());
}

#[tokio::test]
async fn releasing_dependencies_stops_them_once() {
    init_tracing();
    let backend = Arc::new(FakeBackend::new());
    let db = subsystem_of("db", vec![component("db")], &backend);
    let cache = subsystem_of("cache", vec![component("cache")], &backend);
    let api = subsystem_of("api", vec![component("api")], &backend);
    api.depends_on(&[Arc::clone(&db), Arc::clone(&cache)]).unwrap();

    with_timeout(db.deploy()).await.unwrap();
    with_timeout(cache.deploy()).await.unwrap();
    with_timeout(cache.shutdown(false)).await.unwrap();
    with_timeout(api.deploy()).await.unwrap();

    let deps = api.dependencies();
    with_timeout(api.deployment().release_dependencies(&deps))
        .await
        .unwrap();

    // cache was already shut down, so only db is stopped.
    let stopped: Vec<String> = backend.stopped().into_iter().map(|(_, n)| n).collect();
    assert_eq!(stopped, vec!["db"]);
    assert!(db.is_shutdown());
    assert!(!api.is_shutdown());

    with_timeout(api.deployment().release_dependencies(&deps))
        .await
        .unwrap();
    assert_eq!(backend.stopped().len(), 1);
}

#[tokio::test]
async fn named_components_stop_through_the_deployment() {
    init_tracing();
    let backend = Arc::new(FakeBackend::new());
    let deployment = Arc::new(CommandDeployment::new(
        [component("db"), component("worker")],
        backend.clone(),
    ));
    let platform = Subsystem::new("platform", deployment.clone());

    assert!(
        with_timeout(deployment.shutdown_and_stop_components(&["worker"]))
            .await
            .unwrap()
            .is_empty()
    );

    with_timeout(platform.deploy()).await.unwrap();
    let stopped = with_timeout(deployment.shutdown_and_stop_components(&["worker"]))
        .await
        .unwrap();
    assert_eq!(stopped, vec!["worker"]);
    assert!(platform.is_shutdown());
}

#[tokio::test]
async fn graph_deploys_in_order_and_tears_down_in_reverse() {
    init_tracing();
    let backend = Arc::new(FakeBackend::new());
    let db = subsystem_of("db", vec![component("db")], &backend);
    let api = subsystem_of("api", vec![component("api")], &backend);
    let web = subsystem_of("web", vec![component("web")], &backend);
    web.depends_on(&[Arc::clone(&api)]).unwrap();
    api.depends_on(&[Arc::clone(&db)]).unwrap();

    let mut graph = SubsystemGraph::new();
    graph.register(Arc::clone(&web));
    graph.register(Arc::clone(&db));
    graph.register(Arc::clone(&api));

    with_timeout(graph.deploy_all()).await.unwrap();
    assert_eq!(
        backend.dispatched_commands(),
        vec!["start-db", "start-api", "start-web"]
    );

    with_timeout(graph.shutdown_all(true)).await.unwrap();
    let stopped: Vec<String> = backend.stopped().into_iter().map(|(_, n)| n).collect();
    assert_eq!(stopped, vec!["web", "api", "db"]);
    assert!(backend.running().is_empty());
}

#[tokio::test]
async fn failed_subsystem_reports_and_blocks_dependents() {
    init_tracing();
    let backend = Arc::new(FakeBackend::new().failing("flyway migrate"));
    let (reporter, mut events) = Reporter::channel();

    let schema = Subsystem::with_reporter(
        "schema",
        Arc::new(CommandDeployment::new(
            [command_on("flyway migrate", &host("db1"))],
            backend.clone(),
        )),
        reporter,
    );
    let api = subsystem_of("api", vec![component("api")], &backend);
    api.depends_on(&[Arc::clone(&schema)]).unwrap();

    let mut graph = SubsystemGraph::new();
    graph.register(Arc::clone(&schema));
    graph.register(Arc::clone(&api));

    let err = with_timeout(graph.deploy_all()).await.unwrap_err();
    assert!(matches!(err, FleetError::CommandFailed { .. }));
    assert_eq!(backend.dispatched_commands(), vec!["flyway migrate"]);
    assert!(graph.deployed().is_empty());

    assert_eq!(
        events.recv().await.unwrap().to_string(),
        "Deploying subsystem 'schema'"
    );
    assert_eq!(
        events.recv().await.unwrap().to_string(),
        "Error deploying subsystem 'schema'"
    );
}

#[tokio::test]
async fn subsystem_runs_end_to_end_over_fake_shells() {
    init_tracing();
    let (a, b) = (host("web1"), host("web2"));
    let connector = Arc::new(FakeConnector::new(
        ShellScript::bash().reply("cat VERSION", Reply::output("1.4.2\n")),
    ));
    let (reporter, mut events) = Reporter::channel();
    let pool = fake_pool(&connector, reporter.clone());
    let backend = Arc::new(RealExecutorBackend::new(Arc::clone(&pool)));

    let version = DescriptorBuilder::new("cat VERSION")
        .on(a.clone())
        .on(b.clone())
        .build();
    let mut server = DescriptorBuilder::new("./server --daemon")
        .on(a.clone())
        .with(|d| d.is_execution().execution_name("server").search_criterion("./server"))
        .build();
    server.depends_on([version.id()]).unwrap();
    let version_id = version.id();

    let deployment = Arc::new(CommandDeployment::new([version, server], backend));
    let app = Subsystem::with_reporter("app", deployment.clone(), reporter);

    with_timeout(app.deploy()).await.unwrap();
    let report = deployment.last_report().unwrap();
    assert_eq!(report.output(version_id, &a), Some("1.4.2\n"));
    assert_eq!(report.output(version_id, &b), Some("1.4.2\n"));
    assert_eq!(report.succeeded.len(), 2);

    with_timeout(app.shutdown(true)).await.unwrap();
    let web1 = connector.handle(&a).unwrap();
    assert_eq!(
        web1.commands(),
        vec!["cat VERSION", "./server --daemon", "pkill -f -- './server'"]
    );
    assert_eq!(connector.handle(&b).unwrap().commands(), vec!["cat VERSION"]);

    with_timeout(pool.close_all()).await.unwrap();
    assert!(web1.was_closed());

    let mut lines = Vec::new();
    while let Ok(event) = events.try_recv() {
        lines.push(event.to_string());
    }
    assert_eq!(lines.first().map(String::as_str), Some("Deploying subsystem 'app'"));
    assert!(lines.contains(&"deploy@web1:22 \u{2713} cat VERSION".to_string()));
    assert!(lines.contains(&"deploy@web2:22 \u{2713} cat VERSION".to_string()));
    assert!(lines.contains(&"Finished deploying subsystem 'app'".to_string()));
    assert!(lines.contains(&"deploy@web1:22 \u{2713} Component server has been stopped".to_string()));
}
