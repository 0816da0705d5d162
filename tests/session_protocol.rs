// tests/session_protocol.rs

mod common;
use crate::common::{fake_pool, init_tracing, ready_session, with_timeout};

use std::sync::Arc;

use shellfleet::descriptor::CommandDescriptor;
use shellfleet::errors::FleetError;
use shellfleet::progress::{ProgressEvent, Reporter};
use shellfleet::shell::prompt::ShellKind;
use shellfleet::shell::{RemoteSession, SessionState};
use shellfleet::exec::CompileStrategy;
use shellfleet_test_utils::builders::{DescriptorBuilder, fast_settings, host};
use shellfleet_test_utils::fake_shell::{FakeConnector, FakeShell, Reply, ShellScript};

fn plain(command: &str) -> CommandDescriptor {
    CommandDescriptor::builder().command(command).build().unwrap()
}

#[tokio::test]
async fn negotiates_bash_and_zsh() {
    init_tracing();
    let settings = fast_settings();

    let (bash, handle) = with_timeout(ready_session(
        &host("node1"),
        ShellScript::bash(),
        &settings,
        Reporter::silent(),
    ))
    .await;
    assert_eq!(bash.state(), SessionState::Ready);
    assert_eq!(bash.shell(), Some(ShellKind::Bash));
    assert!(bash.is_connected());
    assert_eq!(handle.sent()[0], "stty -echo");

    let (zsh, handle) = with_timeout(ready_session(
        &host("node2"),
        ShellScript::zsh(),
        &settings,
        Reporter::silent(),
    ))
    .await;
    assert_eq!(zsh.shell(), Some(ShellKind::Zsh));
    assert!(handle.sent().iter().any(|l| l.starts_with("unsetopt zle")));
}

#[tokio::test]
async fn unsupported_shell_is_rejected_and_transport_closed() {
    init_tracing();
    let shell = FakeShell::new(ShellScript::named("fish"));
    let handle = shell.handle();

    let err = with_timeout(RemoteSession::establish(
        host("node1"),
        Box::new(shell),
        &fast_settings(),
        Reporter::silent(),
    ))
    .await
    .unwrap_err();

    match err {
        FleetError::ShellUnsupported { shell, .. } => assert_eq!(shell, "fish"),
        other => panic!("expected ShellUnsupported, got {other:?}"),
    }
    assert!(handle.was_closed());
    assert!(handle.commands().is_empty());
}

#[tokio::test]
async fn silent_shell_is_a_connection_error() {
    init_tracing();
    let err = with_timeout(RemoteSession::establish(
        host("node1"),
        Box::new(FakeShell::new(ShellScript::silent())),
        &fast_settings(),
        Reporter::silent(),
    ))
    .await
    .unwrap_err();

    assert!(matches!(err, FleetError::Connection { .. }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn captures_exactly_the_command_output() {
    init_tracing();
    let script = ShellScript::bash()
        .reply("ls /srv", Reply::output("app\nlogs\n"))
        .reply("true", Reply::output(""));
    let (mut session, handle) =
        ready_session(&host("node1"), script, &fast_settings(), Reporter::silent()).await;

    let output = with_timeout(session.execute(&plain("ls /srv"))).await.unwrap();
    assert_eq!(output, "app\nlogs\n");

    let output = with_timeout(session.execute(&plain("true"))).await.unwrap();
    assert_eq!(output, "");

    assert_eq!(handle.commands(), vec!["ls /srv", "true"]);
}

#[tokio::test]
async fn keeps_output_without_trailing_newline() {
    init_tracing();
    let script = ShellScript::zsh()
        .reply("cat version.txt", Reply::output("1.4.2"))
        .reply("ls", Reply::output("a\nb"));
    let (mut session, _) =
        ready_session(&host("node1"), script, &fast_settings(), Reporter::silent()).await;

    let output = with_timeout(session.execute(&plain("cat version.txt")))
        .await
        .unwrap();
    assert_eq!(output, "1.4.2");

    let output = with_timeout(session.execute(&plain("ls"))).await.unwrap();
    assert_eq!(output, "a\nb");

    let compiled = CommandDescriptor::builder()
        .command("ls")
        .execution_strategy(Arc::new(CompileStrategy::new("/src/lib")))
        .build()
        .unwrap();
    let output = with_timeout(session.execute(&compiled)).await.unwrap();
    assert_eq!(output, "a\nb");
}

#[tokio::test]
async fn release_pattern_matching_mid_line_keeps_line_start() {
    init_tracing();
    let script = ShellScript::bash().reply(
        "./server --port 80",
        Reply::output("booting\nServer started on port 80\n"),
    );
    let (mut session, _) =
        ready_session(&host("node1"), script, &fast_settings(), Reporter::silent()).await;

    let descriptor = CommandDescriptor::builder()
        .command("./server --port 80")
        .release_pattern(r"port (\d+)")
        .build()
        .unwrap();

    let output = with_timeout(session.execute(&descriptor)).await.unwrap();
    assert_eq!(output, "booting\nServer started on ");
}

#[tokio::test]
async fn non_zero_exit_is_reported_with_truncated_command() {
    init_tracing();
    let script = ShellScript::bash().reply(
        "deploy-release --all",
        Reply::output("partial\n").exit_code(2),
    );
    let (mut session, _) =
        ready_session(&host("node1"), script, &fast_settings(), Reporter::silent()).await;

    let err = with_timeout(session.execute(&plain("deploy-release --all")))
        .await
        .unwrap_err();
    match &err {
        FleetError::NonZeroExit { command, code, .. } => {
            assert_eq!(command, "deploy-release -");
            assert_eq!(*code, 2);
        }
        other => panic!("expected NonZeroExit, got {other:?}"),
    }
    assert_eq!(
        err.to_string(),
        "The command 'deploy-release -...' returned a non-zero error code (2) in deploy@node1:22"
    );
    // Not fatal: the session keeps working.
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn error_text_fails_the_command() {
    init_tracing();
    let script = ShellScript::bash().reply("migrate", Reply::output("step 1\nFATAL: no database\n"));
    let (mut session, _) =
        ready_session(&host("node1"), script, &fast_settings(), Reporter::silent()).await;

    let descriptor = CommandDescriptor::builder()
        .command("migrate")
        .error_texts(["FATAL"])
        .error_message("migration failed")
        .build()
        .unwrap();

    let err = with_timeout(session.execute(&descriptor)).await.unwrap_err();
    match err {
        FleetError::CommandFailed { message, .. } => assert_eq!(message, "migration failed"),
        other => panic!("expected CommandFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn error_text_wins_over_timeout() {
    init_tracing();
    let script = ShellScript::bash().reply(
        "serve",
        Reply::output("Exception in thread main\n").without_prompt(),
    );
    let (mut session, _) =
        ready_session(&host("node1"), script, &fast_settings(), Reporter::silent()).await;

    let descriptor = CommandDescriptor::builder()
        .command("serve")
        .error_texts(["Exception"])
        .timeout(100)
        .build()
        .unwrap();

    let err = with_timeout(session.execute(&descriptor)).await.unwrap_err();
    assert!(matches!(err, FleetError::CommandFailed { .. }));
}

#[tokio::test]
async fn hung_command_times_out() {
    init_tracing();
    let script = ShellScript::bash().reply("sleep 600", Reply::output("").without_prompt());
    let (mut session, _) =
        ready_session(&host("node1"), script, &fast_settings(), Reporter::silent()).await;

    let descriptor = CommandDescriptor::builder()
        .command("sleep 600")
        .timeout(100)
        .build()
        .unwrap();

    let err = with_timeout(session.execute(&descriptor)).await.unwrap_err();
    match err {
        FleetError::OperationTimeout { pattern, host } => {
            assert_eq!(pattern, "the distinguished prompt");
            assert_eq!(host, "deploy@node1:22");
        }
        other => panic!("expected OperationTimeout, got {other:?}"),
    }
}

#[tokio::test]
async fn release_pattern_completes_and_tracks_execution() {
    init_tracing();
    let script = ShellScript::bash()
        .reply("nohup ./server &", Reply::output("booting\nListening on 8080\n"));
    let (mut session, handle) =
        ready_session(&host("node1"), script, &fast_settings(), Reporter::silent()).await;

    let descriptor = CommandDescriptor::builder()
        .command("nohup ./server &")
        .release_pattern(r"Listening on (\d+)")
        .is_execution()
        .execution_name("api")
        .search_criterion("./server")
        .build()
        .unwrap();

    let output = with_timeout(session.execute(&descriptor)).await.unwrap();
    assert_eq!(output, "booting\n");
    assert_eq!(session.executions().len(), 1);
    assert_eq!(session.executions()[0].composite_name, "api");

    with_timeout(session.stop_all_executions()).await.unwrap();
    assert!(session.executions().is_empty());
    assert_eq!(
        handle.commands().last().map(String::as_str),
        Some("pkill -f -- './server'")
    );
}

#[tokio::test]
async fn executions_stop_most_recent_first() {
    init_tracing();
    let (reporter, mut events) = Reporter::channel();
    let (mut session, handle) =
        ready_session(&host("node1"), ShellScript::bash(), &fast_settings(), reporter).await;

    for name in ["db", "cache", "api"] {
        let descriptor = CommandDescriptor::builder()
            .command(format!("start-{name}"))
            .is_execution()
            .execution_name(name)
            .build()
            .unwrap();
        session.execute_quietly(&descriptor).await.unwrap();
    }

    let stopped = with_timeout(session.stop_executions(&Default::default()))
        .await
        .unwrap();
    assert_eq!(stopped, vec!["api", "cache", "db"]);

    let kills: Vec<String> = handle
        .commands()
        .into_iter()
        .filter(|c| c.starts_with("pkill"))
        .collect();
    assert_eq!(
        kills,
        vec![
            "pkill -f -- 'start-api'",
            "pkill -f -- 'start-cache'",
            "pkill -f -- 'start-db'"
        ]
    );

    let event = events.recv().await.unwrap();
    assert_eq!(
        event,
        ProgressEvent::ComponentsStopped {
            host: host("node1"),
            components: vec!["api".into(), "cache".into(), "db".into()],
        }
    );
}

#[tokio::test]
async fn success_and_failure_are_reported_unless_quiet() {
    init_tracing();
    let (reporter, mut events) = Reporter::channel();
    let script = ShellScript::bash().reply("false", Reply::output("").exit_code(1));
    let (mut session, _) =
        ready_session(&host("node1"), script, &fast_settings(), reporter).await;

    session.execute(&plain("uptime")).await.unwrap();
    assert_eq!(
        events.recv().await.unwrap().to_string(),
        "deploy@node1:22 \u{2713} uptime"
    );

    session.execute_quietly(&plain("uptime")).await.unwrap();
    let failing = CommandDescriptor::builder()
        .command("false")
        .error_message("false is false")
        .build()
        .unwrap();
    session.execute(&failing).await.unwrap_err();
    assert_eq!(
        events.recv().await.unwrap().to_string(),
        "deploy@node1:22 \u{2717} false is false"
    );
}

#[tokio::test]
async fn compile_strategy_reports_missing_directory() {
    init_tracing();
    let script = ShellScript::bash()
        .reply(
            "cd /src/app && make",
            Reply::output("bash: cd: /src/app: No such file or directory\n"),
        )
        .reply("cd /src/lib && make", Reply::output("cc -o lib.o\n"));
    let (mut session, _) =
        ready_session(&host("node1"), script, &fast_settings(), Reporter::silent()).await;

    let failing = CommandDescriptor::builder()
        .command("cd /src/app && make")
        .execution_strategy(Arc::new(CompileStrategy::new("/src/app")))
        .build()
        .unwrap();
    match with_timeout(session.execute(&failing)).await.unwrap_err() {
        FleetError::Deployment(message) => {
            assert_eq!(message, "No such file or directory \"/src/app\"")
        }
        other => panic!("expected Deployment, got {other:?}"),
    }

    let working = CommandDescriptor::builder()
        .command("cd /src/lib && make")
        .execution_strategy(Arc::new(CompileStrategy::new("/src/lib")))
        .build()
        .unwrap();
    let output = with_timeout(session.execute(&working)).await.unwrap();
    assert_eq!(output, "cc -o lib.o\n");
}

#[tokio::test]
async fn transcript_records_sent_and_received_text() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let settings = fast_settings().with_sessions_dir(dir.path());
    let script = ShellScript::bash().reply("hostname", Reply::output("node1\n"));

    let (mut session, _) =
        ready_session(&host("node1"), script, &settings, Reporter::silent()).await;
    session.execute(&plain("hostname")).await.unwrap();
    session.close().await.unwrap();
    session.close().await.unwrap();

    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("deploy@node1:22-"), "unexpected name {name}");
    assert!(name.ends_with(".txt"));

    let text = std::fs::read_to_string(&files[0]).unwrap();
    assert!(text.contains(">>> hostname"));
    assert!(text.contains("node1\n"));
}

#[tokio::test]
async fn dropped_connection_closes_the_host_queue() {
    init_tracing();
    let node = host("node1");
    let connector = Arc::new(FakeConnector::new(ShellScript::bash().close_on("reboot")));
    let pool = fake_pool(&connector, Reporter::silent());

    with_timeout(pool.connect_all(&[node.clone()])).await.unwrap();
    let queue = pool.queue(&node).await.unwrap();

    let reboot = DescriptorBuilder::new("reboot").on(node.clone()).shared();
    let err = with_timeout(queue.execute(reboot)).await.unwrap_err();
    assert!(matches!(err, FleetError::Connection { .. }));

    let next = DescriptorBuilder::new("uptime").on(node.clone()).shared();
    let err = with_timeout(queue.execute(next)).await.unwrap_err();
    assert!(matches!(err, FleetError::QueueClosed { .. }));

    // A dead queue is replaced on the next connect.
    with_timeout(pool.connect_all(&[node.clone()])).await.unwrap();
    assert_eq!(connector.connection_count(), 2);
}

#[tokio::test]
async fn pool_shares_one_session_per_host_and_fails_fast() {
    init_tracing();
    let (a, b, down) = (host("a"), host("b"), host("down"));
    let connector = Arc::new(FakeConnector::new(ShellScript::bash()).unreachable(down.clone()));
    let pool = fake_pool(&connector, Reporter::silent());

    with_timeout(pool.connect_all(&[a.clone(), b.clone(), a.clone()]))
        .await
        .unwrap();
    assert_eq!(connector.connection_count(), 2);
    with_timeout(pool.connect_all(&[a.clone()])).await.unwrap();
    assert_eq!(connector.connection_count(), 2);

    let err = with_timeout(pool.connect_all(&[down.clone()]))
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Connection { .. }));
    assert!(pool.queue(&down).await.is_err());

    with_timeout(pool.close_all()).await.unwrap();
    assert!(connector.handle(&a).unwrap().was_closed());
    assert!(connector.handle(&b).unwrap().was_closed());
    assert!(pool.hosts().await.is_empty());
}
