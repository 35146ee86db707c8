use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

use batch_lite::attribute::Permission;
use batch_lite::config::ServerConfig;
use batch_lite::error::ErrorKind;
use batch_lite::node::Node;
use batch_lite::scheduler::seed::load_table;
use batch_lite::scheduler::JobId;
use batch_lite::select::{Criterion, QueryKind, Reply, Requester, SelectRequest};

const SEED: &str = r#"{
    "queues": [
        { "name": "batch", "kind": "execution" },
        { "name": "route", "kind": "route" }
    ],
    "jobs": [
        {
            "id": "1.headnode", "queue": "batch", "state": "R", "owner": "alice@login1",
            "attributes": { "Job_Name": "sim", "exec_host": "node01/0" },
            "resources": { "walltime": "02:00:00", "ncpus": "8" },
            "environment": { "PBS_O_HOME": "/home/alice", "pbs_var_OMP_NUM_THREADS": "8" },
            "refreshed_secs_ago": 600
        },
        {
            "id": "2.headnode", "queue": "batch", "state": "R", "owner": "bob@login1",
            "resources": { "walltime": "00:30:00" }
        },
        { "id": "3.headnode", "queue": "route", "owner": "alice@login1" }
    ]
}"#;

fn seed_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn criteria(args: &[&str]) -> Vec<Criterion> {
    args.iter().map(|c| c.parse().unwrap()).collect()
}

#[test]
fn load_table_from_file() {
    let file = seed_file(SEED);
    let table = load_table(file.path(), "headnode").unwrap();

    assert_eq!(table.server_name(), "headnode");
    assert_eq!(table.len(), 3);
    assert_eq!(table.queue_names(), vec!["batch", "route"]);
    assert!(table.contains(&JobId::from("3.headnode")));
}

#[test]
fn load_table_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_table(&dir.path().join("absent.json"), "headnode").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn load_table_rejects_unknown_queue() {
    let file = seed_file(r#"{ "jobs": [{ "id": "1.s", "queue": "nowhere", "owner": "a@h" }] }"#);
    let err = load_table(file.path(), "s").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownQueue);
}

#[tokio::test]
async fn node_answers_select_status_over_seeded_table() {
    let file = seed_file(SEED);
    let table = Arc::new(load_table(file.path(), "headnode").unwrap());
    let config = ServerConfig::new("headnode", "127.0.0.1:0".parse().unwrap());
    let node = Node::new(config, table);
    let engine = node.engine.clone();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(node.run(shutdown.clone()));

    let request = SelectRequest::new(
        Requester::new("alice", "login1", Permission::USER),
        QueryKind::SelectStatus,
        criteria(&["Resource_List.walltime.ge.01:00:00"]),
    );
    let reply = engine.handle_select(&request).await.unwrap();

    let Reply::StatusRecords(records) = reply else {
        panic!("expected status records");
    };
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].job_id, JobId::from("1.headnode"));
    assert_eq!(
        records[0].value("Variable_List"),
        Some("PBS_O_HOME=/home/alice,OMP_NUM_THREADS=8")
    );
    assert_eq!(records[0].resource_value("Resource_List", "ncpus"), Some("8"));

    // The loopback agent confirmed the stale status.
    let age = engine
        .table()
        .with_job(&JobId::from("1.headnode"), |job| {
            chrono::Utc::now() - job.last_status_refresh
        })
        .unwrap();
    assert!(age < chrono::Duration::seconds(30));

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn node_with_poll_jobs_leaves_cached_status() {
    let file = seed_file(SEED);
    let table = Arc::new(load_table(file.path(), "headnode").unwrap());
    let config = ServerConfig::new("headnode", "127.0.0.1:0".parse().unwrap()).with_poll_jobs(true);
    let node = Node::new(config, table);

    let request = SelectRequest::new(
        Requester::new("root", "login1", Permission::MANAGER),
        QueryKind::SelectStatus,
        criteria(&["job_state.eq.R"]),
    );
    let reply = node.engine.handle_select(&request).await.unwrap();
    assert_eq!(reply.len(), 2);

    let age = node
        .table
        .with_job(&JobId::from("1.headnode"), |job| {
            chrono::Utc::now() - job.last_status_refresh
        })
        .unwrap();
    assert!(age >= chrono::Duration::seconds(600));
}
