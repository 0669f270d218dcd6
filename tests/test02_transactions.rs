use broker_sql_pool::test_utils::{MockConnector, MockOp};
use broker_sql_pool::{Bind, BindValue, DatabaseConfig, Dispatcher, SqlPoolError};

fn batched(connections: usize, queries_per_transaction: u32) -> Result<DatabaseConfig, SqlPoolError> {
    DatabaseConfig::builder("centreon_storage")
        .connections(connections)
        .queries_per_transaction(queries_per_transaction)
        .finish()
}

#[tokio::test]
async fn threshold_commits_every_worker() -> Result<(), SqlPoolError> {
    let connector = MockConnector::new();
    let journal = connector.journal();
    let dispatcher = Dispatcher::connect(batched(2, 3)?, connector).await?;

    let mut routed = Vec::new();
    routed.push(dispatcher.run_query("INSERT INTO logs VALUES (1)", "", false, None).await?);
    routed.push(dispatcher.run_query("INSERT INTO logs VALUES (2)", "", false, None).await?);
    assert_eq!(dispatcher.pending_queries(), 2);
    routed.push(dispatcher.run_query("INSERT INTO logs VALUES (3)", "", false, None).await?);

    assert_eq!(routed, vec![0, 1, 0]);
    assert_eq!(dispatcher.pending_queries(), 0);

    assert_eq!(
        journal.ops(0),
        vec![
            MockOp::Connect,
            MockOp::Autocommit(false),
            MockOp::Query("INSERT INTO logs VALUES (1)".into()),
            MockOp::Query("INSERT INTO logs VALUES (3)".into()),
            MockOp::Commit,
        ]
    );
    assert_eq!(
        journal.ops(1),
        vec![
            MockOp::Connect,
            MockOp::Autocommit(false),
            MockOp::Query("INSERT INTO logs VALUES (2)".into()),
            MockOp::Commit,
        ]
    );
    Ok(())
}

#[tokio::test]
async fn statements_count_toward_the_threshold() -> Result<(), SqlPoolError> {
    let connector = MockConnector::new();
    let journal = connector.journal();
    let dispatcher = Dispatcher::connect(batched(1, 2)?, connector).await?;

    let insert = dispatcher.prepare_query("INSERT INTO metrics (metric_id, value) VALUES (?, ?)")?;
    let mut bind = Bind::with_size(2);
    bind.set_value_as_u32(0, 18);
    bind.set_value_as_f64(1, 0.25);
    dispatcher.run_statement(insert, bind, "", false, None).await?;
    assert_eq!(dispatcher.pending_queries(), 1);
    assert_eq!(journal.commits(0), 0);

    let bind: Bind = vec![BindValue::U32(19), BindValue::F64(f64::INFINITY)].into();
    dispatcher.run_statement(insert, bind, "", false, None).await?;
    assert_eq!(dispatcher.pending_queries(), 0);
    assert_eq!(journal.commits(0), 1);

    let executed: Vec<Vec<BindValue>> = journal
        .ops(0)
        .into_iter()
        .filter_map(|op| match op {
            MockOp::Execute { values, .. } => Some(values),
            _ => None,
        })
        .collect();
    assert_eq!(
        executed,
        vec![
            vec![BindValue::U32(18), BindValue::F64(0.25)],
            vec![BindValue::U32(19), BindValue::F64(f64::INFINITY)],
        ]
    );
    Ok(())
}

#[tokio::test]
async fn autocommit_stays_on_without_batching() -> Result<(), SqlPoolError> {
    let connector = MockConnector::new();
    let journal = connector.journal();
    let dispatcher = Dispatcher::connect(batched(1, 1)?, connector).await?;

    for _ in 0..4 {
        dispatcher.run_query("DELETE FROM downtimes", "", false, None).await?;
    }
    assert_eq!(dispatcher.pending_queries(), 0);
    dispatcher.finish();

    assert_eq!(journal.ops(0)[1], MockOp::Autocommit(true));
    assert_eq!(journal.commits(0), 0);
    Ok(())
}

#[tokio::test]
async fn commit_skips_idle_workers() -> Result<(), SqlPoolError> {
    let connector = MockConnector::new();
    let journal = connector.journal();
    let dispatcher = Dispatcher::connect(batched(3, 100)?, connector).await?;

    dispatcher.run_query("UPDATE services SET state = 2", "", false, Some(1)).await?;
    dispatcher.commit().await?;
    dispatcher.commit().await?;

    assert_eq!(journal.commits(0), 0);
    assert_eq!(journal.commits(1), 1);
    assert_eq!(journal.commits(2), 0);
    Ok(())
}

#[tokio::test]
async fn commit_waits_for_every_worker_despite_failures() -> Result<(), SqlPoolError> {
    let connector = MockConnector::new().fail_commit_on(0);
    let journal = connector.journal();
    let dispatcher = Dispatcher::connect(batched(3, 100)?, connector).await?;

    for _ in 0..3 {
        dispatcher.run_query("UPDATE hosts SET state = 0", "", false, None).await?;
    }
    assert_eq!(dispatcher.pending_queries(), 3);

    match dispatcher.commit().await {
        Err(SqlPoolError::CommitFailed(message)) => {
            assert!(message.contains("worker 0"), "{message}");
            assert!(!message.contains("worker 1"), "{message}");
        }
        other => panic!("expected a commit failure, got {other:?}"),
    }
    assert_eq!(dispatcher.pending_queries(), 0);
    assert_eq!(journal.commits(1), 1);
    assert_eq!(journal.commits(2), 1);
    Ok(())
}

#[tokio::test]
async fn busy_commits_are_retried() -> Result<(), SqlPoolError> {
    let connector = MockConnector::new().busy_commits(2);
    let journal = connector.journal();
    let dispatcher = Dispatcher::connect(batched(1, 10)?, connector).await?;

    dispatcher.run_query("UPDATE hosts SET state = 1", "", false, None).await?;
    dispatcher.commit().await?;
    assert_eq!(journal.commits(0), 3);
    Ok(())
}

#[tokio::test]
async fn commit_worker_only_touches_its_worker() -> Result<(), SqlPoolError> {
    let connector = MockConnector::new();
    let journal = connector.journal();
    let dispatcher = Dispatcher::connect(batched(2, 10)?, connector).await?;

    dispatcher.run_query("UPDATE hosts SET state = 1", "", false, Some(0)).await?;
    dispatcher.run_query("UPDATE hosts SET state = 1", "", false, Some(1)).await?;
    dispatcher.commit_worker(1).await?;

    assert_eq!(journal.commits(0), 0);
    assert_eq!(journal.commits(1), 1);
    assert!(matches!(
        dispatcher.commit_worker(2).await,
        Err(SqlPoolError::UnknownWorker(2))
    ));
    Ok(())
}
