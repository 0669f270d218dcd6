use broker_sql_pool::test_utils::{MockConnector, MockOp};
use broker_sql_pool::{DatabaseConfig, Dispatcher, SqlPoolError};

fn config(connections: usize) -> Result<DatabaseConfig, SqlPoolError> {
    DatabaseConfig::builder("centreon_storage")
        .connections(connections)
        .finish()
}

#[tokio::test]
async fn round_robin_cycles_over_every_worker() -> Result<(), SqlPoolError> {
    let connector = MockConnector::new();
    let journal = connector.journal();
    let dispatcher = Dispatcher::connect(config(3)?, connector).await?;
    assert_eq!(dispatcher.connections_count(), 3);

    let mut routed = Vec::new();
    for i in 0..7 {
        let sql = format!("UPDATE hosts SET enabled = 1 WHERE host_id = {i}");
        routed.push(dispatcher.run_query(&sql, "", false, None).await?);
    }
    assert_eq!(routed, vec![0, 1, 2, 0, 1, 2, 0]);

    // Replies come back in queue order, so every query above has run.
    dispatcher.commit().await?;
    assert_eq!(journal.statements(0).len(), 3);
    assert_eq!(journal.statements(1).len(), 2);
    assert_eq!(journal.statements(2).len(), 2);
    assert_eq!(
        journal.statements(1),
        vec![
            "UPDATE hosts SET enabled = 1 WHERE host_id = 1".to_string(),
            "UPDATE hosts SET enabled = 1 WHERE host_id = 4".to_string(),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn pinned_queries_bypass_round_robin() -> Result<(), SqlPoolError> {
    let dispatcher = Dispatcher::connect(config(3)?, MockConnector::new()).await?;

    assert_eq!(dispatcher.run_query("DELETE FROM logs", "", false, Some(2)).await?, 2);
    // The pinned call does not move the round robin cursor.
    assert_eq!(dispatcher.run_query("DELETE FROM logs", "", false, None).await?, 0);

    let err = dispatcher
        .run_query("DELETE FROM logs", "", false, Some(3))
        .await;
    assert!(matches!(err, Err(SqlPoolError::UnknownWorker(3))));
    Ok(())
}

#[tokio::test]
async fn statement_ids_increase_and_reach_every_worker() -> Result<(), SqlPoolError> {
    let connector = MockConnector::new();
    let journal = connector.journal();
    let dispatcher = Dispatcher::connect(config(2)?, connector).await?;

    let first = dispatcher.prepare_query("INSERT INTO hosts (host_id) VALUES (?)")?;
    let second = dispatcher.prepare_query("UPDATE hosts SET name = ? WHERE host_id = ?")?;
    let third = dispatcher
        .prepare_query_sync("DELETE FROM hosts WHERE host_id = ?")
        .await?;

    assert_eq!(first.get(), 1);
    assert!(first < second && second < third);
    assert_eq!(third.get(), 3);

    for worker in 0..2 {
        let prepared: Vec<MockOp> = journal
            .ops(worker)
            .into_iter()
            .filter(|op| matches!(op, MockOp::Prepare(_)))
            .collect();
        assert_eq!(
            prepared,
            vec![
                MockOp::Prepare("INSERT INTO hosts (host_id) VALUES (?)".into()),
                MockOp::Prepare("UPDATE hosts SET name = ? WHERE host_id = ?".into()),
                MockOp::Prepare("DELETE FROM hosts WHERE host_id = ?".into()),
            ]
        );
    }
    Ok(())
}

#[tokio::test]
async fn last_insert_id_is_read_from_the_pinned_worker() -> Result<(), SqlPoolError> {
    let dispatcher = Dispatcher::connect(config(2)?, MockConnector::new()).await?;

    dispatcher
        .run_query("INSERT INTO instances (name) VALUES ('poller-a')", "", false, Some(1))
        .await?;
    dispatcher
        .run_query("INSERT INTO instances (name) VALUES ('poller-b')", "", false, Some(1))
        .await?;
    dispatcher
        .run_query("INSERT INTO instances (name) VALUES ('central')", "", false, Some(0))
        .await?;

    assert_eq!(dispatcher.get_last_insert_id(1).await?, 1002);
    assert_eq!(dispatcher.get_last_insert_id(0).await?, 1);
    assert!(matches!(
        dispatcher.get_last_insert_id(4).await,
        Err(SqlPoolError::UnknownWorker(4))
    ));
    Ok(())
}
