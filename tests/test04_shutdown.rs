use std::time::{Duration, Instant};

use broker_sql_pool::test_utils::MockConnector;
use broker_sql_pool::{DatabaseConfig, Dispatcher, SqlPoolError, WorkerState};

fn config(connections: usize) -> Result<DatabaseConfig, SqlPoolError> {
    DatabaseConfig::builder("centreon_storage")
        .connections(connections)
        .finish()
}

#[tokio::test]
async fn finish_drains_queued_tasks() -> Result<(), SqlPoolError> {
    let connector = MockConnector::new().with_delay(Duration::from_millis(20));
    let journal = connector.journal();
    let dispatcher = Dispatcher::connect(config(1)?, connector).await?;

    for i in 0..5 {
        let sql = format!("INSERT INTO logs (id) VALUES ({i})");
        dispatcher.run_query(&sql, "", false, None).await?;
    }
    dispatcher.finish();

    assert_eq!(journal.statements(0).len(), 5);
    let stats = dispatcher.stats();
    assert_eq!(stats.workers[0].state, WorkerState::Stopped);
    assert_eq!(stats.workers[0].queued_tasks, 0);
    Ok(())
}

#[tokio::test]
async fn drop_drains_queued_tasks() -> Result<(), SqlPoolError> {
    let connector = MockConnector::new().with_delay(Duration::from_millis(10));
    let journal = connector.journal();
    let dispatcher = Dispatcher::connect(config(2)?, connector).await?;

    for _ in 0..6 {
        dispatcher
            .run_query("UPDATE hosts SET state = 1", "", false, None)
            .await?;
    }
    drop(dispatcher);

    assert_eq!(journal.statements(0).len(), 3);
    assert_eq!(journal.statements(1).len(), 3);
    Ok(())
}

#[tokio::test]
async fn finish_is_idempotent_and_closes_the_pool() -> Result<(), SqlPoolError> {
    let dispatcher = Dispatcher::connect(config(2)?, MockConnector::new()).await?;
    dispatcher.finish();
    dispatcher.finish();

    assert!(matches!(
        dispatcher.run_query("DELETE FROM logs", "", false, None).await,
        Err(SqlPoolError::WorkerUnavailable(_))
    ));
    assert!(matches!(
        dispatcher.get_last_insert_id(0).await,
        Err(SqlPoolError::WorkerUnavailable(0))
    ));
    assert!(matches!(
        dispatcher.commit().await,
        Err(SqlPoolError::WorkerUnavailable(_))
    ));
    assert!(matches!(
        dispatcher.prepare_query("INSERT INTO logs (output) VALUES (?)"),
        Err(SqlPoolError::WorkerUnavailable(_))
    ));
    assert!(matches!(
        dispatcher.prepare_query_sync("INSERT INTO logs (output) VALUES (?)").await,
        Err(SqlPoolError::WorkerUnavailable(_))
    ));
    assert!(
        dispatcher
            .stats()
            .workers
            .iter()
            .all(|worker| worker.state == WorkerState::Stopped)
    );
    Ok(())
}

#[tokio::test]
async fn finish_wait_is_bounded() -> Result<(), SqlPoolError> {
    let config = DatabaseConfig::builder("centreon_storage")
        .finish_timeout(Duration::ZERO)
        .finish()?;
    let connector = MockConnector::new().with_delay(Duration::from_millis(300));
    let dispatcher = Dispatcher::connect(config, connector).await?;

    for _ in 0..3 {
        dispatcher
            .run_query("UPDATE hosts SET state = 1", "", false, None)
            .await?;
    }
    let started = Instant::now();
    dispatcher.finish();
    assert!(started.elapsed() < Duration::from_millis(300));
    assert_eq!(dispatcher.stats().workers[0].state, WorkerState::Draining);
    Ok(())
}

#[tokio::test]
async fn stats_report_queued_tasks() -> Result<(), SqlPoolError> {
    let connector = MockConnector::new().with_delay(Duration::from_millis(200));
    let dispatcher = Dispatcher::connect(config(1)?, connector).await?;

    let stats = dispatcher.stats();
    assert_eq!(stats.workers[0].state, WorkerState::Ready);
    assert_eq!(stats.workers[0].queued_tasks, 0);

    for _ in 0..3 {
        dispatcher
            .run_query("UPDATE hosts SET state = 1", "", false, None)
            .await?;
    }
    // The first query may already be running; the others wait behind it.
    let stats = dispatcher.stats();
    assert!(stats.workers[0].queued_tasks >= 2, "{stats:?}");

    let json = serde_json::to_string(&stats).map_err(|e| SqlPoolError::Other(e.to_string()))?;
    assert!(json.contains("\"state\":\"ready\""), "{json}");
    Ok(())
}
