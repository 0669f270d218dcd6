use broker_sql_pool::test_utils::MockConnector;
use broker_sql_pool::{Bind, BindValue, DatabaseConfig, Dispatcher, SqlPoolError, StatementId};

fn config(connections: usize) -> Result<DatabaseConfig, SqlPoolError> {
    DatabaseConfig::builder("centreon_storage")
        .connections(connections)
        .finish()
}

#[tokio::test]
async fn failed_prepare_is_latched_as_fatal() -> Result<(), SqlPoolError> {
    let dispatcher =
        Dispatcher::connect(config(3)?, MockConnector::new().fail_prepare_on(2)).await?;

    let id = dispatcher.prepare_query("INSERT INTO comments (data) VALUES (?)")?;
    assert_eq!(id.get(), 1);
    // A commit reply from every worker means the prepare ran everywhere.
    dispatcher.commit().await?;

    let latched = dispatcher.get_error().expect("latched prepare failure");
    assert!(latched.is_fatal());
    assert!(
        latched.message().contains("statement preparation failed"),
        "{latched}"
    );
    assert_eq!(dispatcher.get_error(), None);
    Ok(())
}

#[tokio::test]
async fn next_sync_call_raises_the_fatal_error() -> Result<(), SqlPoolError> {
    let dispatcher =
        Dispatcher::connect(config(3)?, MockConnector::new().fail_prepare_on(2)).await?;

    dispatcher.prepare_query("INSERT INTO comments (data) VALUES (?)")?;
    dispatcher.commit().await?;

    // Asynchronous calls never raise latched errors.
    dispatcher.run_query("DELETE FROM comments", "", false, None).await?;

    match dispatcher.run_query_sync("SELECT 1", "", Some(0)).await {
        Err(SqlPoolError::Fatal { worker, message }) => {
            assert_eq!(worker, 2);
            assert!(message.contains("statement preparation failed"), "{message}");
        }
        other => panic!("expected the latched fatal error, got {other:?}"),
    }
    // Raising the error cleared it.
    assert_eq!(dispatcher.run_query_sync("SELECT 1", "", Some(0)).await?, 0);
    Ok(())
}

#[tokio::test]
async fn prepare_query_sync_reports_failures() -> Result<(), SqlPoolError> {
    let dispatcher =
        Dispatcher::connect(config(3)?, MockConnector::new().fail_prepare_on(1)).await?;

    let err = dispatcher
        .prepare_query_sync("UPDATE hosts SET name = ? WHERE host_id = ?")
        .await;
    assert!(matches!(err, Err(SqlPoolError::Fatal { worker: 1, .. })));
    assert!(dispatcher.check_errors().is_ok());

    // The failed id is still consumed.
    let next = dispatcher.prepare_query("DELETE FROM hosts")?;
    assert_eq!(next.get(), 2);
    Ok(())
}

#[tokio::test]
async fn fatal_query_failure_is_latched_first_error_wins() -> Result<(), SqlPoolError> {
    let dispatcher =
        Dispatcher::connect(config(1)?, MockConnector::new().fail_queries_containing("broken"))
            .await?;

    dispatcher
        .run_query("INSERT INTO broken_a VALUES (1)", "cannot insert", true, None)
        .await?;
    dispatcher
        .run_query("INSERT INTO broken_b VALUES (1)", "cannot insert", true, None)
        .await?;
    dispatcher.commit().await?;

    let latched = dispatcher.get_error().expect("latched query failure");
    assert!(latched.is_fatal());
    assert!(latched.message().contains("broken_a"), "{latched}");
    assert_eq!(dispatcher.get_error(), None);
    Ok(())
}

#[tokio::test]
async fn non_fatal_query_failure_is_only_logged() -> Result<(), SqlPoolError> {
    let dispatcher =
        Dispatcher::connect(config(2)?, MockConnector::new().fail_queries_containing("broken"))
            .await?;

    dispatcher
        .run_query("INSERT INTO broken VALUES (1)", "", false, None)
        .await?;
    dispatcher.commit().await?;
    assert_eq!(dispatcher.get_error(), None);
    Ok(())
}

#[tokio::test]
async fn sync_query_failure_is_returned_directly() -> Result<(), SqlPoolError> {
    let dispatcher =
        Dispatcher::connect(config(1)?, MockConnector::new().fail_queries_containing("broken"))
            .await?;

    match dispatcher
        .run_query_sync("SELECT * FROM broken", "cannot read", None)
        .await
    {
        Err(SqlPoolError::ExecutionError(message)) => {
            assert!(message.starts_with("cannot read: "), "{message}");
        }
        other => panic!("expected an execution error, got {other:?}"),
    }
    assert_eq!(dispatcher.get_error(), None);
    Ok(())
}

#[tokio::test]
async fn unknown_statement_is_a_non_fatal_protocol_error() -> Result<(), SqlPoolError> {
    let dispatcher = Dispatcher::connect(config(1)?, MockConnector::new()).await?;
    let unknown: StatementId =
        serde_json::from_str("7").map_err(|e| SqlPoolError::Other(e.to_string()))?;

    dispatcher
        .run_statement(unknown, Bind::new(), "", true, None)
        .await?;
    dispatcher.commit().await?;
    let latched = dispatcher.get_error().expect("latched protocol error");
    assert!(!latched.is_fatal());
    assert!(latched.message().contains("not prepared"), "{latched}");

    let err = dispatcher
        .run_statement_sync(unknown, Bind::new(), "", None)
        .await;
    assert!(matches!(err, Err(SqlPoolError::StatementNotPrepared(7))));
    Ok(())
}

#[tokio::test]
async fn check_affected_rows_fails_on_zero() -> Result<(), SqlPoolError> {
    let dispatcher =
        Dispatcher::connect(config(2)?, MockConnector::new().no_rows_affected_by("host_id = 0"))
            .await?;

    let thread = dispatcher
        .run_query_sync("UPDATE hosts SET enabled = 0 WHERE host_id = 12", "", Some(1))
        .await?;
    assert_eq!(dispatcher.get_affected_rows(thread, None).await?, 1);
    assert_eq!(dispatcher.check_affected_rows(thread, None, "no host").await?, 1);

    dispatcher
        .run_query_sync("UPDATE hosts SET enabled = 0 WHERE host_id = 0", "", Some(1))
        .await?;
    match dispatcher.check_affected_rows(1, None, "host 0 not found").await {
        Err(SqlPoolError::NoRowsAffected(message)) => assert_eq!(message, "host 0 not found"),
        other => panic!("expected no rows affected, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn affected_rows_by_statement() -> Result<(), SqlPoolError> {
    let dispatcher = Dispatcher::connect(config(1)?, MockConnector::new()).await?;

    let update = dispatcher
        .prepare_query_sync("UPDATE services SET state = ? WHERE service_id = ?")
        .await?;
    let bind: Bind = [BindValue::U32(2), BindValue::U32(40)].into_iter().collect();
    dispatcher.run_statement_sync(update, bind, "", None).await?;
    assert_eq!(dispatcher.get_affected_rows(0, Some(update)).await?, 1);

    let unknown: StatementId =
        serde_json::from_str("99").map_err(|e| SqlPoolError::Other(e.to_string()))?;
    assert!(matches!(
        dispatcher.get_affected_rows(0, Some(unknown)).await,
        Err(SqlPoolError::StatementNotPrepared(99))
    ));
    Ok(())
}

#[tokio::test]
async fn connection_failure_stops_the_pool() {
    let connector = MockConnector::new().fail_connect_on(1);
    let journal = connector.journal();
    let config = DatabaseConfig::builder("centreon_storage")
        .connections(3)
        .finish()
        .expect("valid config");

    let err = Dispatcher::connect(config, connector).await;
    match err {
        Err(SqlPoolError::ConnectionError(message)) => {
            assert!(message.contains("worker 1"), "{message}");
        }
        other => panic!("expected a connection error, got {other:?}"),
    }
    assert_eq!(journal.events().len(), 3 + 2);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let config = DatabaseConfig {
        connections_count: 0,
        ..DatabaseConfig::default()
    };
    let err = Dispatcher::connect(config, MockConnector::new()).await;
    assert!(matches!(err, Err(SqlPoolError::ConfigError(_))));
}
