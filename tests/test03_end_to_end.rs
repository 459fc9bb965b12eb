#![cfg(feature = "test-utils")]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use odbc_middleware::driver::SqlReturn;
use odbc_middleware::native::SqlDataType;
use odbc_middleware::prelude::*;
use odbc_middleware::query::ForegroundResult;
use odbc_middleware::test_utils::{MockDriver, MockScript};
use odbc_middleware::worker::QueryScheduler;
use odbc_middleware::{
    BytesSource, ConnectionPool, ParameterBinding, Query, QuerySettings, QueryState, ReaderSource,
};
use serde_json::json;

fn people() -> MockScript {
    MockScript::default().with_rows(
        &[
            ("id", SqlDataType::Integer, 10),
            ("name", SqlDataType::WVarChar, 32),
        ],
        vec![
            vec![SqlValue::Int(1), SqlValue::Text("ada".into())],
            vec![SqlValue::Int(2), SqlValue::Text("grace".into())],
            vec![SqlValue::Int(3), SqlValue::Null],
        ],
    )
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

async fn connect(driver: &MockDriver, workers: usize, pool_size: usize) -> OdbcConnection {
    init_tracing();
    OdbcConnection::builder("DSN=mock".into())
        .pool_size(pool_size)
        .worker_threads(workers)
        .build(Arc::new(driver.clone()))
        .await
        .unwrap()
}

#[tokio::test]
async fn zero_parameter_query_resolves_and_returns_connection_once() {
    let script = MockScript::default().with_rows(
        &[("one", SqlDataType::Integer, 10)],
        vec![vec![SqlValue::Int(1)]],
    );
    let driver = MockDriver::new(script);
    let pool = ConnectionPool::new(Arc::new(driver.clone()), "DSN=mock".into(), None, 1).unwrap();
    let connection = pool.lease_connection().await.unwrap();
    let (mut query, mut handle) =
        Query::new(pool.clone(), connection, "SELECT 1", Vec::new(), QuerySettings::default());

    query.process_background();
    assert_eq!(query.state(), QueryState::End);
    assert_eq!(query.process_foreground(), ForegroundResult::Discard);
    drop(query);

    let outcome = handle.try_outcome().unwrap().unwrap();
    assert_eq!(outcome.result.rows().len(), 1);
    assert_eq!(outcome.result.rows()[0].get("one"), Some(&SqlValue::Int(1)));
    let stats = pool.status();
    assert_eq!(stats.total_leases, 1);
    assert_eq!(stats.total_returns, 1);
    assert_eq!(stats.leased, 0);
}

#[tokio::test]
async fn streamed_parameter_resolves_after_two_background_runs() {
    let script = MockScript {
        exec: SqlReturn::NeedData,
        param_data: VecDeque::from([(SqlReturn::NeedData, Some(1)), (SqlReturn::Success, None)]),
        row_count: 1,
        ..MockScript::default()
    };
    let driver = MockDriver::new(script);
    let pool = ConnectionPool::new(Arc::new(driver.clone()), "DSN=mock".into(), None, 1).unwrap();
    let connection = pool.lease_connection().await.unwrap();
    let payload = b"long document body".to_vec();
    let stream = ParameterBinding::from_stream(
        SqlType::LongVarChar,
        Box::new(BytesSource::new(payload.clone())),
        payload.len(),
    )
    .unwrap();
    let (mut query, mut handle) = Query::new(
        pool.clone(),
        connection,
        "INSERT INTO docs (body) VALUES (?)",
        vec![stream],
        QuerySettings::default(),
    );

    let mut steps = 0;
    loop {
        query.process_background();
        steps += 1;
        match query.process_foreground() {
            ForegroundResult::Discard => break,
            ForegroundResult::SupplyData => query.supply_stream_data(),
            ForegroundResult::Reschedule => {}
        }
        assert!(steps < 10, "query never finished");
    }

    assert_eq!(query.background_runs(), 2);
    assert_eq!(query.data_requests(), 1);
    let outcome = handle.try_outcome().unwrap().unwrap();
    assert_eq!(outcome.rows_affected, 1);
    let log = driver.log();
    assert_eq!(log.put_data, vec![payload]);
    assert_eq!(log.param_data_calls, 2);
    assert_eq!(pool.status().total_returns, 1);
}

#[tokio::test]
async fn array_and_single_fetch_through_connection() {
    let driver = MockDriver::new(people());
    let conn = connect(&driver, 2, 2).await;

    let outcome = conn
        .prepare_query("SELECT id, name FROM people", Vec::new())
        .enable_metadata()
        .to_array()
        .await
        .unwrap();
    let rows = outcome.result.rows();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1].get("name").and_then(SqlValue::as_text), Some("grace"));
    assert_eq!(rows[2].get("name"), Some(&SqlValue::Null));
    let metadata = outcome.metadata.unwrap();
    assert_eq!(metadata[0].name, "id");
    assert_eq!(metadata[1].data_type, "nvarchar");
    assert_eq!(metadata[1].size, 32);
    assert_eq!(
        serde_json::to_value(&metadata[0]).unwrap(),
        json!({ "name": "id", "size": 10, "dataType": "int", "digits": 0, "nullable": true })
    );

    let single = conn
        .execute_query(FetchMode::Single, "SELECT id, name FROM people", Vec::new())
        .await
        .unwrap();
    assert!(single.metadata.is_none());
    match single.result {
        QueryResult::Single(Some(row)) => assert_eq!(row.get("id"), Some(&SqlValue::Int(1))),
        other => panic!("expected a single row, got {other:?}"),
    }
    assert_eq!(conn.pool().status().leased, 0);
}

#[tokio::test]
async fn output_parameters_and_return_value_through_connection() {
    let script = MockScript {
        outputs: vec![(1, SqlValue::Int(7)), (3, SqlValue::Text("done".into()))],
        ..MockScript::default()
    };
    let driver = MockDriver::new(script);
    let conn = connect(&driver, 1, 1).await;

    let status = OutputSlot::new(SqlValue::Text("pending".into()));
    let outcome = conn
        .prepare_query(
            "{ ? = call close_order(?, ?) }",
            vec![SqlValue::Int(5).into(), SqlOutput::as_nvarchar(&status, 10)],
        )
        .enable_return_value()
        .to_single()
        .await
        .unwrap();

    assert_eq!(outcome.return_value, Some(7));
    assert_eq!(status.get(), SqlValue::Text("done".into()));
    let ordinals: Vec<u16> = driver.log().binds.iter().map(|b| b.ordinal).collect();
    assert_eq!(ordinals, vec![1, 2, 3]);
}

#[tokio::test]
async fn driver_error_resolves_with_diagnostic_and_releases_connection() {
    let script = MockScript {
        exec: SqlReturn::Error,
        error: SqlError::new("Invalid object name 'nope'.", "42S02", 208),
        ..MockScript::default()
    };
    let driver = MockDriver::new(script);
    let conn = connect(&driver, 1, 1).await;

    let err = conn
        .execute_query(FetchMode::Array, "SELECT * FROM nope", Vec::new())
        .await
        .unwrap_err();
    let diag = err.sql_error().unwrap();
    assert_eq!((diag.sql_state.as_str(), diag.code), ("42S02", 208));
    assert_eq!(
        serde_json::to_value(diag).unwrap(),
        json!({ "message": "Invalid object name 'nope'.", "sqlState": "42S02", "code": 208 })
    );
    assert_eq!(conn.pool().status().leased, 0);
}

#[tokio::test]
async fn invalid_arguments_fail_before_leasing() {
    let driver = MockDriver::default();
    let conn = connect(&driver, 1, 1).await;
    let leases_before = conn.pool().status().total_leases;

    let bad = SqlArg::Numeric(json!({ "precision": 300, "scale": 0, "sign": true, "value": [] }));
    let err = conn
        .execute_query(FetchMode::Array, "SELECT ?", vec![bad])
        .await
        .unwrap_err();
    assert!(matches!(err, OdbcMiddlewareError::ValidationError(_)));
    assert_eq!(conn.pool().status().total_leases, leases_before);
    assert!(driver.log().executed.is_empty());
}

#[tokio::test]
async fn reader_stream_is_sent_in_chunks() {
    let script = MockScript {
        exec: SqlReturn::NeedData,
        param_data: VecDeque::from([(SqlReturn::NeedData, Some(1)), (SqlReturn::Success, None)]),
        ..MockScript::default()
    };
    let driver = MockDriver::new(script);
    let conn = connect(&driver, 2, 1).await;

    let body: &'static [u8] = b"0123456789";
    let arg = make_input_stream(SqlType::LongVarBinary, ReaderSource::new(body, 4), body.len())
        .unwrap();
    conn.execute_query(FetchMode::Array, "INSERT INTO blobs VALUES (?)", vec![arg])
        .await
        .unwrap();

    let sizes: Vec<usize> = driver.log().put_data.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![4, 4, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocked_stream_source_does_not_stall_other_queries() {
    let mut script = people();
    script.exec = SqlReturn::NeedData;
    script.param_data =
        VecDeque::from([(SqlReturn::NeedData, Some(1)), (SqlReturn::Success, None)]);
    let driver = MockDriver::new(script);
    let conn = connect(&driver, 2, 2).await;

    let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let mut entered = Some(entered_tx);
    let mut sent = false;
    let source = move || -> Result<Option<Vec<u8>>, OdbcMiddlewareError> {
        if sent {
            return Ok(None);
        }
        if let Some(tx) = entered.take() {
            let _ = tx.send(());
        }
        release_rx
            .recv()
            .map_err(|err| OdbcMiddlewareError::StreamError(err.to_string()))?;
        sent = true;
        Ok(Some(b"slow".to_vec()))
    };
    let arg = make_input_stream(SqlType::LongVarBinary, source, 4).unwrap();

    let slow_conn = conn.clone();
    let slow = tokio::spawn(async move {
        slow_conn
            .execute_query(FetchMode::Array, "INSERT INTO blobs VALUES (?)", vec![arg])
            .await
    });
    entered_rx.await.unwrap();

    let quick = tokio::time::timeout(
        Duration::from_secs(5),
        conn.execute_query(FetchMode::Array, "SELECT id, name FROM people", Vec::new()),
    )
    .await
    .expect("plain query stalled behind a blocked stream source")
    .unwrap();
    assert_eq!(quick.result.rows().len(), 3);

    release_tx.send(()).unwrap();
    slow.await.unwrap().unwrap();
    assert_eq!(driver.log().put_data, vec![b"slow".to_vec()]);
}

#[tokio::test]
async fn get_info_reports_driver_details_and_returns_the_lease() {
    let driver = MockDriver::new(people());
    let conn = connect(&driver, 1, 1).await;

    let info = conn.get_info().await.unwrap();
    assert_eq!(info.driver_name, "mockodbc.so");
    assert_eq!(info.dbms_name, "MockDB");
    assert_eq!(info.odbc_version, "03.80");
    assert_eq!(info.odbc_connection_string, "DSN=mock");
    assert_eq!(
        serde_json::to_value(&info).unwrap()["driverVersion"],
        json!("01.00.0000")
    );
    assert_eq!(driver.log().info_requests, 1);
    assert_eq!(conn.pool().status().leased, 0);

    // The single pooled connection is free again for queries.
    let outcome = conn.prepare_query("SELECT id, name FROM people", Vec::new()).to_array().await;
    assert_eq!(outcome.unwrap().result.rows().len(), 3);
}

#[tokio::test]
async fn get_info_failure_carries_the_driver_diagnostic() {
    let mut script = people();
    script.info = Err(SqlError::new("info unavailable", "HYC00", 0));
    let driver = MockDriver::new(script);
    let conn = connect(&driver, 1, 1).await;

    let err = conn.get_info().await.unwrap_err();
    assert_eq!(err.sql_error().map(|e| e.sql_state.as_str()), Some("HYC00"));
    assert_eq!(conn.pool().status().leased, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_queries_share_a_small_pool() {
    let driver = MockDriver::new(people());
    let conn = connect(&driver, 3, 2).await;

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let conn = conn.clone();
        tasks.push(tokio::spawn(async move {
            conn.prepare_query("SELECT id, name FROM people", Vec::new())
                .to_array()
                .await
        }));
    }
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.result.rows().len(), 3);
    }
    let stats = conn.pool().status();
    assert_eq!(stats.leased, 0);
    assert!(stats.size <= 2);
    assert_eq!(driver.log().statements_freed, 12);
}

#[tokio::test]
async fn connect_failure_surfaces_driver_error() {
    let driver = MockDriver::default();
    driver.fail_connect(SqlError::new("Login failed", "28000", 18456));
    let err = OdbcConnection::connect(Arc::new(driver), OdbcOptions::new("DSN=mock".into()))
        .await
        .unwrap_err();
    assert_eq!(err.sql_error().map(|e| e.code), Some(18456));
}

#[tokio::test]
async fn closed_connection_rejects_new_queries() {
    let driver = MockDriver::default();
    let conn = connect(&driver, 1, 1).await;
    conn.close();
    let err = conn
        .execute_query(FetchMode::Array, "SELECT 1", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OdbcMiddlewareError::PoolError(_)));
}

#[test]
fn scheduler_requires_a_runtime() {
    let err = QueryScheduler::start(1).unwrap_err();
    assert!(matches!(err, OdbcMiddlewareError::ConfigError(_)));
}
