use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::binding::BoundParameters;
use crate::codec::NativeBuffer;
use crate::driver::{
    BindDescriptor, ColumnDescription, ConnectionHandle, ConnectionInfo, Driver,
    DriverConnection, SqlReturn, StatementHandle,
};
use crate::error::SqlError;
use crate::native::SqlDataType;
use crate::types::SqlValue;

/// What the scripted driver answers. Every statement of every connection follows the same
/// script; `param_data` answers are consumed across statements. A scripted `NeedData` from
/// `exec` is answered as `Success` for statements without streamed parameters.
#[derive(Debug, Clone)]
pub struct MockScript {
    pub alloc: SqlReturn,
    pub bind: SqlReturn,
    pub set_attribute: SqlReturn,
    pub exec: SqlReturn,
    /// Answers to successive `param_data` calls: status plus the token of the parameter
    /// wanted next. An empty queue answers `Success`.
    pub param_data: VecDeque<(SqlReturn, Option<u16>)>,
    pub put_data: SqlReturn,
    pub columns: Vec<ColumnDescription>,
    pub rows: Vec<Vec<SqlValue>>,
    /// 1-based fetch call that fails.
    pub fetch_failure_at: Option<usize>,
    pub row_count: i64,
    /// Values written into output parameters (by ordinal) when execution completes.
    pub outputs: Vec<(u16, SqlValue)>,
    /// Diagnostic returned by `last_error`.
    pub error: SqlError,
    /// Answer to `info`; `Err` makes the info request fail.
    pub info: Result<ConnectionInfo, SqlError>,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            alloc: SqlReturn::Success,
            bind: SqlReturn::Success,
            set_attribute: SqlReturn::Success,
            exec: SqlReturn::Success,
            param_data: VecDeque::new(),
            put_data: SqlReturn::Success,
            columns: Vec::new(),
            rows: Vec::new(),
            fetch_failure_at: None,
            row_count: 0,
            outputs: Vec::new(),
            error: SqlError::new("scripted failure", "HY000", 50_000),
            info: Ok(ConnectionInfo {
                driver_name: "mockodbc.so".into(),
                driver_version: "01.00.0000".into(),
                database_name: "mock".into(),
                odbc_version: "03.80".into(),
                dbms_name: "MockDB".into(),
                odbc_connection_string: String::new(),
            }),
        }
    }
}

impl MockScript {
    /// Script a result set of `rows` under the given `(name, type, size)` columns.
    #[must_use]
    pub fn with_rows(
        mut self,
        columns: &[(&str, SqlDataType, usize)],
        rows: Vec<Vec<SqlValue>>,
    ) -> Self {
        self.columns = columns
            .iter()
            .map(|(name, sql_type, size)| ColumnDescription {
                name: (*name).to_string(),
                sql_type: *sql_type,
                column_size: *size,
                decimal_digits: 0,
                nullable: true,
            })
            .collect();
        self.rows = rows;
        self
    }
}

/// Every driver call the mock saw, in order per kind.
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    pub connections_opened: usize,
    pub statements_allocated: usize,
    pub binds: Vec<BindDescriptor>,
    pub attributes: Vec<(i32, usize)>,
    pub executed: Vec<String>,
    pub param_data_calls: usize,
    pub put_data: Vec<Vec<u8>>,
    pub fetch_calls: usize,
    pub statements_freed: usize,
    pub info_requests: usize,
}

#[derive(Debug, Default)]
struct MockState {
    script: MockScript,
    log: MockLog,
    connect_failure: Option<SqlError>,
    dead: bool,
    next_handle: u64,
}

type Shared = Arc<Mutex<MockState>>;

fn lock(state: &Shared) -> MutexGuard<'_, MockState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-memory [`Driver`] that answers from a [`MockScript`] and records every call.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Shared,
}

impl MockDriver {
    #[must_use]
    pub fn new(script: MockScript) -> Self {
        let driver = Self::default();
        driver.set_script(script);
        driver
    }

    pub fn set_script(&self, script: MockScript) {
        lock(&self.state).script = script;
    }

    /// Make every following `connect` fail with `err`.
    pub fn fail_connect(&self, err: SqlError) {
        lock(&self.state).connect_failure = Some(err);
    }

    /// Report every connection as dead from now on.
    pub fn kill_connections(&self) {
        lock(&self.state).dead = true;
    }

    /// Snapshot of the calls seen so far.
    #[must_use]
    pub fn log(&self) -> MockLog {
        lock(&self.state).log.clone()
    }
}

impl Driver for MockDriver {
    fn connect(
        &self,
        _connection_string: &str,
        _login_timeout: Option<Duration>,
    ) -> Result<Box<dyn DriverConnection>, SqlError> {
        let mut state = lock(&self.state);
        if let Some(err) = state.connect_failure.clone() {
            return Err(err);
        }
        state.next_handle += 1;
        state.log.connections_opened += 1;
        Ok(Box::new(MockConnection {
            handle: ConnectionHandle(state.next_handle),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    handle: ConnectionHandle,
    state: Shared,
}

impl DriverConnection for MockConnection {
    fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    fn new_statement(&self) -> Box<dyn StatementHandle> {
        Box::new(MockStatement {
            state: Arc::clone(&self.state),
            cursor: 0,
        })
    }

    fn info(&self) -> Result<ConnectionInfo, SqlError> {
        let mut state = lock(&self.state);
        state.log.info_requests += 1;
        state.script.info.clone()
    }

    fn is_dead(&self) -> bool {
        lock(&self.state).dead
    }
}

struct MockStatement {
    state: Shared,
    /// Rows fetched so far.
    cursor: usize,
}

impl MockStatement {
    fn write_outputs(outputs: &[(u16, SqlValue)], params: &mut BoundParameters<'_>) -> SqlReturn {
        for (ordinal, value) in outputs {
            let Some(binding) = params.get_mut(*ordinal) else {
                return SqlReturn::Error;
            };
            if binding.store_output(value).is_err() {
                return SqlReturn::Error;
            }
        }
        SqlReturn::Success
    }
}

impl StatementHandle for MockStatement {
    fn alloc_handle(&mut self, _connection: ConnectionHandle) -> SqlReturn {
        let mut state = lock(&self.state);
        state.log.statements_allocated += 1;
        state.script.alloc
    }

    fn bind_parameter(&mut self, descriptor: &BindDescriptor) -> SqlReturn {
        let mut state = lock(&self.state);
        state.log.binds.push(descriptor.clone());
        state.script.bind
    }

    fn set_statement_attribute(&mut self, attribute: i32, value: usize) -> SqlReturn {
        let mut state = lock(&self.state);
        state.log.attributes.push((attribute, value));
        state.script.set_attribute
    }

    fn exec_direct(&mut self, sql: &str, params: &mut BoundParameters<'_>) -> SqlReturn {
        let (status, outputs) = {
            let mut state = lock(&self.state);
            state.log.executed.push(sql.to_string());
            (state.script.exec, state.script.outputs.clone())
        };
        // Drivers only ask for data when something was bound as data-at-execution.
        let status = if status == SqlReturn::NeedData && !params.has_streams() {
            SqlReturn::Success
        } else {
            status
        };
        if status.succeeded() {
            let written = Self::write_outputs(&outputs, params);
            if !written.succeeded() {
                return written;
            }
        }
        status
    }

    fn param_data(&mut self, params: &mut BoundParameters<'_>) -> (SqlReturn, Option<u16>) {
        let (answer, outputs) = {
            let mut state = lock(&self.state);
            state.log.param_data_calls += 1;
            let answer = state
                .script
                .param_data
                .pop_front()
                .unwrap_or((SqlReturn::Success, None));
            (answer, state.script.outputs.clone())
        };
        if answer.0.succeeded() {
            let written = Self::write_outputs(&outputs, params);
            if !written.succeeded() {
                return (written, None);
            }
        }
        answer
    }

    fn put_data(&mut self, chunk: &[u8]) -> SqlReturn {
        let mut state = lock(&self.state);
        state.log.put_data.push(chunk.to_vec());
        state.script.put_data
    }

    fn num_result_cols(&mut self) -> Result<u16, SqlReturn> {
        let state = lock(&self.state);
        u16::try_from(state.script.columns.len()).map_err(|_| SqlReturn::Error)
    }

    fn describe_column(&mut self, column: u16) -> Result<ColumnDescription, SqlReturn> {
        let state = lock(&self.state);
        usize::from(column)
            .checked_sub(1)
            .and_then(|idx| state.script.columns.get(idx))
            .cloned()
            .ok_or(SqlReturn::Error)
    }

    fn fetch(&mut self) -> SqlReturn {
        let mut state = lock(&self.state);
        state.log.fetch_calls += 1;
        let call = state.log.fetch_calls;
        if state.script.fetch_failure_at == Some(call) {
            return SqlReturn::Error;
        }
        if self.cursor >= state.script.rows.len() {
            return SqlReturn::NoData;
        }
        self.cursor += 1;
        SqlReturn::Success
    }

    fn get_data(&mut self, column: u16, target: &mut NativeBuffer) -> Result<isize, SqlReturn> {
        let state = lock(&self.state);
        let value = self
            .cursor
            .checked_sub(1)
            .and_then(|row| state.script.rows.get(row))
            .and_then(|row| row.get(usize::from(column).checked_sub(1)?))
            .ok_or(SqlReturn::Error)?;
        target.store_value(value).map_err(|_| SqlReturn::Error)
    }

    fn row_count(&mut self) -> Result<i64, SqlReturn> {
        Ok(lock(&self.state).script.row_count)
    }

    fn free_handle(&mut self) {
        lock(&self.state).log.statements_freed += 1;
    }

    fn last_error(&mut self) -> SqlError {
        lock(&self.state).script.error.clone()
    }
}
