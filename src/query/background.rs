use std::time::Duration;

use super::{Query, QueryState};
use crate::binding::{BoundParameters, ParameterBinding};
use crate::driver::{SqlReturn, driver_error};
use crate::error::OdbcMiddlewareError;
use crate::native::SQL_ATTR_QUERY_TIMEOUT;

/// Whether the background run can keep going or must wait for a foreground step.
enum Step {
    Continue,
    Yield,
}

impl Query {
    /// Run blocking driver work for the current state. States fall through until the query
    /// ends or the driver waits on streamed data.
    ///
    /// Failures are recorded on the query and force [`QueryState::End`]; nothing is thrown
    /// across the thread boundary. When the run ends the query, the statement handle is freed
    /// and the connection returned to the pool.
    pub fn process_background(&mut self) {
        self.background_runs += 1;
        tracing::trace!(query = self.id, run = self.background_runs, state = %self.state, "background run");
        if let Err(err) = self.run_states() {
            self.fail(err);
        }
        if self.state.is_terminal() {
            self.release_statement();
            if let Some(connection) = self.connection.take() {
                self.pool.return_connection(connection);
            }
        }
    }

    fn run_states(&mut self) -> Result<(), OdbcMiddlewareError> {
        loop {
            let step = match self.state {
                QueryState::ExecuteStatement => self.execute_statement()?,
                QueryState::NeedData => self.exchange_param_data()?,
                QueryState::FetchResult => self.fetch_result()?,
                QueryState::End => return Ok(()),
            };
            if let Step::Yield = step {
                return Ok(());
            }
        }
    }

    fn execute_statement(&mut self) -> Result<Step, OdbcMiddlewareError> {
        let connection = self.connection.as_ref().ok_or_else(|| {
            OdbcMiddlewareError::ConnectionError("query has no leased connection".into())
        })?;
        let handle = connection.handle();
        let statement = self.statement.insert(connection.new_statement());
        if !statement.alloc_handle(handle).succeeded() {
            return Err(driver_error(statement.as_mut()));
        }

        // The return code always takes ordinal 1; declared parameters follow in order.
        let mut ordinal: u16 = 1;
        for binding in self.return_value.iter().chain(self.params.iter()) {
            let descriptor = binding.bind_descriptor(ordinal);
            tracing::trace!(query = self.id, ?descriptor, "binding parameter");
            if !statement.bind_parameter(&descriptor).succeeded() {
                return Err(driver_error(statement.as_mut()));
            }
            ordinal = ordinal.checked_add(1).ok_or_else(|| {
                OdbcMiddlewareError::validation("statement has too many parameters")
            })?;
        }

        if let Some(timeout) = self.timeout {
            let seconds = timeout_seconds(timeout);
            if !statement
                .set_statement_attribute(SQL_ATTR_QUERY_TIMEOUT, seconds)
                .succeeded()
            {
                return Err(driver_error(statement.as_mut()));
            }
        }

        let mut bound = BoundParameters::new(self.return_value.as_mut(), &mut self.params);
        let status = statement.exec_direct(&self.sql, &mut bound);
        match status {
            SqlReturn::NeedData => self.transition(QueryState::NeedData),
            SqlReturn::NoData => {
                self.no_data = true;
                self.transition(QueryState::FetchResult);
            }
            status if status.succeeded() => self.transition(QueryState::FetchResult),
            _ => return Err(driver_error(statement.as_mut())),
        }
        Ok(Step::Continue)
    }

    /// Deliver any payload the caller produced for the active stream, then ask the driver what
    /// it needs next.
    fn exchange_param_data(&mut self) -> Result<Step, OdbcMiddlewareError> {
        let statement = self.statement.as_mut().ok_or_else(|| {
            OdbcMiddlewareError::ExecutionError("statement is not allocated".into())
        })?;

        if let Some(index) = self.active_stream {
            let binding = self.params.get_mut(index).ok_or_else(|| {
                OdbcMiddlewareError::ExecutionError(format!("no parameter at index {index}"))
            })?;
            if let Some(chunk) = binding.take_stream_chunk()? {
                if !statement.put_data(&chunk).succeeded() {
                    return Err(driver_error(statement.as_mut()));
                }
                binding.mark_stream_sent(chunk.len());
            }
            if !binding.stream_finished() {
                return Ok(Step::Yield);
            }
            self.active_stream = None;
        }

        let offset = u16::from(self.return_value.is_some());
        let mut bound = BoundParameters::new(self.return_value.as_mut(), &mut self.params);
        let (status, token) = statement.param_data(&mut bound);
        match status {
            SqlReturn::NeedData => {
                let index = streamed_index(&self.params, token, offset).ok_or_else(|| {
                    OdbcMiddlewareError::ExecutionError(format!(
                        "driver requested data for unknown parameter {token:?}"
                    ))
                })?;
                tracing::trace!(query = self.id, index, "driver waiting on streamed parameter");
                self.active_stream = Some(index);
                Ok(Step::Yield)
            }
            status if status.succeeded() => {
                self.transition(QueryState::FetchResult);
                Ok(Step::Continue)
            }
            _ => Err(driver_error(statement.as_mut())),
        }
    }

    fn fetch_result(&mut self) -> Result<Step, OdbcMiddlewareError> {
        let statement = self.statement.as_mut().ok_or_else(|| {
            OdbcMiddlewareError::ExecutionError("statement is not allocated".into())
        })?;
        let result_set = self.result_set.as_mut().ok_or_else(|| {
            OdbcMiddlewareError::ExecutionError("result set already consumed".into())
        })?;
        result_set.fetch_results(statement.as_mut(), self.no_data)?;
        self.transition(QueryState::End);
        Ok(Step::Continue)
    }
}

/// Driver token (the parameter's ordinal) to an index into the declared parameters.
fn streamed_index(params: &[ParameterBinding], token: Option<u16>, offset: u16) -> Option<usize> {
    let index = usize::from(token?.checked_sub(offset + 1)?);
    params
        .get(index)
        .is_some_and(ParameterBinding::is_streamed)
        .then_some(index)
}

/// The driver attribute is in whole seconds; partial seconds round up so a short timeout
/// never becomes "no timeout".
fn timeout_seconds(timeout: Duration) -> usize {
    let seconds = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    usize::try_from(seconds).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_rounds_partial_seconds_up() {
        assert_eq!(timeout_seconds(Duration::from_millis(1)), 1);
        assert_eq!(timeout_seconds(Duration::from_millis(2_000)), 2);
        assert_eq!(timeout_seconds(Duration::from_millis(2_001)), 3);
        assert_eq!(timeout_seconds(Duration::ZERO), 0);
    }
}
