use super::{ForegroundResult, Query, QueryState, Resolution};
use crate::error::OdbcMiddlewareError;

impl Query {
    /// Non-blocking step between background runs.
    ///
    /// In `NeedData` with a live stream the caller's source must be pulled before the next
    /// background run; in `End` the caller is resolved and the query can be dropped.
    pub fn process_foreground(&mut self) -> ForegroundResult {
        match self.state {
            QueryState::NeedData if self.has_live_stream() => {
                ForegroundResult::SupplyData
            }
            QueryState::End => {
                let resolution = self.resolution();
                let failed = resolution.is_err();
                match self.resolver.take() {
                    Some(resolver) => {
                        if resolver.send(resolution).is_err() {
                            tracing::debug!(query = self.id, "caller stopped waiting for query");
                        }
                    }
                    None => tracing::warn!(query = self.id, "query resolved more than once"),
                }
                tracing::debug!(query = self.id, failed, "query resolved");
                ForegroundResult::Discard
            }
            QueryState::ExecuteStatement | QueryState::NeedData | QueryState::FetchResult => {
                ForegroundResult::Reschedule
            }
        }
    }

    /// Pull the next piece of streamed payload from the caller's source.
    ///
    /// Sources may block on I/O, so the scheduler runs this on a blocking thread rather than on
    /// the foreground loop. A no-op outside `NeedData`.
    pub fn supply_stream_data(&mut self) {
        if self.state != QueryState::NeedData {
            return;
        }
        if let Some(binding) = self
            .active_stream
            .and_then(|index| self.params.get_mut(index))
        {
            binding.supply_stream_chunk();
            self.data_requests += 1;
        }
    }

    fn has_live_stream(&self) -> bool {
        self.active_stream
            .and_then(|index| self.params.get(index))
            .is_some_and(|binding| binding.is_streamed())
    }

    /// Either the recorded error, or the result with output parameters written back. Output
    /// slots are only touched once every output decoded.
    fn resolution(&mut self) -> Resolution {
        if let Some(err) = self.error.take() {
            return Err(err);
        }

        let mut outputs = Vec::new();
        for binding in &self.params {
            if let Some(output) = binding.output_value()? {
                outputs.push(output);
            }
        }
        let return_value = match &self.return_value {
            Some(binding) => binding
                .decode()?
                .as_int()
                .and_then(|code| i32::try_from(code).ok()),
            None => None,
        };
        for (slot, value) in outputs {
            slot.set(value);
        }

        let result_set = self.result_set.take().ok_or_else(|| {
            OdbcMiddlewareError::ExecutionError("result set already consumed".into())
        })?;
        Ok(result_set.construct_result(return_value))
    }
}
