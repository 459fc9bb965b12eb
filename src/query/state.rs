use std::fmt;

/// Lifecycle of one query: `ExecuteStatement -> [NeedData] -> FetchResult -> End`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryState {
    ExecuteStatement,
    /// The driver paused execution and wants streamed parameter data.
    NeedData,
    FetchResult,
    /// Terminal. The error slot is set iff the query failed.
    End,
}

impl QueryState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == QueryState::End
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryState::ExecuteStatement => "execute_statement",
            QueryState::NeedData => "need_data",
            QueryState::FetchResult => "fetch_result",
            QueryState::End => "end",
        };
        f.write_str(name)
    }
}

/// What the scheduler should do with a query after a foreground step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundResult {
    /// Background work is still pending; hand the query back to a worker.
    Reschedule,
    /// The driver is waiting on streamed data. Call [`Query::supply_stream_data`] off the
    /// foreground loop, then reschedule.
    ///
    /// [`Query::supply_stream_data`]: super::Query::supply_stream_data
    SupplyData,
    /// The caller has been resolved; drop the query.
    Discard,
}
