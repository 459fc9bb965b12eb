use crate::query::Query;

/// Work for the blocking worker threads.
pub(crate) enum BackgroundCommand {
    Run(Box<Query>),
    Shutdown,
}

/// Work for the foreground loop.
pub(crate) enum ForegroundCommand {
    /// A background run finished; the query is handed over for its foreground step.
    Complete(Box<Query>),
    Shutdown,
}
