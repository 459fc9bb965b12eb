mod channel;
mod dispatcher;
mod manager;

pub use manager::QueryScheduler;
