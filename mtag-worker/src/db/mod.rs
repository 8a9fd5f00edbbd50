//! Job store and dispatch queue
//!
//! Both live in the shared job database opened by `mtag_common::db::init_database`.

pub mod dispatch;
pub mod jobs;

pub use dispatch::{Channel, Delivery, Dispatcher, SqliteDispatcher};
pub use jobs::{JobPage, JobStore, ListView, QueueStats, StateCounts};
