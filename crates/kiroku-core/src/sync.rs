//! Job handlers. Each takes data already fetched from the service and
//! applies it to the store, scheduling follow-up jobs on the queue.

pub mod details;
pub mod list;
pub mod lists;
