//! Background tasks of the cache. There is exactly one: the worker that owns
//! the recency list and applies promote, delete, GC and clear requests.

pub(crate) mod worker;
