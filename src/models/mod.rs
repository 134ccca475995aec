//! Scan records and the page events correlated into them.

pub mod events;
pub mod scan;
