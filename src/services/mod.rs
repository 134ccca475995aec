//! Scan services.

pub mod blocklist;
pub mod correlator;
pub mod rewriter;
pub mod scan_id;
pub mod scanner;
pub mod session;
pub mod timing;
