//! Utility modules: backoff, timeout, secret scrubbing.

pub mod backoff;
pub mod scrub;
pub mod timeout;
