//! Data storage and analysis modules.
//!
//! - [`storage`]: CSV sample sink and loader
//! - [`analysis`]: window selection, trapezoidal integration and the analysis facade
//! - [`cache`]: the result block embedded at the top of a capture file
pub mod analysis;
pub mod cache;
pub mod storage;
