//! Variant fetchers for Stash.
//!
//! A [`VariantFetcher`] turns a locator (a relative path such as
//! `videos/rabbit.mp4`) into the full payload bytes. The cache layer treats
//! it as an opaque capability that may fail.
//!
//! - [`HttpFetcher`] -- GET relative to a base URL via `reqwest`
//! - [`DirFetcher`] -- reads files under a local directory
//! - [`InMemoryFetcher`] -- locator-keyed map for tests and embedding
//!
//! Fetchers never retry on their own. [`fetch_with_retry`] applies a
//! [`RetryPolicy`] on top, and only for errors that
//! [`FetchError::is_transient`] classifies as transient.

pub mod dir;
pub mod error;
pub mod http;
pub mod memory;
pub mod retry;
pub mod traits;

pub use dir::DirFetcher;
pub use error::{FetchError, FetchResult};
pub use http::HttpFetcher;
pub use memory::InMemoryFetcher;
pub use retry::{fetch_with_retry, RetryPolicy};
pub use traits::VariantFetcher;
