//! downwatch-probe — availability probes for downwatch targets.
//!
//! A probe issues one HTTP GET per attempt (redirects disabled, hard
//! per-attempt timeout) and turns whatever happens into an [`Outcome`]:
//! it never returns an error to its caller.
//!
//! # Architecture
//!
//! ```text
//! Prober (impl Probe)
//!   ├── RetryPolicy (max attempts, base delay, multiplier, cap)
//!   ├── HttpClient::get() → HttpResponse | TransportError
//!   │     └── ReqwestClient in production, fakes in tests
//!   └── evaluate() → Outcome (status / body expectations)
//! ```
//!
//! Only transport failures (connect, DNS, TLS, timeout) are retried. A
//! wrong status code or missing body text is a real signal and is
//! reported on the first response.
//!
//! [`Outcome`]: downwatch_core::Outcome

pub mod checker;
pub mod client;
pub mod retry;

pub use checker::{Probe, ProbeFuture, Prober, evaluate};
pub use client::{FetchFuture, HttpClient, HttpResponse, ReqwestClient, TransportError};
pub use retry::RetryPolicy;
