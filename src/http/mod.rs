//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! caller
//!     → client.rs (facade, layer composition, deadline)
//!     → [resilience layers: breaker, retry]
//!     → body.rs (snapshot for replay, drain discarded responses)
//!     → transport.rs (hyper-util pool, rustls)
//!     → upstream
//! ```

pub mod body;
pub mod client;
pub mod transport;

pub use body::{BodySnapshot, ReplayableRequest};
pub use client::{BoxSender, HttpClient, HttpClientBuilder, X_REQUEST_ID};
pub use transport::HttpTransport;
