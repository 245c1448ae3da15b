//! wallet-transport - transport core for the wallet service client
//!
//! Two cooperating subsystems:
//!
//! - **Request pipeline**: REST calls with response caching, retry with
//!   backoff, and one-shot credential renewal
//! - **Push channel**: a persistent authenticated socket with heartbeats,
//!   reconnection, outbound queuing, and typed event dispatch
//!
//! ## Modules
//!
//! - **storage**: key/value backends by durability tier
//! - **auth**: credential store and sign-in/sign-up/logout flows
//! - **cache**: tiered TTL cache with LRU eviction
//! - **pipeline**: the request pipeline
//! - **channel**: push channel state machine
//! - **dispatch**: event kinds, handlers, pushed-state snapshot
//! - **supervisor**: single-flight owner of the push channel

pub mod auth;
pub mod cache;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod logging;
pub mod pipeline;
pub mod storage;
pub mod supervisor;
pub mod types;

pub use auth::{AuthClient, CredentialPair, CredentialStore};
pub use cache::{CacheConfig, TieredCache};
pub use channel::{ChannelConfig, ChannelState, PushChannel, SessionCallbacks};
pub use config::Args;
pub use dispatch::{EventDispatcher, EventKind, PushEvent};
pub use pipeline::{PipelineConfig, RequestOptions, RequestPipeline, RetryPolicy};
pub use supervisor::ConnectionSupervisor;
pub use types::{Result, TransportError};
