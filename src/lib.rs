// ABOUTME: Library root for sshdial - resolves connection descriptors into SSH-tunnelled streams.
// ABOUTME: The main binary is in main.rs.

pub mod auth;
pub mod config;
pub mod descriptor;
pub mod diagnostics;
pub mod env;
pub mod error;
pub mod host_pattern;
pub mod known_hosts;
pub mod resolver;
pub mod session;
pub mod ssh_config;
pub mod transport;
pub mod trust;
pub mod username;

pub use config::ResolverConfig;
pub use descriptor::ConnectionDescriptor;
pub use error::{Error, Result, Step};
pub use resolver::{ResolutionPlan, Resolver};
pub use session::ResolvedStream;
