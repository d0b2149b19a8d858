//! Outbound OIDC clients: discovery caching, the PKCE authorization-code
//! flow, and the device authorization grant. Built on top of `authcore`'s
//! value types and PKCE primitives.

pub mod device;
pub mod discovery;
pub mod error;
pub mod pkce_client;
pub mod store;
pub mod transport;

pub use device::{CancelToken, DeviceFlowClient, NoDelaySleeper, Sleeper, TokioSleeper};
pub use discovery::DiscoveryCache;
pub use error::{ClientError, Result};
pub use pkce_client::{AuthClientOptions, AuthConfig, PkceAuthClient};
pub use store::{InMemoryTokenStore, TokenStore};
pub use transport::{HttpGet, HttpPost, HttpResponse, ReqwestTransport};
