//! Request pipeline stages: authentication, model resolution, passthrough
//! whitelisting and outbound request rewriting.

pub mod auth_gate;
pub mod model_resolver;
pub mod passthrough;
pub mod rewriter;

pub use auth_gate::{AuthGate, UserIdentity};
pub use model_resolver::{ModelResolver, Resolution};
pub use passthrough::PassthroughFilter;
pub use rewriter::{InboundRequest, OutboundRequest, RequestRewriter, RouteTarget};
