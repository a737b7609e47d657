//! HTTPS surface of the runtime: the fixed middleware pipeline, the health
//! check, the structured 404 and the TLS listener.

pub mod error;
pub mod middleware;
pub mod rate_limit;
pub mod routes;
pub mod server;
pub mod validation;

pub use error::{ApiError, UNAUTHORIZED_MESSAGE};
pub use middleware::{ApiState, RequestParams, ACCESS_KEY_HEADER, ACCESS_KEY_QUERY, PING_PATH};
pub use rate_limit::RateLimiter;
pub use routes::{build_router, respond};
pub use server::{bind, serve_tls, tls_acceptor_from_pem, ClientAddr, TlsListener};
pub use validation::{validate_params, ParamSchema};
