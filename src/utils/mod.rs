pub mod endpoint;
pub use endpoint::{EndpointError, build_connection_url, validate_endpoint_url};
