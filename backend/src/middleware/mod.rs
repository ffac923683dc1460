//! HTTP middleware and extractors

pub mod extract;
pub mod request_id;

pub use extract::{ApiJson, ApiPath, ApiQuery};
pub use request_id::{request_id_middleware, RequestId};
