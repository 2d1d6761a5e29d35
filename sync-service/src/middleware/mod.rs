//! Request middleware and extractors.

pub mod request_id;
pub mod user;

pub use request_id::{request_middleware, REQUEST_ID_HEADER};
pub use user::USER_ID_HEADER;
