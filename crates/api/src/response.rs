//! Shared response envelope for API handlers.
//!
//! Successful responses are `{ "data": ... }`. Use [`DataResponse`] rather
//! than ad-hoc `json!({ "data": ... })` bodies.

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}
