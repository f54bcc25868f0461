//! Requests handed to the application layer.
//!
//! # Design Decisions
//! - Every decoded request gets a `RequestId` (UUID v4) as early as possible;
//!   responses are correlated with requests by that id, never by identity
//! - The request carries a handle to its connection so it can be answered
//!   (provisionally or finally) from any task

use bytes::Bytes;
use http::{Request, Response};
use uuid::Uuid;

use crate::error::ConnectorError;
use crate::net::handle::{ConnectionHandle, Delivery};

/// Stable correlation id for one request and all of its responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded request, waiting for the application to answer it.
#[derive(Debug)]
pub struct InboundRequest {
    id: RequestId,
    request: Request<Bytes>,
    connection: ConnectionHandle,
}

impl InboundRequest {
    pub(crate) fn new(id: RequestId, request: Request<Bytes>, connection: ConnectionHandle) -> Self {
        Self {
            id,
            request,
            connection,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Queue a response. Informational (1xx) responses may be sent any
    /// number of times before the final one.
    pub fn respond(&self, response: Response<Bytes>) -> Result<Delivery, ConnectorError> {
        self.connection.handle(self.id, response)
    }

    /// Split into the id, the request and the connection handle.
    pub fn into_parts(self) -> (RequestId, Request<Bytes>, ConnectionHandle) {
        (self.id, self.request, self.connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 36);
    }
}
