//! Mapping between [`ApiError`] and JSON-RPC error objects.
//!
//! Protocol errors carry the serialized [`ProtocolError`] as the error object's `data`, so a
//! client gets back the exact code the coordinator produced.

use jsonrpsee::types::{ErrorCode, ErrorObjectOwned};
use wabisabi_primitives::errors::{ApiError, ProtocolError};

/// JSON-RPC error code of a protocol error.
pub const PROTOCOL_ERROR_CODE: i32 = -32010;

/// JSON-RPC error code of a failed call to the coordinator's Bitcoin node.
pub const NODE_ERROR_CODE: i32 = -32020;

/// JSON-RPC error code of a request abandoned because the coordinator is shutting down.
pub const SHUTTING_DOWN_ERROR_CODE: i32 = -32030;

/// Converts a request failure into the error object sent to the participant.
pub fn to_rpc_error(err: ApiError) -> ErrorObjectOwned {
    match err {
        ApiError::Protocol(err) => {
            ErrorObjectOwned::owned(PROTOCOL_ERROR_CODE, err.to_string(), Some(err))
        }
        ApiError::Node(err) => {
            ErrorObjectOwned::owned(NODE_ERROR_CODE, err.to_string(), None::<()>)
        }
        ApiError::Transport(message) => {
            ErrorObjectOwned::owned(ErrorCode::InternalError.code(), message, None::<()>)
        }
        ApiError::Cancelled => ErrorObjectOwned::owned(
            SHUTTING_DOWN_ERROR_CODE,
            "coordinator is shutting down",
            None::<()>,
        ),
    }
}

/// Recovers the request failure from an error object received from the coordinator.
///
/// Anything that is not a well-formed protocol error is reported as a transport failure.
pub fn from_rpc_error(err: &ErrorObjectOwned) -> ApiError {
    if err.code() == PROTOCOL_ERROR_CODE {
        let protocol = err
            .data()
            .and_then(|data| serde_json::from_str::<ProtocolError>(data.get()).ok());
        if let Some(protocol) = protocol {
            return ApiError::Protocol(protocol);
        }
    }

    ApiError::Transport(format!("{} (code {})", err.message(), err.code()))
}

#[cfg(test)]
mod tests {
    use wabisabi_primitives::{errors::ProtocolErrorCode, node::NodeRpcError, phase::Phase};

    use super::*;

    #[test]
    fn protocol_errors_survive_the_wire() {
        let err = ProtocolError::wrong_phase(Phase::Ended, Phase::ConnectionConfirmation);
        let object = to_rpc_error(ApiError::Protocol(err.clone()));
        assert_eq!(object.code(), PROTOCOL_ERROR_CODE);
        assert!(object.data().is_some());

        match from_rpc_error(&object) {
            ApiError::Protocol(back) => {
                assert_eq!(back, err);
                assert_eq!(back.code, ProtocolErrorCode::WrongPhase);
            }
            other => panic!("expected a protocol error, got {other}"),
        }
    }

    #[test]
    fn other_failures_become_transport_errors() {
        let node = to_rpc_error(ApiError::Node(NodeRpcError::Connection("refused".into())));
        assert_eq!(node.code(), NODE_ERROR_CODE);
        assert!(matches!(from_rpc_error(&node), ApiError::Transport(_)));

        let malformed = ErrorObjectOwned::owned(PROTOCOL_ERROR_CODE, "bad", Some("not an error"));
        assert!(matches!(from_rpc_error(&malformed), ApiError::Transport(_)));

        let shutdown = to_rpc_error(ApiError::Cancelled);
        assert_eq!(shutdown.code(), SHUTTING_DOWN_ERROR_CODE);
        assert!(matches!(from_rpc_error(&shutdown), ApiError::Transport(_)));
    }
}
