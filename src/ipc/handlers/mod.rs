//! Per-action request handlers.
//!
//! Handlers are thin: they validate, resolve tab scope, and delegate into
//! the owning component. Errors are classified here into wire codes.

pub mod analysis;
pub mod auth;

use crate::analysis::client::AnalysisError;
use crate::ipc::protocol::{ErrorCode, WireError};
use crate::session::SignInError;

pub(crate) fn classify_sign_in(e: SignInError) -> WireError {
    match e {
        SignInError::AlreadyInProgress => {
            WireError::new(ErrorCode::Validation, "sign-in already in progress")
        }
        SignInError::Declined => WireError::new(
            ErrorCode::Transport,
            "sign-in was cancelled or declined at the identity provider",
        ),
        SignInError::Provider(e) => WireError::new(ErrorCode::Transport, e.to_string()),
        SignInError::ProfileUnavailable(e) => WireError::new(
            ErrorCode::Transport,
            format!("profile could not be retrieved: {e}"),
        ),
    }
}

pub(crate) fn classify_analysis(e: AnalysisError) -> WireError {
    match e {
        AnalysisError::AuthExpired => WireError::new(ErrorCode::AuthExpired, e.to_string()),
        AnalysisError::EntitlementDenied(detail) => {
            WireError::new(ErrorCode::EntitlementDenied, detail)
        }
        AnalysisError::Transport(message) => WireError::new(ErrorCode::Transport, message),
        AnalysisError::Format(message) => WireError::new(ErrorCode::Format, message),
    }
}
