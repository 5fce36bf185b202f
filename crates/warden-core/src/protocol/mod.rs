//! Remote render protocol
//!
//! Guest code never touches the host tree directly. It emits [`DomOperation`]s that
//! pass through the [`OperationValidator`] before anything downstream sees them.

mod operation;
mod validator;

pub use operation::{DomOperation, OperationKind};
pub use validator::{
    DEFAULT_MAX_PAYLOAD_BYTES, MAX_TYPE_LEN, OperationValidator, RejectReason,
};
