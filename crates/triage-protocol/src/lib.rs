#![deny(clippy::all)]

mod command;
mod response;
mod types;

pub use triage_common::error_codes;

pub use command::actions;
pub use command::Command;
pub use command::TaggedCommand;
pub use response::DiagnosisEntry;
pub use response::Question;
pub use response::WorkerResponse;
pub use types::ErrorData;
pub use types::RequestId;
pub use types::RpcRequest;
pub use types::RpcResponse;
pub use types::RpcServerError;
