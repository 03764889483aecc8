pub mod assembler;
pub mod controller;
pub mod stream;

pub use assembler::{FAILURE_MARKER, apply_delta, apply_terminal, failure_notice};
pub use controller::{
    ChatController, ChatUpdate, ControllerError, ControllerEvent, ControllerResult, SendOutcome,
};
pub use stream::{StreamState, StreamTransition, StreamTransitionRejection};
