//! The store-and-forward pipeline
//!
//! Data flow: events -> [`buffer::WriteBuffer`] -> queue store ->
//! [`batch::build_batch`] -> [`crypto::FieldCrypto`] -> [`codec`] ->
//! [`transport::Transport`] -> transmitted markers committed by the
//! [`scheduler::DrainScheduler`].

pub mod batch;
pub mod buffer;
pub mod codec;
pub mod crypto;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use batch::{Batch, MAX_BATCH_BYTES, MAX_BATCH_RECORDS};
pub use buffer::WriteBuffer;
pub use codec::TransportPayload;
pub use crypto::FieldCrypto;
pub use scheduler::{DrainScheduler, SchedulerState};
pub use session::UploadSession;
pub use transport::{HttpTransport, Transport};
