//! The NTR frame stream: UDP fragments in, whole images out.

pub mod decoder;
pub mod fragment;
pub mod reassembler;
pub mod receiver;

pub use decoder::{ImageDecoder, PassthroughDecoder};
pub use fragment::{FRAGMENT_HEADER_SIZE, Fragment, FragmentHeader};
pub use reassembler::{CompletedFrame, FrameStats, PushOutcome, Reassembler, ReassemblerConfig};
pub use receiver::{DEFAULT_STREAM_PORT, ReceiverConfig, StreamReceiver, StreamStats};
