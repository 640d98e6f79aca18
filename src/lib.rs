#![doc(html_root_url = "https://docs.rs/wirestream/latest")]
//! Public API for the `wirestream` library.
//!
//! `wirestream` multiplexes many logical messages (requests, responses and
//! their content streams) over one bidirectional byte transport. Each
//! message is cut into frames carrying a fixed 22-byte header, frames of
//! different messages interleave freely on the wire, and the receiving side
//! reassembles each message into a stream that can be read while it is
//! still arriving.
//!
//! Most applications only need [`StreamingSession`]; the lower layers
//! ([`PayloadSender`], [`PayloadDisassembler`], [`PayloadReceiver`],
//! [`AssemblerRegistry`]) are public for custom transports and tests.

pub mod assembler;
pub mod body;
pub mod codec;
pub mod config;
pub mod disassembler;
pub mod error;
pub mod header;
pub mod message;
pub mod metadata;
pub mod metrics;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod stream;

pub use assembler::{AssemblerRegistry, AssemblyError, PayloadAssembler};
pub use body::PayloadBody;
pub use codec::{CodecError, PayloadFrame, PayloadFrameCodec};
pub use config::{FairnessConfig, SerializationFormat, SessionConfig};
pub use disassembler::{DisassemblyError, DisassemblyOutcome, PayloadDisassembler};
pub use error::{Result, SessionError};
pub use header::{FrameHeader, HEADER_LEN, PayloadId, PayloadType};
pub use message::{
    ContentStream,
    ReceivedRequest,
    ReceivedResponse,
    ReceivedStream,
    StreamingRequest,
    StreamingResponse,
};
pub use metadata::{MetadataError, RequestPayload, ResponsePayload, StreamDescription};
pub use receiver::{PayloadReceiver, ReceiveError, ReceivedPayload};
pub use sender::{FrameWriter, PayloadSender, SendError};
pub use session::{IncomingRequests, RequestHandler, StreamingSession};
pub use stream::{PayloadStream, StreamAbort};
