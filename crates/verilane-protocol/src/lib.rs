//! Decoding of verification backend output
//!
//! Backends report progress in one of two wire formats:
//!
//! - **Lines** ([`text`]): human readable text with fixed start and finish
//!   markers, single-line JSON progress objects and quoted model lines.
//! - **Structured** ([`structured`]): one `{msg_type, msg_body}` JSON object
//!   per message, as streamed by HTTP verification servers.
//!
//! [`OutputDecoder`] accepts either format, chunk by chunk, and yields the
//! same [`VerificationEvent`]s for both. Malformed messages surface as
//! [`DecodeError`]s without ending the stream.

#![allow(clippy::module_name_repetitions)] // DecodeError, OutputDecoder read better in callers
#![allow(clippy::doc_markdown)] // Missing backticks - low priority
#![allow(clippy::uninlined_format_args)] // Named args are clearer
#![allow(clippy::missing_errors_doc)] // Error variants are documented on DecodeError
#![allow(clippy::must_use_candidate)] // Accessors don't need must_use
#![allow(clippy::cast_precision_loss)] // Counts stay far below 2^52

pub mod decoder;
pub mod error;
pub mod events;
pub mod model;
pub mod position;
pub mod progress;
pub mod stderr;
pub mod structured;
pub mod text;

pub use decoder::{decode_all, Decoded, OutputDecoder, WireFormat};
pub use error::DecodeError;
pub use events::{Definition, EntityKind, ErrorReport, OutlineMember, VerificationEvent};
pub use model::CounterexampleModel;
pub use position::{Position, Range};
pub use progress::Progress;
pub use stderr::{classify_stderr, StderrClass};
pub use structured::{decode_message, StructuredContext};
pub use text::{LineDecoder, LineState, END_OF_LINE_CHARACTER};
