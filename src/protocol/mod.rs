//! Protocol module - wire format, frame reassembly, and frame types.
//!
//! This module implements the consumer side of the screenshot stream:
//! - `<height>|<payload_length>|` header encoding/decoding
//! - Frame reader that requests frames and accumulates partial reads
//! - Frame struct with typed accessors

mod frame;
mod frame_reader;
mod wire_format;

pub use frame::{encode_frame, Frame};
pub use frame_reader::FrameReader;
pub use wire_format::{
    decode_header, encode_header, header_complete, Header, BYTES_PER_PIXEL,
    DEFAULT_MAX_PAYLOAD_LENGTH, INITIAL_CHUNK_SIZE, READ_BUFFER_SIZE, REQUEST_TOKEN, SEPARATOR,
};
