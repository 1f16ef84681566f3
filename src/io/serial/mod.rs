// src/io/serial/mod.rs
//
// TF-Luna serial link: frame decoding and the acquisition loop.

pub mod framer;
pub mod reader;
pub(crate) mod utils;

pub use framer::{decode_frame, decode_step, ChecksumPolicy, DecodeStep, FrameDecoder, FRAME_LEN};
pub use reader::{list_serial_ports, LinkPort, ReaderHandle, SerialLinkReader, SerialPortInfo};
pub use utils::Parity;
