pub mod frame;
pub mod tls;

#[cfg(test)]
mod tests;

pub use frame::{DecodedFrame, decode_frame};
pub use tls::HandshakeInspector;
