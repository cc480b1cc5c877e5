//! RESP wire framing: the value model and the streaming codec.

mod codec;
mod frame;

pub use codec::{FullResyncReply, RespCodec, encode_full_resync_to_vec, encode_to_vec};
pub use frame::RespFrame;
