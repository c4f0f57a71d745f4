mod protocol;
mod server;

pub use protocol::{
    AttrDto, BridgeError, BridgeOp, BridgeReply, BridgeRequest, BridgeResponse, DirEntryDto,
    ErrorCode, REQUEST_TIMEOUT,
};
pub use server::serve;
