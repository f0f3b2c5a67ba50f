pub mod call;
pub mod config;
pub mod matcher;
pub mod packet;
pub mod storage;
pub mod stream;

pub use call::{Call, CallRef, CallState, Message};
pub use config::{CaptureOptions, MatchOptions, Settings, SortField, SortOptions, StorageMode};
pub use matcher::Matcher;
pub use packet::{
    Address, Method, Packet, ReqResp, RtcpRecord, RtpRecord, SdpMedia, SdpRecord, SipRecord,
};
pub use storage::{MessageHandle, Stats, Storage, StreamHandle};
pub use stream::{Stream, StreamKind};
