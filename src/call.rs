use crate::config::SortField;
use crate::packet::{Address, Method, Packet, ReqResp, SdpMedia};
use crate::stream::{Stream, StreamKind};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::{Arc, Mutex, Weak};

/// Shared handle to a call owned by the storage.
pub type CallRef = Arc<Mutex<Call>>;

/// Call state derived from the message history of an INVITE dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Calling,
    InCall,
    Completed,
    Cancelled,
    Rejected,
    BusyLine,
    Diverted,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Calling => "calling",
            CallState::InCall => "in call",
            CallState::Completed => "completed",
            CallState::Cancelled => "cancelled",
            CallState::Rejected => "rejected",
            CallState::BusyLine => "busy",
            CallState::Diverted => "diverted",
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, CallState::Calling | CallState::InCall)
    }
}

/// A SIP message stored on its call.
#[derive(Debug, Clone)]
pub struct Message {
    pub cseq: u32,
    pub from: String,
    pub to: String,
    pub reqresp: ReqResp,
    pub resp_str: Option<String>,
    /// Originating packet; its payload may be emptied by the storage mode.
    pub packet: Packet,
    pub payload_hash: u64,
    /// Index of the original message when this one is a retransmission.
    pub retrans_of: Option<usize>,
    /// SDP media descriptors announced by this message.
    pub medias: Vec<Arc<SdpMedia>>,
}

impl Message {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.packet.timestamp
    }

    pub fn src(&self) -> Address {
        self.packet.src
    }

    pub fn dst(&self) -> Address {
        self.packet.dst
    }

    pub fn is_request(&self, method: Method) -> bool {
        self.reqresp == ReqResp::Request(method)
    }
}

/// A SIP dialog with its messages and media streams.
///
/// Calls are owned by the storage; messages and streams are owned in place
/// and referenced by index, so evicting the call releases everything.
#[derive(Debug)]
pub struct Call {
    pub callid: String,
    pub xcallid: Option<String>,
    /// Position in creation order, assigned by the storage.
    pub index: u64,
    pub state: Option<CallState>,
    /// Pinned by the user, exempt from rotation.
    pub locked: bool,
    pub messages: Vec<Message>,
    pub streams: Vec<Stream>,
    /// Dialogs that referenced this call through X-Call-ID.
    xcalls: Vec<Weak<Mutex<Call>>>,
    /// Message that established the call (200 to the INVITE).
    setup_msg: Option<usize>,
    /// Message that ended the call (BYE).
    end_msg: Option<usize>,
}

impl Call {
    pub fn new(callid: String, xcallid: Option<String>, index: u64) -> Self {
        Self {
            callid,
            xcallid,
            index,
            state: None,
            locked: false,
            messages: Vec::new(),
            streams: Vec::new(),
            xcalls: Vec::new(),
            setup_msg: None,
            end_msg: None,
        }
    }

    pub fn msg_count(&self) -> usize {
        self.messages.len()
    }

    /// True when the dialog was opened by an INVITE.
    pub fn is_invite(&self) -> bool {
        self.messages
            .first()
            .map(|m| m.is_request(Method::Invite))
            .unwrap_or(false)
    }

    pub fn is_active(&self) -> bool {
        self.state.map(|s| s.is_in_progress()).unwrap_or(false)
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.messages.first().map(|m| m.timestamp())
    }

    /// Established duration: setup to teardown, or setup to the last
    /// observed message while the call is still up.
    pub fn duration(&self) -> Duration {
        let Some(setup) = self.setup_msg.and_then(|i| self.messages.get(i)) else {
            return Duration::zero();
        };
        let end = self
            .end_msg
            .and_then(|i| self.messages.get(i))
            .or_else(|| self.messages.last());
        match end {
            Some(end) => end.timestamp() - setup.timestamp(),
            None => Duration::zero(),
        }
    }

    pub fn add_message(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// Link the message at `index` to an earlier identical one, if any.
    pub fn retrans_check(&mut self, index: usize) {
        let msg = &self.messages[index];
        let original = self.messages[..index].iter().rposition(|prev| {
            prev.cseq == msg.cseq
                && prev.reqresp == msg.reqresp
                && prev.from == msg.from
                && prev.to == msg.to
                && prev.payload_hash == msg.payload_hash
        });
        self.messages[index].retrans_of = original;
    }

    /// Advance the call state with the message at `index`.
    ///
    /// Only INVITE dialogs carry state; provisional responses never change
    /// it, and a fresh INVITE restarts any call that is not established.
    pub fn update_state(&mut self, index: usize) {
        if !self.is_invite() {
            return;
        }
        let reqresp = self.messages[index].reqresp;
        match self.state {
            None => {
                if reqresp == ReqResp::Request(Method::Invite) {
                    self.state = Some(CallState::Calling);
                }
            }
            Some(CallState::Calling) => match reqresp {
                ReqResp::Response(code) if (100..200).contains(&code) => {}
                ReqResp::Response(480) | ReqResp::Response(486) | ReqResp::Response(600) => {
                    self.state = Some(CallState::BusyLine);
                }
                ReqResp::Response(301) | ReqResp::Response(302) => {
                    self.state = Some(CallState::Diverted);
                }
                ReqResp::Response(code) if code >= 400 => {
                    self.state = Some(CallState::Rejected);
                }
                ReqResp::Request(Method::Cancel) => {
                    self.state = Some(CallState::Cancelled);
                }
                ReqResp::Response(200) => {
                    self.state = Some(CallState::InCall);
                    self.setup_msg = Some(index);
                }
                _ => {}
            },
            Some(CallState::InCall) => {
                if reqresp == ReqResp::Request(Method::Bye) {
                    self.state = Some(CallState::Completed);
                    self.end_msg = Some(index);
                }
            }
            Some(_) => {
                if reqresp == ReqResp::Request(Method::Invite) {
                    self.state = Some(CallState::Calling);
                }
            }
        }
    }

    pub fn add_stream(&mut self, stream: Stream) -> usize {
        self.streams.push(stream);
        self.streams.len() - 1
    }

    /// Newest RTP stream towards `dst` whose source is unbound or equals
    /// `src`.
    pub fn find_stream(&self, src: Address, dst: Address) -> Option<usize> {
        self.streams.iter().rposition(|s| {
            s.kind == StreamKind::Rtp
                && s.dst == dst
                && s.src.map(|bound| bound == src).unwrap_or(true)
        })
    }

    /// Newest RTP stream towards `dst`, regardless of source binding.
    pub fn find_stream_by_dst(&self, dst: Address) -> Option<usize> {
        self.streams
            .iter()
            .rposition(|s| s.kind == StreamKind::Rtp && s.dst == dst)
    }

    /// Newest RTP stream matching the exact (src, dst) pair.
    pub fn find_stream_exact(&self, src: Address, dst: Address) -> Option<usize> {
        self.streams
            .iter()
            .rposition(|s| s.kind == StreamKind::Rtp && s.src == Some(src) && s.dst == dst)
    }

    /// Newest RTCP stream towards `dst` whose source is unbound or equals
    /// `src`.
    pub fn find_rtcp_stream(&self, src: Address, dst: Address) -> Option<usize> {
        self.streams.iter().rposition(|s| {
            s.kind == StreamKind::Rtcp
                && s.dst == dst
                && s.src.map(|bound| bound == src).unwrap_or(true)
        })
    }

    /// Whether any stream already targets `dst`.
    pub fn has_stream_to(&self, dst: Address) -> bool {
        self.streams.iter().any(|s| s.dst == dst)
    }

    /// Register a dialog that referenced this call through X-Call-ID.
    pub fn add_xcall(&mut self, child: &CallRef) {
        self.xcalls.push(Arc::downgrade(child));
    }

    /// Child dialogs that are still retained.
    pub fn xcalls(&self) -> Vec<CallRef> {
        self.xcalls.iter().filter_map(Weak::upgrade).collect()
    }

    /// Total order over a single sortable attribute; ties are left to the
    /// caller (the storage breaks them by call index).
    pub fn attr_cmp(&self, other: &Call, field: SortField) -> Ordering {
        match field {
            SortField::Index => self.index.cmp(&other.index),
            SortField::CallId => self.callid.cmp(&other.callid),
            SortField::From => self.sip_from().cmp(&other.sip_from()),
            SortField::To => self.sip_to().cmp(&other.sip_to()),
            SortField::MsgCount => self.msg_count().cmp(&other.msg_count()),
            SortField::StartTime => self.start_time().cmp(&other.start_time()),
            SortField::State => self.state.cmp(&other.state),
            SortField::Duration => self.duration().cmp(&other.duration()),
        }
    }

    fn sip_from(&self) -> &str {
        self.messages.first().map(|m| m.from.as_str()).unwrap_or("")
    }

    fn sip_to(&self) -> &str {
        self.messages.first().map(|m| m.to.as_str()).unwrap_or("")
    }
}
