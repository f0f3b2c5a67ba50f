use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Transport endpoint of a captured packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub ip: IpAddr,
    pub port: u16,
}

impl Address {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn with_port(&self, port: u16) -> Self {
        Self { ip: self.ip, port }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for Address {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: SocketAddr = s.parse()?;
        Ok(Self {
            ip: addr.ip(),
            port: addr.port(),
        })
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

/// SIP request methods, in dialog-starter-first order: every method up to
/// and including MESSAGE may open a dialog on its own, the rest only make
/// sense inside one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
    Register,
    Invite,
    Subscribe,
    Notify,
    Options,
    Publish,
    Message,
    Cancel,
    Bye,
    Ack,
    Prack,
    Info,
    Refer,
    Update,
}

impl Method {
    pub fn is_dialog_starter(&self) -> bool {
        *self <= Method::Message
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Register => "REGISTER",
            Method::Invite => "INVITE",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Options => "OPTIONS",
            Method::Publish => "PUBLISH",
            Method::Message => "MESSAGE",
            Method::Cancel => "CANCEL",
            Method::Bye => "BYE",
            Method::Ack => "ACK",
            Method::Prack => "PRACK",
            Method::Info => "INFO",
            Method::Refer => "REFER",
            Method::Update => "UPDATE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request method or response status code of a SIP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReqResp {
    Request(Method),
    Response(u16),
}

impl ReqResp {
    pub fn is_request(&self) -> bool {
        matches!(self, ReqResp::Request(_))
    }

    pub fn method(&self) -> Option<Method> {
        match self {
            ReqResp::Request(m) => Some(*m),
            ReqResp::Response(_) => None,
        }
    }

    pub fn code(&self) -> Option<u16> {
        match self {
            ReqResp::Request(_) => None,
            ReqResp::Response(c) => Some(*c),
        }
    }
}

impl fmt::Display for ReqResp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReqResp::Request(m) => f.write_str(m.as_str()),
            ReqResp::Response(c) => write!(f, "{}", c),
        }
    }
}

/// Dissected SIP layer of a packet.
#[derive(Debug, Clone)]
pub struct SipRecord {
    pub callid: String,
    pub xcallid: Option<String>,
    pub from: String,
    pub to: String,
    pub cseq: u32,
    pub reqresp: ReqResp,
    /// Reason phrase, responses only.
    pub resp_str: Option<String>,
}

/// One `m=` line of an SDP body together with its connection address.
#[derive(Debug, Clone)]
pub struct SdpMedia {
    pub media_type: String,
    pub address: IpAddr,
    pub rtp_port: u16,
    pub rtcp_port: Option<u16>,
    pub formats: Vec<u8>,
}

impl SdpMedia {
    /// Announced RTP destination for this media.
    pub fn rtp_address(&self) -> Address {
        Address::new(self.address, self.rtp_port)
    }

    /// Announced RTCP destination, RTP port + 1 when not negotiated.
    pub fn rtcp_address(&self) -> Address {
        Address::new(self.address, self.rtcp_port.unwrap_or(self.rtp_port + 1))
    }
}

/// Dissected SDP body attached to a SIP message.
#[derive(Debug, Clone, Default)]
pub struct SdpRecord {
    pub medias: Vec<SdpMedia>,
}

/// Dissected RTP header.
#[derive(Debug, Clone)]
pub struct RtpRecord {
    pub payload_type: u8,
    pub ssrc: u32,
}

/// Dissected RTCP header.
#[derive(Debug, Clone)]
pub struct RtcpRecord {
    pub packet_type: u8,
}

/// A captured packet as delivered by the dissector pipeline: transport
/// endpoints, raw payload and whichever protocol records were decoded.
#[derive(Debug, Clone)]
pub struct Packet {
    pub src: Address,
    pub dst: Address,
    pub timestamp: DateTime<Utc>,
    pub payload: Bytes,
    pub sip: Option<SipRecord>,
    pub sdp: Option<SdpRecord>,
    pub rtp: Option<RtpRecord>,
    pub rtcp: Option<RtcpRecord>,
}

impl Packet {
    pub fn new(src: Address, dst: Address, timestamp: DateTime<Utc>, payload: Bytes) -> Self {
        Self {
            src,
            dst,
            timestamp,
            payload,
            sip: None,
            sdp: None,
            rtp: None,
            rtcp: None,
        }
    }
}
