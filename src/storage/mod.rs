use crate::call::{Call, CallRef, Message};
use crate::config::{CaptureOptions, MatchOptions, Settings, SortOptions, StorageMode};
use crate::matcher::Matcher;
use crate::packet::{Address, Method, Packet, ReqResp};
use crate::stream::{Stream, StreamKind};
use anyhow::Result;
use bytes::Bytes;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::{Arc, Mutex};
use tracing::debug;


/// Call counters for the UI status line.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Stats {
    pub total: usize,
    pub displayed: usize,
}

/// Non-owning reference to a message stored on a call.
#[derive(Debug, Clone)]
pub struct MessageHandle {
    pub call: CallRef,
    pub index: usize,
}

impl MessageHandle {
    pub fn with<R>(&self, f: impl FnOnce(&Message) -> R) -> R {
        f(&self.call.lock().unwrap().messages[self.index])
    }
}

/// Non-owning reference to a stream stored on a call.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    pub call: CallRef,
    pub index: usize,
}

impl StreamHandle {
    pub fn with<R>(&self, f: impl FnOnce(&Stream) -> R) -> R {
        f(&self.call.lock().unwrap().streams[self.index])
    }
}

/// Correlated model of the captured SIP traffic: every retained call keyed
/// by Call-ID, a display-sorted call list and the subset of calls still in
/// progress.
///
/// All ingress and queries run on the capture thread; methods are
/// synchronous and run to completion. External readers keep `CallRef`
/// handles that stay valid until the owning call is rotated out or
/// cleared.
pub struct Storage {
    capture: CaptureOptions,
    match_opts: MatchOptions,
    sort: SortOptions,
    matcher: Matcher,
    /// All retained calls in display sort order.
    calls: Vec<CallRef>,
    /// Calls still in progress, in the order they became active.
    active: Vec<CallRef>,
    /// Call-ID to call, one entry per retained call.
    callids: HashMap<String, CallRef>,
    last_index: u64,
    changed: bool,
}

impl Storage {
    pub fn new(
        capture: CaptureOptions,
        match_opts: MatchOptions,
        sort: SortOptions,
    ) -> Result<Self> {
        let matcher = Matcher::new(&match_opts)?;
        debug!(
            limit = capture.limit,
            rotate = capture.rotate,
            "call storage initialized"
        );
        Ok(Self {
            capture,
            match_opts,
            sort,
            matcher,
            calls: Vec::new(),
            active: Vec::new(),
            callids: HashMap::new(),
            last_index: 0,
            changed: false,
        })
    }

    /// Build a storage whose initial sort comes from the host settings.
    pub fn with_settings(
        capture: CaptureOptions,
        match_opts: MatchOptions,
        settings: &Settings,
    ) -> Result<Self> {
        let sort = SortOptions::from_settings(settings);
        Self::new(capture, match_opts, sort)
    }

    pub fn capture_options(&self) -> &CaptureOptions {
        &self.capture
    }

    pub fn sort_options(&self) -> SortOptions {
        self.sort
    }

    pub fn match_expr(&self) -> Option<&str> {
        self.match_opts.expr.as_deref()
    }

    pub fn count(&self) -> usize {
        self.calls.len()
    }

    /// Calls in current display sort order.
    pub fn calls(&self) -> impl Iterator<Item = &CallRef> {
        self.calls.iter()
    }

    /// Calls still in progress.
    pub fn active_calls(&self) -> impl Iterator<Item = &CallRef> {
        self.active.iter()
    }

    pub fn find_by_callid(&self, callid: &str) -> Option<CallRef> {
        self.callids.get(callid).cloned()
    }

    pub fn is_active(&self, call: &CallRef) -> bool {
        self.active.iter().any(|c| Arc::ptr_eq(c, call))
    }

    /// Dirty flag for the UI: true when visible state changed since the
    /// last check.
    pub fn changed_and_reset(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    /// Total retained calls and how many pass the display filter.
    pub fn stats<F>(&self, filter: F) -> Stats
    where
        F: Fn(&Call) -> bool,
    {
        let displayed = self
            .calls
            .iter()
            .filter(|call| filter(&call.lock().unwrap()))
            .count();
        Stats {
            total: self.calls.len(),
            displayed,
        }
    }

    /// Ingress path for dissected SIP packets.
    ///
    /// An unseen Call-ID passes the admission filters before a call is
    /// created; packets for already-retained dialogs are always kept.
    /// Returns `None` when the packet is not admitted.
    pub fn check_sip_packet(&mut self, packet: Packet) -> Option<MessageHandle> {
        let sip = packet.sip.clone()?;

        let mut newcall = false;
        let call = match self.callids.get(&sip.callid) {
            Some(call) => call.clone(),
            None => {
                if !self.matcher.check(&packet.payload) {
                    return None;
                }
                if self.match_opts.invite_only && sip.reqresp != ReqResp::Request(Method::Invite) {
                    return None;
                }
                if self.match_opts.complete_only && !is_dialog_starting(sip.reqresp) {
                    return None;
                }
                if self.capture.limit > 0 && self.count() >= self.capture.limit {
                    if self.capture.rotate {
                        self.rotate();
                    } else {
                        debug!(callid = %sip.callid, "call limit reached, dropping new dialog");
                        return None;
                    }
                }
                self.last_index += 1;
                let call = Arc::new(Mutex::new(Call::new(
                    sip.callid.clone(),
                    sip.xcallid.clone(),
                    self.last_index,
                )));
                self.callids.insert(sip.callid.clone(), call.clone());
                newcall = true;
                call
            }
        };

        let mut hasher = DefaultHasher::new();
        hasher.write(&packet.payload);
        let payload_hash = hasher.finish();

        let mut packet = packet;
        if self.capture.storage_mode == StorageMode::None {
            packet.payload = Bytes::new();
        }

        let message = Message {
            cseq: sip.cseq,
            from: sip.from,
            to: sip.to,
            reqresp: sip.reqresp,
            resp_str: sip.resp_str,
            packet,
            payload_hash,
            retrans_of: None,
            medias: Vec::new(),
        };

        let (index, first_message, invite_active) = {
            let mut guard = call.lock().unwrap();
            let first_message = guard.msg_count() == 0;
            let index = guard.add_message(message);
            guard.retrans_check(index);
            let invite_active = if guard.is_invite() {
                register_streams(&mut guard, index);
                guard.update_state(index);
                Some(guard.is_active())
            } else {
                None
            };
            (index, first_message, invite_active)
        };

        if first_message {
            self.link_xcall(&call, sip.xcallid.as_deref());
        }

        if let Some(active) = invite_active {
            let position = self.active.iter().position(|c| Arc::ptr_eq(c, &call));
            match (active, position) {
                (true, None) => self.active.push(call.clone()),
                (false, Some(pos)) => {
                    self.active.remove(pos);
                }
                _ => {}
            }
        }

        if newcall {
            self.insert_sorted(call.clone());
        }

        self.changed = true;
        Some(MessageHandle { call, index })
    }

    /// Ingress path for dissected RTP/RTCP packets. Returns `None` when no
    /// retained call announced a matching stream.
    pub fn check_rtp_packet(&mut self, packet: &Packet) -> Option<StreamHandle> {
        if !self.capture.rtp_capture {
            return None;
        }
        let src = packet.src;
        let dst = packet.dst;

        if let Some(rtp) = &packet.rtp {
            let format = rtp.payload_type;
            let (call, found) = self.find_rtp_stream(src, dst)?;
            let index = {
                let mut guard = call.lock().unwrap();
                let mut index = found;
                if guard.streams[index].is_complete() && guard.streams[index].fmtcode != Some(format)
                {
                    // Endpoint multiplexes payload types on one port:
                    // account this packet to a format-specific stream.
                    let media = guard.streams[index].media.clone();
                    let msg = guard.streams[index].msg;
                    let mut split = Stream::new(StreamKind::Rtp, media, msg, dst);
                    split.complete(src);
                    split.set_format(format);
                    index = guard.add_stream(split);
                }
                if !guard.streams[index].is_complete() {
                    guard.streams[index].complete(src);
                    guard.streams[index].set_format(format);
                    synthesize_reverse(&mut guard, index);
                }
                guard.streams[index].add_packet(packet);
                index
            };
            self.changed = true;
            return Some(StreamHandle { call, index });
        }

        if packet.rtcp.is_some() {
            let (call, index) = self.find_rtcp_stream(src, dst)?;
            {
                let mut guard = call.lock().unwrap();
                if !guard.streams[index].is_complete() {
                    guard.streams[index].complete(src);
                }
                guard.streams[index].add_packet(packet);
            }
            self.changed = true;
            return Some(StreamHandle { call, index });
        }

        None
    }

    /// Evict the call with the lowest creation index that is not locked.
    /// No-op when every retained call is pinned.
    pub fn rotate(&mut self) {
        let mut victim: Option<(usize, u64)> = None;
        for (pos, call) in self.calls.iter().enumerate() {
            let guard = call.lock().unwrap();
            if guard.locked {
                continue;
            }
            if victim.map(|(_, index)| guard.index < index).unwrap_or(true) {
                victim = Some((pos, guard.index));
            }
        }
        let Some((pos, _)) = victim else {
            return;
        };
        let call = self.calls.remove(pos);
        {
            let guard = call.lock().unwrap();
            debug!(callid = %guard.callid, "rotating out oldest call");
            self.callids.remove(&guard.callid);
        }
        if let Some(active_pos) = self.active.iter().position(|c| Arc::ptr_eq(c, &call)) {
            self.active.remove(active_pos);
        }
        self.changed = true;
    }

    /// Drop every retained call.
    pub fn clear(&mut self) {
        self.calls.clear();
        self.active.clear();
        self.callids.clear();
        self.changed = true;
    }

    /// Retain only calls accepted by `keep` and rebuild the Call-ID index
    /// from the survivors.
    pub fn clear_filtered<F>(&mut self, keep: F)
    where
        F: Fn(&Call) -> bool,
    {
        self.calls.retain(|call| keep(&call.lock().unwrap()));
        self.active.retain(|call| keep(&call.lock().unwrap()));
        self.callids.clear();
        for call in &self.calls {
            let callid = call.lock().unwrap().callid.clone();
            self.callids.insert(callid, call.clone());
        }
        self.changed = true;
    }

    /// Re-sort the call list with new options.
    pub fn set_sort_options(&mut self, sort: SortOptions) {
        self.sort = sort;
        self.calls.sort_by(|a, b| {
            let a = a.lock().unwrap();
            let b = b.lock().unwrap();
            compare_calls(&a, &b, sort)
        });
        self.changed = true;
    }

    fn insert_sorted(&mut self, call: CallRef) {
        let position = {
            let new = call.lock().unwrap();
            self.calls
                .binary_search_by(|probe| compare_calls(&probe.lock().unwrap(), &new, self.sort))
                .unwrap_or_else(|pos| pos)
        };
        self.calls.insert(position, call);
    }

    fn link_xcall(&self, call: &CallRef, xcallid: Option<&str>) {
        let Some(xcallid) = xcallid.filter(|id| !id.is_empty()) else {
            return;
        };
        let callid = call.lock().unwrap().callid.clone();
        if xcallid == callid {
            return;
        }
        if let Some(parent) = self.callids.get(xcallid) {
            parent.lock().unwrap().add_xcall(call);
        }
    }

    /// Newest stream, across all calls, announced towards `dst` whose
    /// source is unbound or already bound to `src`.
    fn find_rtp_stream(&self, src: Address, dst: Address) -> Option<(CallRef, usize)> {
        for call in self.calls.iter().rev() {
            if let Some(index) = call.lock().unwrap().find_stream(src, dst) {
                return Some((call.clone(), index));
            }
        }
        None
    }

    fn find_rtcp_stream(&self, src: Address, dst: Address) -> Option<(CallRef, usize)> {
        for call in self.calls.iter().rev() {
            if let Some(index) = call.lock().unwrap().find_rtcp_stream(src, dst) {
                return Some((call.clone(), index));
            }
        }
        None
    }
}

fn is_dialog_starting(reqresp: ReqResp) -> bool {
    matches!(reqresp, ReqResp::Request(method) if method.is_dialog_starter())
}

/// Sort comparator over the configured attribute; ties always fall back to
/// creation order so re-sorts are stable.
fn compare_calls(a: &Call, b: &Call, sort: SortOptions) -> Ordering {
    let ord = a.attr_cmp(b, sort.by);
    let ord = if sort.asc { ord } else { ord.reverse() };
    ord.then_with(|| a.index.cmp(&b.index))
}

/// Create the streams announced by the SDP body of the message at
/// `msg_index`, when it has one.
///
/// Three streams per media: the announced RTP destination, its RTCP
/// companion, and an RTP destination at the signalling source address for
/// endpoints behind NAT whose SDP address is not reachable.
fn register_streams(call: &mut Call, msg_index: usize) {
    let Some(sdp) = call.messages[msg_index].packet.sdp.clone() else {
        return;
    };
    let msg_src = call.messages[msg_index].src();

    for media in sdp.medias {
        let media = Arc::new(media);
        call.messages[msg_index].medias.push(media.clone());

        let rtp_dst = media.rtp_address();
        if !call.has_stream_to(rtp_dst) {
            call.add_stream(Stream::new(StreamKind::Rtp, media.clone(), msg_index, rtp_dst));
        }

        let rtcp_dst = media.rtcp_address();
        if !call.has_stream_to(rtcp_dst) {
            call.add_stream(Stream::new(
                StreamKind::Rtcp,
                media.clone(),
                msg_index,
                rtcp_dst,
            ));
        }

        let nat_dst = msg_src.with_port(media.rtp_port);
        if !call.has_stream_to(nat_dst) {
            call.add_stream(Stream::new(StreamKind::Rtp, media.clone(), msg_index, nat_dst));
        }
    }
}

/// Ensure the opposite direction of a freshly completed stream is
/// represented.
///
/// Endpoints commonly ignore the peer's advertised port and reply to the
/// observed source instead, so the announced reverse stream may never see
/// a packet. Once the forward source is known, a reverse stream with the
/// swapped addresses is synthesized unless one already covers that
/// direction.
fn synthesize_reverse(call: &mut Call, index: usize) {
    let Some(fwd_src) = call.streams[index].src else {
        return;
    };
    let fwd_dst = call.streams[index].dst;
    let format = call.streams[index].fmtcode;
    let media = call.streams[index].media.clone();
    let msg = call.streams[index].msg;

    let make_reverse = |call: &mut Call| {
        let mut reverse = Stream::new(StreamKind::Rtp, media.clone(), msg, fwd_src);
        reverse.complete(fwd_dst);
        if let Some(format) = format {
            reverse.set_format(format);
        }
        call.add_stream(reverse);
    };

    match call.find_stream_by_dst(fwd_src) {
        None => make_reverse(call),
        Some(existing) => {
            // A stream bound to a different source means the endpoint
            // shifted; keep it and make sure the exact pair exists.
            if let Some(bound) = call.streams[existing].src {
                if bound != fwd_dst && call.find_stream_exact(fwd_dst, fwd_src).is_none() {
                    make_reverse(call);
                }
            }
        }
    }
}
