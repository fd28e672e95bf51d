// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::{
    client::{ClientLink, LogonStatus, MsgToken, SendStatus},
    msg::{Msg, info::DM_ERROR},
    msglist::{
        clock::{Clock, SystemClock},
        thread::{Bucket, ThrId, ThrStatus, Thread},
    },
};

/// Subscriber notification: the ids of the threads an inbound delivery
/// touched. Invoked outside the tracker lock.
pub type UpdateCb = Arc<dyn Fn(&[ThrId]) + Send + Sync>;

/// Snapshot of one message inside a thread, as handed to UIs.
#[derive(Debug, Clone)]
pub struct ThrMsg {
    pub msg: Arc<Msg>,
    pub token: Option<MsgToken>,
    pub hours: u8,
    pub mins: u8,
    pub sent: bool,
}

struct Inner {
    threads: Vec<Thread>,
    next_min: u32,
    next_thr_id: ThrId,
    clock: Arc<dyn Clock>,
    update_cb: Option<UpdateCb>,
}

/// Groups individual CPDLC messages into conversation threads, tracks
/// each thread's lifecycle state and correlates replies to requests via
/// their sequence numbers.
///
/// Thread-safe: a single lock guards all mutable state, and it is never
/// held across a subscriber callback, so callbacks may re-enter the
/// public API freely.
pub struct MsgList {
    link: Arc<dyn ClientLink>,
    inner: Mutex<Inner>,
}

impl MsgList {
    pub fn new(link: Arc<dyn ClientLink>) -> Self {
        Self {
            link,
            inner: Mutex::new(Inner {
                threads: Vec::new(),
                next_min: 0,
                next_thr_id: 0,
                clock: Arc::new(SystemClock),
                update_cb: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the time source (tests inject a manual clock).
    pub fn set_clock(&self, clock: Arc<dyn Clock>) {
        self.lock().clock = clock;
    }

    pub fn set_update_cb(&self, cb: Option<UpdateCb>) {
        self.lock().update_cb = cb;
    }

    /// Entry point for the transport's receive path. Correlates the
    /// message to a thread (or opens a new one), then notifies the
    /// subscriber with the lock released.
    pub fn receive(&self, msg: Msg) {
        let (cb, updated) = {
            let mut inner = self.lock();
            let idx = match inner.correlate(&msg) {
                Some(idx) => idx,
                None => inner.new_thread(),
            };
            let (hours, mins) = inner.clock.wall_hm();
            let time = inner.clock.now();
            let thr = &mut inner.threads[idx];
            thr.dirty = true;
            thr.buckets.push(Bucket {
                msg: Arc::new(msg),
                token: None,
                sent: false,
                hours,
                mins,
                time,
            });
            let id = thr.id;
            inner.update_status(idx, &*self.link);
            (inner.update_cb.clone(), vec![id])
        };
        if let Some(cb) = cb {
            cb(&updated);
        }
    }

    /// Sends a message on an existing thread, or on a fresh one when
    /// `thr_id` is `None`. Returns the thread actually used.
    ///
    /// # Panics
    ///
    /// Panics when `thr_id` names an unknown or already-finalised
    /// thread; both are caller errors.
    pub fn send(&self, msg: Msg, thr_id: Option<ThrId>) -> ThrId {
        let mut inner = self.lock();
        let idx = inner.send_impl(msg, thr_id, &*self.link);
        let id = inner.threads[idx].id;
        inner.update_status(idx, &*self.link);
        id
    }

    /// Re-runs status recomputation over every thread; drives response
    /// timeouts. Call periodically.
    pub fn update(&self) {
        let mut inner = self.lock();
        for idx in 0..inner.threads.len() {
            inner.update_status(idx, &*self.link);
        }
    }

    /// Ids of all threads, newest first. With `ignore_done` set,
    /// threads that are final and have no unseen changes are skipped.
    pub fn thread_ids(&self, ignore_done: bool) -> Vec<ThrId> {
        self.lock()
            .threads
            .iter()
            .rev()
            .filter(|thr| !(ignore_done && !thr.dirty && thr.status.is_final()))
            .map(|thr| thr.id)
            .collect()
    }

    /// Status of a thread plus its unseen-change flag.
    pub fn status(&self, thr_id: ThrId) -> (ThrStatus, bool) {
        let inner = self.lock();
        let thr = inner.thread(thr_id);
        (thr.status, thr.dirty)
    }

    pub fn is_done(&self, thr_id: ThrId) -> bool {
        self.lock().thread(thr_id).status.is_final()
    }

    pub fn msg_count(&self, thr_id: ThrId) -> usize {
        self.lock().thread(thr_id).buckets.len()
    }

    /// The `nr`-th message of the thread, oldest first.
    pub fn message(&self, thr_id: ThrId, nr: usize) -> ThrMsg {
        let inner = self.lock();
        let bucket = &inner.thread(thr_id).buckets[nr];
        ThrMsg {
            msg: Arc::clone(&bucket.msg),
            token: bucket.token,
            hours: bucket.hours,
            mins: bucket.mins,
            sent: bucket.sent,
        }
    }

    /// Clears the unseen-change flag.
    pub fn mark_seen(&self, thr_id: ThrId) {
        let mut inner = self.lock();
        inner.thread_mut(thr_id).dirty = false;
    }

    /// Forgets the thread entirely. Final status does not imply
    /// removal; this is the subscriber's explicit decision.
    pub fn remove_thread(&self, thr_id: ThrId) {
        let mut inner = self.lock();
        let idx = inner.idx_of(thr_id).expect("invalid message thread ID");
        inner.threads.remove(idx);
    }

    /// Forces the thread CLOSED unless it already reached a final
    /// state. Closed threads no longer attract correlated uplinks.
    pub fn close_thread(&self, thr_id: ThrId) {
        let mut inner = self.lock();
        let thr = inner.thread_mut(thr_id);
        if !thr.status.is_final() {
            thr.status = ThrStatus::Closed;
        }
    }
}

impl Inner {
    fn idx_of(&self, thr_id: ThrId) -> Option<usize> {
        self.threads.iter().position(|thr| thr.id == thr_id)
    }

    fn thread(&self, thr_id: ThrId) -> &Thread {
        let idx = self.idx_of(thr_id).expect("invalid message thread ID");
        &self.threads[idx]
    }

    fn thread_mut(&mut self, thr_id: ThrId) -> &mut Thread {
        let idx = self.idx_of(thr_id).expect("invalid message thread ID");
        &mut self.threads[idx]
    }

    fn new_thread(&mut self) -> usize {
        let id = self.next_thr_id;
        self.next_thr_id += 1;
        self.threads.push(Thread::new(id));
        self.threads.len() - 1
    }

    /// Finds the thread an inbound message belongs to: the newest
    /// non-closed thread holding a bucket whose MIN the message's MRN
    /// references. A DISREGARD nullifies an uplink we received, so it
    /// matches unsent buckets; everything else answers something we
    /// sent. No MRN means no correlation at all.
    fn correlate(&self, msg: &Msg) -> Option<usize> {
        let mrn = msg.mrn?;
        let want_sent = !msg.is_disregard();
        for (idx, thr) in self.threads.iter().enumerate().rev() {
            // Manually closed threads stay out of correlation, which
            // lets a UI force further uplinks into new threads.
            if thr.status == ThrStatus::Closed {
                continue;
            }
            let hit = thr
                .buckets
                .iter()
                .rev()
                .any(|b| b.sent == want_sent && b.msg.min == Some(mrn));
            if hit {
                return Some(idx);
            }
        }
        None
    }

    fn send_impl(
        &mut self,
        mut msg: Msg,
        thr_id: Option<ThrId>,
        link: &dyn ClientLink,
    ) -> usize {
        let idx = match thr_id {
            Some(id) => {
                let idx = self.idx_of(id).expect("invalid message thread ID");
                assert!(
                    !self.threads[idx].status.is_final(),
                    "sending on finalised thread {id}"
                );
                idx
            },
            None => {
                let idx = self.new_thread();
                self.threads[idx].status = ThrStatus::Open;
                idx
            },
        };

        // Reply correlation: the newest bucket going the other way is
        // what this message answers.
        let out_dl = msg.is_dl();
        if let Some(bucket) = self.threads[idx]
            .buckets
            .iter()
            .rev()
            .find(|b| b.msg.is_dl() != out_dl)
        {
            msg.mrn = bucket.msg.min;
        }
        msg.min = Some(self.next_min);
        self.next_min += 1;

        let token = link.send_msg(&msg);
        let (hours, mins) = self.clock.wall_hm();
        let time = self.clock.now();
        self.threads[idx].buckets.push(Bucket {
            msg: Arc::new(msg),
            token: Some(token),
            sent: true,
            hours,
            mins,
            time,
        });
        idx
    }

    /// The status state machine: applies the first matching rule to the
    /// thread's newest bucket. Final states are sticky.
    fn update_status(&mut self, idx: usize, link: &dyn ClientLink) {
        enum Decision {
            Set(ThrStatus),
            TimedOut,
            ConnEnded,
            Leave,
        }

        let decision = {
            let thr = &self.threads[idx];
            if thr.status.is_final() {
                return;
            }
            let (Some(first), Some(last)) = (thr.buckets.first(), thr.buckets.last())
            else {
                return;
            };
            let timeout = i64::from(last.msg.timeout_secs());
            let now = self.clock.now();

            if thr.buckets.len() == 1
                && first.sent
                && !first.msg.requires_response()
            {
                // A lone sent message that expects no answer is a
                // closed conversation.
                Decision::Set(ThrStatus::Closed)
            } else if last.sent && last.msg.is_dl_req() {
                match last.token.map(|tok| link.msg_status(tok)) {
                    Some(SendStatus::Sending) => Decision::Set(ThrStatus::Pending),
                    Some(SendStatus::SendFailed) => Decision::Set(ThrStatus::Failed),
                    _ => Decision::Set(ThrStatus::Open),
                }
            } else if last.msg.is_standby() {
                Decision::Set(ThrStatus::Standby)
            } else if last.msg.is_accept() {
                Decision::Set(ThrStatus::Accepted)
            } else if last.msg.is_reject() {
                Decision::Set(ThrStatus::Rejected)
            } else if last.msg.is_roger() || last.msg.is_link_mgmt() {
                Decision::Set(ThrStatus::Closed)
            } else if last.msg.is_ul_req()
                && thr.status != ThrStatus::Standby
                && timeout != 0
                && now - last.time > timeout
            {
                Decision::TimedOut
            } else if last.msg.is_disregard() {
                Decision::Set(ThrStatus::Disregard)
            } else if last.msg.is_error() {
                Decision::Set(ThrStatus::Error)
            } else if link.logon_status() != LogonStatus::Complete {
                Decision::ConnEnded
            } else {
                Decision::Leave
            }
        };

        match decision {
            Decision::Set(status) => {
                trace!(thr = self.threads[idx].id, ?status, "thread status");
                self.threads[idx].status = status;
            },
            Decision::TimedOut => {
                // The peer never answered within the element's response
                // window: auto-reply with a downlink error, then
                // finalise.
                let reply = Msg::of_type(true, DM_ERROR)
                    .expect("DM62 is in the static table")
                    .with_text("TIMEDOUT");
                let id = self.threads[idx].id;
                self.send_impl(reply, Some(id), link);
                self.threads[idx].status = ThrStatus::TimedOut;
            },
            Decision::ConnEnded => {
                let thr = &mut self.threads[idx];
                thr.dirty = false;
                thr.status = ThrStatus::ConnEnded;
            },
            Decision::Leave => {},
        }
    }
}
