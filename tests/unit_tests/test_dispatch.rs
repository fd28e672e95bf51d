// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashSet;

use bytes::Bytes;
use cpdlc_relay_rs::{
    msg::{Msg, decode, encode},
    relay::{
        RelayState,
        blocklist::Blocklist,
        conn::Conn,
        queue::{QUEUED_MSG_MAX_BYTES, QUEUED_MSG_TIMEOUT},
    },
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn state() -> RelayState {
    let atcs: HashSet<String> = ["KZAK".to_string()].into_iter().collect();
    RelayState::new(atcs, QUEUED_MSG_MAX_BYTES, Blocklist::new(None))
}

fn attach(state: &mut RelayState, port: u16) -> (Conn, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let peer = format!("127.0.0.1:{port}").parse().expect("peer addr");
    let id = state
        .try_register(peer, tx.clone(), CancellationToken::new())
        .expect("fresh peer address");
    (Conn::new(id, peer, tx), rx)
}

fn recv_msg(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Msg {
    let bytes = rx.try_recv().expect("expected a delivery");
    let (msg, consumed) = decode(&bytes).expect("well-formed delivery");
    assert_eq!(consumed, bytes.len());
    msg.expect("complete message")
}

fn logon(state: &mut RelayState, conn: &mut Conn, from: &str, to: &str) {
    state.process_msg(conn, Msg::logon(from, to), 0);
    assert!(conn.logon_complete);
}

#[test]
fn non_logon_before_logon_gets_error_reply() {
    let mut st = state();
    let (mut conn, mut rx) = attach(&mut st, 40001);

    let mut req = Msg::of_type(true, 22).expect("DM22").with_text("KSFO");
    req.min = Some(0);
    st.process_msg(&mut conn, req, 0);

    let err = recv_msg(&mut rx);
    assert!(err.is_error());
    assert!(!err.is_dl(), "downlink offender gets an uplink error");
    assert_eq!(err.segs[0].text.as_deref(), Some("LOGON REQUIRED"));
    assert_eq!(err.mrn, Some(0));
    assert!(!conn.logon_complete);
}

#[test]
fn logon_with_empty_from_is_refused() {
    let mut st = state();
    let (mut conn, mut rx) = attach(&mut st, 40002);

    st.process_msg(&mut conn, Msg::logon("", "KZAK"), 0);
    let err = recv_msg(&mut rx);
    assert_eq!(
        err.segs[0].text.as_deref(),
        Some("LOGON REQUIRES FROM= HEADER")
    );
    assert!(!conn.logon_complete);
    assert!(conn.from.is_empty());
}

#[test]
fn forwarded_messages_get_the_authenticated_from() {
    let mut st = state();
    let (mut atc, mut atc_rx) = attach(&mut st, 40003);
    let (mut acft, _acft_rx) = attach(&mut st, 40004);
    logon(&mut st, &mut atc, "KZAK", "*");
    logon(&mut st, &mut acft, "AAL123", "KZAK");

    let mut req = Msg::of_type(true, 22)
        .expect("DM22")
        .with_text("KSFO")
        .with_to("KZAK");
    req.from = "SPOOFED".to_string();
    req.min = Some(0);
    st.process_msg(&mut acft, req, 0);

    // The ATC first sees the forwarded LOGON, then the request.
    let fwd_logon = recv_msg(&mut atc_rx);
    assert!(fwd_logon.is_logon);
    assert_eq!(fwd_logon.from, "AAL123");

    let fwd = recv_msg(&mut atc_rx);
    assert_eq!(fwd.from, "AAL123");
    assert_eq!(fwd.to, "KZAK");
    assert!(fwd.is_dl_req());
}

#[test]
fn message_without_destination_gets_error() {
    let mut st = state();
    let (mut conn, mut rx) = attach(&mut st, 40005);
    // LOGON with an empty to= leaves the connection registered but with
    // no default destination.
    st.process_msg(&mut conn, Msg::logon("AAL123", ""), 0);
    assert!(conn.logon_complete);
    let err = recv_msg(&mut rx);
    assert_eq!(
        err.segs[0].text.as_deref(),
        Some("MESSAGE MISSING TO= HEADER")
    );

    let req = Msg::of_type(true, 22).expect("DM22");
    st.process_msg(&mut conn, req, 0);
    let err = recv_msg(&mut rx);
    assert_eq!(
        err.segs[0].text.as_deref(),
        Some("MESSAGE MISSING TO= HEADER")
    );
}

#[test]
fn fan_out_to_all_connections_with_same_callsign() {
    let mut st = state();
    let (mut atc1, mut rx1) = attach(&mut st, 40006);
    let (mut atc2, mut rx2) = attach(&mut st, 40007);
    let (mut acft, _rx) = attach(&mut st, 40008);
    logon(&mut st, &mut atc1, "KZAK", "*");
    logon(&mut st, &mut atc2, "KZAK", "*");
    logon(&mut st, &mut acft, "AAL123", "KZAK");

    let mut req = Msg::of_type(true, 6).expect("DM6").with_text("FL350");
    req.min = Some(1);
    st.process_msg(&mut acft, req, 0);

    for rx in [&mut rx1, &mut rx2] {
        // Skip the forwarded LOGON, then expect the request.
        let _ = recv_msg(rx);
        let fwd = recv_msg(rx);
        assert!(fwd.is_dl_req());
        assert_eq!(fwd.min, Some(1));
    }
}

#[test]
fn offline_recipient_queues_then_tick_delivers_exact_bytes() {
    let mut st = state();
    let (mut acft, _rx) = attach(&mut st, 40009);
    logon(&mut st, &mut acft, "AAL123", "KZAK");
    assert_eq!(st.queued_msgs(), 1, "the LOGON itself is queued");

    let mut req = Msg::of_type(true, 22).expect("DM22").with_text("KSFO");
    req.min = Some(0);
    st.process_msg(&mut acft, req.clone(), 100);
    assert_eq!(st.queued_msgs(), 2);

    // What must come out is the rewritten, encoded form.
    req.from = "AAL123".to_string();
    let expected = encode(&req);

    let (mut atc, mut atc_rx) = attach(&mut st, 40010);
    logon(&mut st, &mut atc, "KZAK", "*");
    st.tick(101);
    assert_eq!(st.queued_msgs(), 1, "only the ATC's own LOGON to * remains");

    let _fwd_logon = recv_msg(&mut atc_rx);
    let delivered = atc_rx.try_recv().expect("queued request delivered");
    assert_eq!(&delivered[..], expected.as_bytes());
}

#[test]
fn queue_ages_out_silently() {
    let mut st = state();
    let (mut acft, mut rx) = attach(&mut st, 40011);
    logon(&mut st, &mut acft, "AAL123", "KZAK");

    let req = Msg::of_type(true, 22).expect("DM22");
    st.process_msg(&mut acft, req, 1000);
    assert_eq!(st.queued_msgs(), 2);

    st.tick(1000 + QUEUED_MSG_TIMEOUT + 1);
    assert_eq!(st.queued_msgs(), 0);
    assert!(rx.try_recv().is_err(), "age-out sends nothing to the sender");
}

#[test]
fn queue_overflow_reports_too_many_queued() {
    let atcs: HashSet<String> = HashSet::new();
    let mut st = RelayState::new(atcs, 1, Blocklist::new(None));
    let (mut acft, mut rx) = attach(&mut st, 40012);
    st.process_msg(&mut acft, Msg::logon("AAL123", "KZAK"), 0);

    // Even the forwarded LOGON cannot be queued with a 1-byte cap.
    let err = recv_msg(&mut rx);
    assert_eq!(
        err.segs[0].text.as_deref(),
        Some("TOO MANY QUEUED MESSAGES")
    );
    assert_eq!(st.queued_msgs(), 0);
}

#[test]
fn relogon_moves_router_registration() {
    let mut st = state();
    let (mut conn, _rx) = attach(&mut st, 40013);
    let (mut peer, peer_rx) = attach(&mut st, 40014);
    logon(&mut st, &mut conn, "AAL123", "KZAK");
    logon(&mut st, &mut peer, "UAL9", "AAL123");

    // Re-logon under a new callsign; deliveries to the old one queue.
    logon(&mut st, &mut conn, "AAL456", "KZAK");

    let mut msg = Msg::of_type(false, 117).expect("UM117");
    msg.to = "AAL123".to_string();
    st.process_msg(&mut peer, msg, 0);
    assert!(st.queued_msgs() > 0);

    // The new identity is reachable directly.
    let mut msg = Msg::of_type(false, 117).expect("UM117");
    msg.to = "AAL456".to_string();
    st.process_msg(&mut peer, msg, 0);
    let _ = peer_rx;
}

#[test]
fn unregister_removes_conn_and_router_entry() {
    let mut st = state();
    let (mut conn, _rx) = attach(&mut st, 40015);
    logon(&mut st, &mut conn, "AAL123", "KZAK");
    assert_eq!(st.conn_count(), 1);

    st.unregister(&conn);
    assert_eq!(st.conn_count(), 0);

    // A message to the gone callsign queues instead of delivering.
    let (mut peer, _peer_rx) = attach(&mut st, 40016);
    logon(&mut st, &mut peer, "KZAK", "*");
    let before = st.queued_msgs();
    let mut msg = Msg::of_type(false, 117).expect("UM117");
    msg.to = "AAL123".to_string();
    st.process_msg(&mut peer, msg, 0);
    assert_eq!(st.queued_msgs(), before + 1);
}

#[test]
fn duplicate_peer_address_is_refused() {
    let mut st = state();
    let (_conn, _rx) = attach(&mut st, 40017);

    let (tx, _rx2) = mpsc::unbounded_channel();
    let peer = "127.0.0.1:40017".parse().expect("peer addr");
    assert!(
        st.try_register(peer, tx, CancellationToken::new()).is_none(),
        "second connection from the same peer address must be refused"
    );
}
