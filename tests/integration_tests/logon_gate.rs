// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use cpdlc_relay_rs::msg::Msg;

use crate::integration_tests::common::{Peer, start_relay};

#[tokio::test]
async fn non_logon_first_message_is_rejected_but_survives() -> Result<()> {
    let (addr, _cancel) = start_relay("logon-gate").await?;

    let mut acft = Peer::connect(addr).await?;
    let mut req = Msg::of_type(true, 22)?.with_text("KSFO");
    req.min = Some(0);
    acft.send(&req).await?;

    let err = acft.recv().await?;
    assert!(err.is_error());
    assert_eq!(err.segs[0].text.as_deref(), Some("LOGON REQUIRED"));
    assert_eq!(err.mrn, Some(0));

    // The connection stayed open: a proper LOGON and a relayed message
    // still work end to end.
    let mut atc = Peer::connect(addr).await?;
    atc.send(&Msg::logon("KZAK", "*")).await?;
    acft.send(&Msg::logon("AAL123", "KZAK")).await?;

    let fwd_logon = atc.recv().await?;
    assert!(fwd_logon.is_logon);
    assert_eq!(fwd_logon.from, "AAL123");

    acft.send(&req).await?;
    let fwd = atc.recv().await?;
    assert_eq!(fwd.from, "AAL123");
    assert!(fwd.is_dl_req());
    Ok(())
}

#[tokio::test]
async fn logon_without_from_is_refused() -> Result<()> {
    let (addr, _cancel) = start_relay("logon-nofrom").await?;

    let mut peer = Peer::connect(addr).await?;
    peer.send(&Msg::logon("", "KZAK")).await?;

    let err = peer.recv().await?;
    assert!(err.is_error());
    assert_eq!(
        err.segs[0].text.as_deref(),
        Some("LOGON REQUIRES FROM= HEADER")
    );
    Ok(())
}

#[tokio::test]
async fn oversize_input_before_logon_closes_the_connection() -> Result<()> {
    let (addr, _cancel) = start_relay("oversize").await?;

    let mut peer = Peer::connect(addr).await?;
    // 129 printable bytes, no terminator: one over the pre-LOGON cap.
    peer.send_raw(&[b'A'; 129]).await?;
    peer.expect_eof().await?;
    Ok(())
}

#[tokio::test]
async fn control_bytes_close_the_connection() -> Result<()> {
    let (addr, _cancel) = start_relay("ctrl-bytes").await?;

    let mut peer = Peer::connect(addr).await?;
    peer.send_raw(b"CPDLC\x00/LOGON\n").await?;
    peer.expect_eof().await?;
    Ok(())
}
