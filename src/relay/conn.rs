// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::SocketAddr;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::msg::{DecodeError, Msg, decode};

pub type ConnId = u64;

/// Scratch read size for one TLS record pull.
pub const READ_BUF_SZ: usize = 4096;
/// Unframed input allowed once the peer has logged on.
pub const MAX_BUF_SZ: usize = 8192;
/// Unframed input allowed before LOGON; enough for the handshake line
/// and nothing else.
pub const MAX_BUF_SZ_NO_LOGON: usize = 128;

/// Fatal input conditions; each closes the connection.
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("invalid input character on connection: data MUST be plain text")]
    NotPlainText,
    #[error("input buffer overflow on connection: wanted {wanted} bytes, max {max} bytes")]
    Overflow { wanted: usize, max: usize },
    #[error("error decoding message from client: {0}")]
    Decode(#[from] DecodeError),
}

/// Per-peer protocol state. Owned by the connection's reader task; the
/// shared relay state only ever sees the id, the peer address and the
/// outbound channel.
#[derive(Debug)]
pub struct Conn {
    pub id: ConnId,
    pub peer: SocketAddr,
    /// Peer's own callsign; nonempty exactly when `logon_complete`.
    pub from: String,
    /// Default destination declared at LOGON.
    pub to: String,
    pub logon_complete: bool,
    inbuf: BytesMut,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl Conn {
    pub fn new(id: ConnId, peer: SocketAddr, tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            id,
            peer,
            from: String::new(),
            to: String::new(),
            logon_complete: false,
            inbuf: BytesMut::new(),
            tx,
        }
    }

    fn max_inbuf_sz(&self) -> usize {
        if self.logon_complete {
            MAX_BUF_SZ
        } else {
            MAX_BUF_SZ_NO_LOGON
        }
    }

    /// Validates and buffers one chunk of decrypted input.
    pub fn push_bytes(&mut self, data: &[u8]) -> Result<(), PumpError> {
        if data.iter().any(|&b| b == 0 || b > 127) {
            return Err(PumpError::NotPlainText);
        }
        let wanted = self.inbuf.len() + data.len();
        let max = self.max_inbuf_sz();
        if wanted > max {
            return Err(PumpError::Overflow { wanted, max });
        }
        self.inbuf.extend_from_slice(data);
        Ok(())
    }

    /// Runs the framing loop: peels complete messages off the front of
    /// the input buffer until the decoder reports none pending.
    pub fn drain_msgs(&mut self) -> Result<Vec<Msg>, PumpError> {
        let mut msgs = Vec::new();
        let mut consumed_total = 0;
        loop {
            let (msg, consumed) = decode(&self.inbuf[consumed_total..])?;
            let Some(msg) = msg else {
                break;
            };
            debug_assert!(consumed > 0);
            consumed_total += consumed;
            msgs.push(msg);
        }
        debug_assert!(consumed_total <= self.inbuf.len());
        self.inbuf.advance(consumed_total);
        Ok(msgs)
    }

    /// Appends encoded bytes to the outbound buffer. Failure means the
    /// writer half is already gone; the reader notices on its own.
    pub fn send_bytes(&self, bytes: Bytes) {
        let _ = self.tx.send(bytes);
    }
}
