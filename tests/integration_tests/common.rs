// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use cpdlc_relay_rs::{
    cfg::config::{Config, TlsConfig},
    msg::{Msg, decode, encode},
    relay::Relay,
};
use rustls::{
    DigitallySignedStruct, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::CryptoProvider,
};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf, split},
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tokio_rustls::{TlsConnector, client::TlsStream};
use tokio_util::sync::CancellationToken;

pub const WAIT: Duration = Duration::from_secs(5);

/// Self-signed test identity written to a scratch directory; the relay
/// loads it through its normal PEM path.
fn write_test_identity(tag: &str) -> Result<(PathBuf, PathBuf)> {
    let dir = std::env::temp_dir().join(format!("cpdlcd-test-{}-{tag}", std::process::id()));
    fs::create_dir_all(&dir)?;
    let signed = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .context("failed to generate test certificate")?;
    let certfile = dir.join("cert.pem");
    let keyfile = dir.join("key.pem");
    fs::write(&certfile, signed.cert.pem())?;
    fs::write(&keyfile, signed.key_pair.serialize_pem())?;
    Ok((certfile, keyfile))
}

/// Starts a relay on an ephemeral localhost port. The returned token
/// shuts it down; tests hold it until the end.
pub async fn start_relay(tag: &str) -> Result<(SocketAddr, CancellationToken)> {
    let (certfile, keyfile) = write_test_identity(tag)?;
    let cfg = Config {
        atc: vec!["KZAK".to_string()],
        tls: TlsConfig {
            certfile,
            keyfile,
            cafile: None,
        },
        ..Config::default()
    };

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let relay = Relay::from_listeners(&cfg, vec![listener])?;
    let addr = relay.local_addrs()[0];
    let cancel = relay.cancel_token();
    tokio::spawn(relay.run());
    Ok((addr, cancel))
}

/// Certificate verification is not what these tests exercise; accept
/// whatever the relay presents.
#[derive(Debug)]
struct AcceptAnyCert(CryptoProvider);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// A test peer: framed reader plus raw writer over one TLS session.
pub struct Peer {
    pub reader: BufReader<ReadHalf<TlsStream<TcpStream>>>,
    pub writer: WriteHalf<TlsStream<TcpStream>>,
}

impl Peer {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let provider = rustls::crypto::ring::default_provider();
        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let tcp = TcpStream::connect(addr).await?;
        let name = ServerName::try_from("localhost")?;
        let stream = connector.connect(name, tcp).await?;
        let (rd, wr) = split(stream);
        Ok(Self {
            reader: BufReader::new(rd),
            writer: wr,
        })
    }

    pub async fn send(&mut self, msg: &Msg) -> Result<()> {
        self.writer.write_all(encode(msg).as_bytes()).await?;
        Ok(())
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }

    /// Next complete message, bounded by [`WAIT`].
    pub async fn recv(&mut self) -> Result<Msg> {
        let line = self.recv_line().await?;
        let (msg, _) = decode(line.as_bytes())?;
        msg.context("incomplete message line")
    }

    /// Reads messages until one satisfies `pred`, skipping the rest.
    /// Useful where interleaving with forwarded LOGONs is timing
    /// dependent.
    pub async fn recv_until(&mut self, mut pred: impl FnMut(&Msg) -> bool) -> Result<Msg> {
        loop {
            let msg = self.recv().await?;
            if pred(&msg) {
                return Ok(msg);
            }
        }
    }

    /// Next raw wire line (terminator included), bounded by [`WAIT`].
    pub async fn recv_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .context("timed out waiting for a message")??;
        anyhow::ensure!(n > 0, "connection closed by relay");
        Ok(line)
    }

    /// Expects the relay to drop the connection (EOF), bounded by
    /// [`WAIT`].
    pub async fn expect_eof(&mut self) -> Result<()> {
        let mut line = String::new();
        let n = timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .context("timed out waiting for EOF")??;
        anyhow::ensure!(n == 0, "expected EOF, got {line:?}");
        Ok(())
    }
}
