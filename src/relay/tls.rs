// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use anyhow::{Context, Result, ensure};
use rustls::RootCertStore;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("can't open {}", path.display()))?,
    );
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .with_context(|| format!("failed to parse certificates in {}", path.display()))?;
    ensure!(!certs.is_empty(), "no certificates found in {}", path.display());
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("can't open {}", path.display()))?,
    );
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("failed to parse private key in {}", path.display()))?
        .with_context(|| format!("no private key found in {}", path.display()))
}

/// Builds the process-wide TLS acceptor from the configured PEM files.
///
/// Client certificates are not requested: LOGON-level authentication is
/// a documented stub (see the dispatch path). A configured `cafile` is
/// loaded into a root store so the certificate chain is validated at
/// startup, keeping the future client-auth extension point honest.
pub fn acceptor(
    certfile: &Path,
    keyfile: &Path,
    cafile: Option<&Path>,
) -> Result<TlsAcceptor> {
    if let Some(cafile) = cafile {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(cafile)? {
            roots
                .add(cert)
                .with_context(|| format!("bad CA certificate in {}", cafile.display()))?;
        }
    }

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(load_certs(certfile)?, load_key(keyfile)?)
        .context("failed to build TLS server config")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
