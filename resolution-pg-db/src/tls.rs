// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use diesel::{ConnectionError, ConnectionResult};
use diesel_async::AsyncPgConnection;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, RootCertStore};
use rustls_pki_types::CertificateDer;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::error;
use webpki_roots::TLS_SERVER_ROOTS;

// Accepts any server certificate, which is what libpq does unless `sslmode=verify-*` is set.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

// Open a postgres connection through tokio-postgres with the given TLS configuration and hand
// it to diesel-async. TLS is negotiated with the server: with the default `sslmode=prefer` a
// server without TLS support still gets a plaintext connection, and `sslmode=disable` skips
// the negotiation entirely.
pub async fn establish_tls_connection(
    database_url: &str,
    tls_config: ClientConfig,
) -> ConnectionResult<AsyncPgConnection> {
    let tls = MakeRustlsConnect::new(tls_config);
    let (client, conn) = tokio_postgres::connect(database_url, tls)
        .await
        .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;

    // The connection object drives the socket and resolves once the client is dropped.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            error!("Database connection terminated: {e}");
        }
    });

    AsyncPgConnection::try_from(client).await
}

pub fn build_tls_config(
    tls_verify_cert: bool,
    tls_ca_cert_path: Option<PathBuf>,
) -> anyhow::Result<ClientConfig> {
    let builder = ClientConfig::builder().with_safe_defaults();
    if !tls_verify_cert {
        return Ok(builder
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth());
    }

    let mut roots = webpki_root_store();
    if let Some(path) = tls_ca_cert_path.as_deref() {
        for cert in read_ca_certificates(path)? {
            roots
                .add(&Certificate(cert.to_vec()))
                .context("Failed to add CA certificate to root store")?;
        }
    }

    Ok(builder
        .with_root_certificates(roots)
        .with_no_client_auth())
}

// PEM bundles and single DER certificates are both accepted.
fn read_ca_certificates(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read CA certificate from {}", path.display()))?;

    if bytes.starts_with(b"-----BEGIN") {
        rustls_pemfile::certs(&mut bytes.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to parse PEM certificates from {}", path.display()))
    } else {
        Ok(vec![CertificateDer::from(bytes)])
    }
}

fn webpki_root_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject.to_vec(),
            ta.subject_public_key_info.to_vec(),
            ta.name_constraints.as_ref().map(|nc| nc.to_vec()),
        )
    }));
    roots
}
