// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # TLS Handshake
//!
//! Chooses how the broker connection performs its handshake. Verified TLS goes through
//! lapin's own connector with the configured CA chain. With `tls_skip_verify` the
//! connection is opened through a rustls connector that accepts any broker certificate
//! while still checking handshake signatures.

use crate::{config::RabbitMQConfigs, errors::AmqpError};
use lapin::{
    tcp::{HandshakeResult, OwnedTLSConfig, RustlsConnector, TcpStream},
    uri::AMQPUri,
};
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider},
    pki_types::{CertificateDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, SignatureScheme,
};
use std::{sync::Arc, time::Duration};

/// Function lapin runs, on a blocking thread, to open the socket.
pub(crate) type Connector = Box<dyn FnOnce(&AMQPUri) -> HandshakeResult + Send + Sync>;

/// How a connection is established.
#[derive(Debug)]
pub(crate) enum Handshake {
    /// Plain AMQP, or TLS verified against the configured CA chain.
    Verified(OwnedTLSConfig),
    /// TLS accepting any broker certificate.
    Unverified,
}

impl Handshake {
    pub(crate) fn for_config(config: &RabbitMQConfigs) -> Handshake {
        if config.tls && config.tls_skip_verify {
            return Handshake::Unverified;
        }

        Handshake::Verified(OwnedTLSConfig {
            identity: None,
            cert_chain: config.tls_ca_cert.clone(),
        })
    }
}

/// Builds the socket opener used for [`Handshake::Unverified`].
pub(crate) fn unverified_connector() -> Result<Connector, AmqpError> {
    let connector = unverified_rustls()?;

    Ok(Box::new(move |uri: &AMQPUri| {
        let host = uri.authority.host.as_str();
        let address = (host, uri.authority.port);
        let stream = match uri.query.connection_timeout {
            Some(timeout) => TcpStream::connect_timeout(address, Duration::from_millis(timeout)),
            None => TcpStream::connect(address),
        }?;

        let stream = stream.into_rustls(&connector, host)?;
        stream.set_nonblocking(true)?;
        Ok(stream)
    }))
}

fn unverified_rustls() -> Result<RustlsConnector, AmqpError> {
    let provider = Arc::new(ring::default_provider());

    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|err| AmqpError::ConfigError(format!("tls: {}", err)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
        .with_no_client_auth();

    Ok(RustlsConnector::from(config))
}

/// Trusts every server certificate. Signatures are still verified.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
