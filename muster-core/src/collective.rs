//! # Collective Dispatcher
//!
//! Transparent execution of sub-requests on the peer that owns the
//! target nodes.
//!
//! ## Overview
//!
//! Outbound ([`Core::peer_dispatch`]): resolve the member record, open
//! a TCP connection on the collective port, wrap it in TLS with no CA
//! verification and pin the presented certificate against the stored
//! fingerprint, acknowledge the peer's two handshake frames, announce
//! and send the MessagePack dispatch envelope, then stream back
//! length-framed response items until the zero-length end marker.
//!
//! Inbound ([`handle_dispatch`] behind [`CollectiveServer`]): verify
//! the client certificate against the named member's pinned
//! fingerprint (silently closing on mismatch), decode the envelope,
//! execute the route locally exactly as the executor would, and frame
//! every resulting item back.
//!
//! Failure semantics: a dead or vanished peer degrades into one
//! `ResourceUnavailable` item per affected node and the sub-stream ends
//! cleanly; the rest of the request is unaffected. A certificate
//! mismatch during outbound dispatch is fatal to the whole request.

use crate::api::Core;
use crate::tls::{self, PeerConnectError, TlsIdentity};
use crate::tlv::{self, TlvFrame};
use async_stream::stream;
use futures::StreamExt;
use muster_plugin_sdk::{
    ApiError, InputData, Operation, ResponseItem, ResponseStream, WireError,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

/// Port collective members listen on unless configured otherwise.
pub const DEFAULT_COLLECTIVE_PORT: u16 = 13001;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// This member's collective identity and transport settings.
#[derive(Clone)]
pub struct CollectiveConfig {
    pub member_name: String,
    pub port: u16,
    pub identity: Arc<TlsIdentity>,
    pub idle_timeout: Duration,
}

impl CollectiveConfig {
    pub fn new(member_name: impl Into<String>, identity: Arc<TlsIdentity>) -> Self {
        CollectiveConfig {
            member_name: member_name.into(),
            port: DEFAULT_COLLECTIVE_PORT,
            identity,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// The serialized sub-request a member hands to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchEnvelope {
    /// Sending member's name
    pub name: String,
    pub nodes: Vec<String>,
    /// Path components relative to the node resource tree
    pub path: Vec<String>,
    pub tenant: Option<String>,
    pub operation: Operation,
    pub inputdata: InputData,
}

/// One framed element of a dispatch response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchItem {
    Item(ResponseItem),
    Error(WireError),
}

fn wire_err(context: &str, err: impl std::fmt::Display) -> ApiError {
    ApiError::Wire(format!("{context}: {err}"))
}

impl Core {
    /// Stream a sub-request through the peer that owns `nodes`.
    ///
    /// Never fails at construction: every pre-data failure mode other
    /// than certificate mismatch materializes as per-node
    /// `ResourceUnavailable` items.
    pub(crate) fn peer_dispatch(
        &self,
        manager: String,
        nodes: Vec<String>,
        element: Vec<String>,
        operation: Operation,
        inputdata: &InputData,
    ) -> ResponseStream {
        let config = self.config.clone();
        let collective = self.collective.clone();
        let inputdata = inputdata.clone();
        Box::pin(stream! {
            let member = match config.get_collective_member(&manager).await {
                Some(member) => member,
                None => {
                    for node in &nodes {
                        yield Ok(ResponseItem::resource_unavailable(
                            node,
                            format!("\"{manager}\" is not recognized as a collective member"),
                        ));
                    }
                    return;
                }
            };
            let collective = match collective {
                Some(collective) => collective,
                None => {
                    for node in &nodes {
                        yield Ok(ResponseItem::resource_unavailable(
                            node,
                            "collective mode is not active on this member",
                        ));
                    }
                    return;
                }
            };
            let unreachable = format!("Collective member {} is unreachable", member.name);
            let gone = format!("Collective member {} went unreachable", member.name);

            let connected = tokio::time::timeout(
                collective.idle_timeout,
                tls::connect_pinned(
                    &member.address,
                    collective.port,
                    &collective.identity,
                    &member.fingerprint,
                ),
            )
            .await;
            let mut remote = match connected {
                Ok(Ok(stream)) => stream,
                Ok(Err(PeerConnectError::CertificateMismatch)) => {
                    yield Err(ApiError::PeerCertificateMismatch(member.name.clone()));
                    return;
                }
                Ok(Err(PeerConnectError::Unreachable(err))) => {
                    tracing::warn!(peer = %member.name, error = %err, "peer connection failed");
                    for node in &nodes {
                        yield Ok(ResponseItem::resource_unavailable(node, unreachable.as_str()));
                    }
                    return;
                }
                Err(_elapsed) => {
                    tracing::warn!(peer = %member.name, "peer connection timed out");
                    for node in &nodes {
                        yield Ok(ResponseItem::resource_unavailable(node, unreachable.as_str()));
                    }
                    return;
                }
            };

            // the peer leads with two control frames; acknowledge both
            // before sending anything
            for _ in 0..2 {
                let handshake = tokio::time::timeout(
                    collective.idle_timeout,
                    tlv::recv_tlv(&mut remote),
                )
                .await;
                match handshake {
                    Ok(Ok(_frame)) => {}
                    _ => {
                        for node in &nodes {
                            yield Ok(ResponseItem::resource_unavailable(node, unreachable.as_str()));
                        }
                        return;
                    }
                }
            }

            let envelope = DispatchEnvelope {
                name: collective.member_name.clone(),
                nodes: nodes.clone(),
                path: element,
                tenant: config.tenant(),
                operation,
                inputdata,
            };
            let payload = match rmp_serde::to_vec_named(&envelope) {
                Ok(payload) => payload,
                Err(err) => {
                    yield Err(wire_err("encoding dispatch envelope", err));
                    return;
                }
            };
            let announce = TlvFrame::Struct(json!({
                "dispatch": {
                    "name": collective.member_name,
                    "length": payload.len(),
                }
            }));
            let sent = async {
                tlv::send_tlv(&mut remote, &announce).await?;
                remote.write_all(&payload).await?;
                remote.flush().await?;
                Ok::<(), ApiError>(())
            }
            .await;
            if sent.is_err() {
                for node in &nodes {
                    yield Ok(ResponseItem::resource_unavailable(node, unreachable.as_str()));
                }
                return;
            }

            loop {
                let frame = tokio::time::timeout(
                    collective.idle_timeout,
                    tlv::recv_frame(&mut remote),
                )
                .await;
                let payload = match frame {
                    Ok(Ok(Some(payload))) => payload,
                    Ok(Ok(None)) => break, // clean end of stream
                    _ => {
                        for node in &nodes {
                            yield Ok(ResponseItem::resource_unavailable(node, gone.as_str()));
                        }
                        return;
                    }
                };
                match rmp_serde::from_slice::<DispatchItem>(&payload) {
                    Ok(DispatchItem::Item(item)) => yield Ok(item),
                    Ok(DispatchItem::Error(err)) => {
                        yield Err(err.into());
                        return;
                    }
                    Err(err) => {
                        yield Err(wire_err("decoding dispatched response", err));
                        return;
                    }
                }
            }
        })
    }
}

/// Execute a dispatched envelope and frame the results back to the
/// peer. The connection is generic so the protocol is testable over
/// in-memory pipes.
pub async fn handle_dispatch<S>(
    core: &Core,
    connection: &mut S,
    peer_cert: &[u8],
    envelope_bytes: &[u8],
    peer_name: &str,
) -> Result<(), ApiError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(member) = core.config_manager().get_collective_member(peer_name).await else {
        tracing::warn!(peer = %peer_name, "dispatch from unknown collective member");
        return Ok(());
    };
    if !tls::fingerprint_matches(&member.fingerprint, peer_cert) {
        tracing::warn!(peer = %peer_name, "dispatch certificate does not match pinned fingerprint");
        return Ok(());
    }
    let envelope: DispatchEnvelope = rmp_serde::from_slice(envelope_bytes)
        .map_err(|e| wire_err("decoding dispatch envelope", e))?;
    tracing::debug!(
        peer = %peer_name,
        nodes = envelope.nodes.len(),
        path = ?envelope.path,
        "executing dispatched request"
    );

    match core.execute_dispatch(envelope).await {
        Ok(mut stream) => {
            while let Some(item) = stream.next().await {
                let framed = match item {
                    Ok(item) => DispatchItem::Item(item),
                    Err(err) => DispatchItem::Error(WireError::from(&err)),
                };
                let stop = matches!(framed, DispatchItem::Error(_));
                let payload = rmp_serde::to_vec_named(&framed)
                    .map_err(|e| wire_err("encoding dispatched response", e))?;
                tlv::send_frame(connection, &payload).await?;
                if stop {
                    break;
                }
            }
        }
        Err(err) => {
            let framed = DispatchItem::Error(WireError::from(&err));
            let payload = rmp_serde::to_vec_named(&framed)
                .map_err(|e| wire_err("encoding dispatched response", e))?;
            tlv::send_frame(connection, &payload).await?;
        }
    }
    tlv::send_end_of_stream(connection).await
}

/// The collective listener: accepts peer TLS connections, performs the
/// two-frame handshake, and hands announced envelopes to
/// [`handle_dispatch`].
pub struct CollectiveServer {
    core: Arc<Core>,
    acceptor: TlsAcceptor,
    banner: String,
}

impl CollectiveServer {
    pub fn new(core: Arc<Core>) -> Result<CollectiveServer, ApiError> {
        let collective = core.collective.clone().ok_or_else(|| {
            ApiError::InvalidArgument("collective mode is not configured".to_string())
        })?;
        let acceptor = tls::server_acceptor(&collective.identity)?;
        Ok(CollectiveServer {
            core,
            acceptor,
            banner: format!("muster collective {}", env!("CARGO_PKG_VERSION")),
        })
    }

    /// Accept loop; runs until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ApiError> {
        loop {
            let (tcp, addr) = listener.accept().await?;
            let core = self.core.clone();
            let acceptor = self.acceptor.clone();
            let banner = self.banner.clone();
            tokio::spawn(async move {
                if let Err(err) = handle_peer_connection(core, acceptor, banner, tcp).await {
                    tracing::warn!(peer = %addr, error = %err, "collective connection failed");
                }
            });
        }
    }
}

async fn handle_peer_connection(
    core: Arc<Core>,
    acceptor: TlsAcceptor,
    banner: String,
    tcp: TcpStream,
) -> Result<(), ApiError> {
    let mut stream = acceptor.accept(tcp).await?;
    let peer_cert: Vec<u8> = stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
        .map(|cert| cert.as_ref().to_vec())
        .ok_or_else(|| ApiError::Wire("peer presented no certificate".to_string()))?;

    let member_name = core
        .collective
        .as_ref()
        .map(|c| c.member_name.clone())
        .unwrap_or_default();
    tlv::send_tlv(&mut stream, &TlvFrame::Text(banner)).await?;
    tlv::send_tlv(
        &mut stream,
        &TlvFrame::Struct(json!({"collective": {"name": member_name}})),
    )
    .await?;

    let control = match tlv::recv_tlv(&mut stream).await? {
        TlvFrame::Struct(control) => control,
        TlvFrame::Text(_) => {
            return Err(ApiError::Wire(
                "expected a dispatch announcement".to_string(),
            ));
        }
    };
    let peer_name = control["dispatch"]["name"]
        .as_str()
        .ok_or_else(|| ApiError::Wire("dispatch announcement lacks a name".to_string()))?
        .to_string();
    let length = control["dispatch"]["length"]
        .as_u64()
        .ok_or_else(|| ApiError::Wire("dispatch announcement lacks a length".to_string()))?;
    if length > 64 << 20 {
        return Err(ApiError::Wire(format!(
            "dispatch envelope of {length} bytes exceeds the sanity limit"
        )));
    }
    let mut envelope = vec![0u8; length as usize];
    stream.read_exact(&mut envelope).await?;

    handle_dispatch(&core, &mut stream, &peer_cert, &envelope, &peer_name).await?;
    let _ = stream.shutdown().await;
    Ok(())
}
