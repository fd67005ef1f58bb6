//! Scripted SSH server for driving the probe in tests.
//!
//! Speaks the server side of the same transport: version exchange, KEXINIT, every kex method in
//! the catalog with an ed25519 host key, NEWKEYS, optional EXT_INFO, SERVICE_ACCEPT and a
//! userauth failure that lists the configured methods.

use std::time::Duration;

use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use super::algorithms;
use super::transport::ident::MAX_LINE_LEN;
use super::transport::kex::{
    DhGroup, ExchangeHash, GexRequest, KexMethod, KeyShare, SessionSecrets,
};
use super::transport::kexinit::{negotiate, KexInit};
use super::transport::wire::{Reader, Writer};
use super::transport::{msg, Role, Transport, TransportError};

#[derive(Debug, Clone)]
pub struct ServerBehavior {
    pub banner: String,
    pub kex_algorithms: Vec<String>,
    pub ciphers: Vec<String>,
    pub macs: Vec<String>,
    /// Sent as EXT_INFO when the client advertises `ext-info-c`.
    pub extensions: Vec<(String, String)>,
    pub auth_methods: Vec<String>,
    pub userauth_banner: Option<String>,
    pub corrupt_signature: bool,
}

impl Default for ServerBehavior {
    fn default() -> Self {
        let all = |names: &[&str]| -> Vec<String> { names.iter().map(|s| s.to_string()).collect() };
        Self {
            banner: "SSH-2.0-OpenSSH_9.0".into(),
            kex_algorithms: all(algorithms::KEX_ALGORITHMS),
            ciphers: all(algorithms::CIPHERS),
            macs: all(algorithms::MACS),
            extensions: Vec::new(),
            auth_methods: vec!["publickey".into()],
            userauth_banner: None,
            corrupt_signature: false,
        }
    }
}

/// What the server saw from the client.
#[derive(Debug, Default)]
pub struct ServerReport {
    pub client_id: Option<String>,
    pub client_offered_ext_info: bool,
    pub gex_request: Option<(u32, u32, u32)>,
    /// `(user, method)` of every userauth request received.
    pub auth_requests: Vec<(String, String)>,
    /// Why the session ended; a closed connection is the normal end.
    pub error: Option<String>,
}

pub struct MockServer {
    behavior: ServerBehavior,
    host_key: Ed25519KeyPair,
}

impl MockServer {
    pub fn new(behavior: ServerBehavior) -> Self {
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).unwrap();
        let host_key = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        Self { behavior, host_key }
    }

    pub async fn serve<S>(self, mut stream: S) -> ServerReport
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut report = ServerReport::default();
        if let Err(err) = self.session(&mut stream, &mut report).await {
            report.error = Some(err.to_string());
        }
        report
    }

    fn host_key_blob(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_str("ssh-ed25519")
            .put_string(self.host_key.public_key().as_ref());
        w.into_bytes()
    }

    async fn session<S>(&self, stream: &mut S, report: &mut ServerReport) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut t = Transport::new(stream, Role::Server, deadline);
        let b = &self.behavior;

        t.write_all(format!("{}\r\n", b.banner).as_bytes()).await?;
        let client_line = t.read_line(MAX_LINE_LEN).await?;
        report.client_id = Some(String::from_utf8_lossy(&client_line).into_owned());

        let server_kexinit = KexInit::offer(
            b.kex_algorithms.clone(),
            vec!["ssh-ed25519".into()],
            b.ciphers.clone(),
            b.macs.clone(),
        );
        let server_payload = server_kexinit.encode();
        t.send(&server_payload).await?;
        let client_payload = t.expect(msg::KEXINIT).await?;
        let client_kexinit = KexInit::decode(&client_payload)?;
        report.client_offered_ext_info = client_kexinit
            .kex_algorithms
            .iter()
            .any(|name| name == "ext-info-c");

        let negotiated = negotiate(&client_kexinit, &server_kexinit)?;
        let method = KexMethod::from_name(&negotiated.kex)
            .ok_or_else(|| TransportError::Protocol(format!("no method {}", negotiated.kex)))?;

        let mut gex = None;
        if method.is_group_exchange() {
            let request = t.expect(msg::KEX_DH_GEX_REQUEST).await?;
            let mut r = Reader::new(&request[1..]);
            let bounds = GexRequest {
                min: r.u32()?,
                preferred: r.u32()?,
                max: r.u32()?,
            };
            report.gex_request = Some((bounds.min, bounds.preferred, bounds.max));
            let group = DhGroup::modp_group14();
            let mut reply = Writer::message(msg::KEX_REPLY);
            reply
                .put_mpint(&group.p.to_bytes_be())
                .put_mpint(&group.g.to_bytes_be());
            t.send(reply.as_bytes()).await?;
            gex = Some((bounds, group));
        }

        let (init, reply_msg) = if method.is_group_exchange() {
            (msg::KEX_DH_GEX_INIT, msg::KEX_DH_GEX_REPLY)
        } else {
            (msg::KEX_INIT, msg::KEX_REPLY)
        };
        let payload = t.expect(init).await?;
        let mut r = Reader::new(&payload[1..]);
        let client_public = if method.is_ecdh() {
            r.string()?.to_vec()
        } else {
            r.mpint()?.to_vec()
        };

        let share = match &gex {
            Some((_, group)) => KeyShare::dh(group.clone()),
            None => KeyShare::for_method(method)?,
        };
        let host_key_blob = self.host_key_blob();
        let server_public = share.public();
        let mut reply = Writer::message(reply_msg);
        reply.put_string(&host_key_blob);
        share.put_public(&mut reply);
        let shared_secret = share.agree(&client_public)?;

        let mut hash = ExchangeHash::new(
            method,
            &client_line,
            b.banner.as_bytes(),
            &client_payload,
            &server_payload,
            &host_key_blob,
        );
        if let Some((bounds, group)) = &gex {
            hash.group_exchange(*bounds, group);
        }
        hash.public_values(method, &client_public, &server_public);
        let exchange_hash = hash.finish(&shared_secret);

        let mut signature = self.host_key.sign(&exchange_hash).as_ref().to_vec();
        if b.corrupt_signature {
            signature[0] ^= 0xff;
        }
        let mut signature_blob = Writer::new();
        signature_blob.put_str("ssh-ed25519").put_string(&signature);
        reply.put_string(signature_blob.as_bytes());
        t.send(reply.as_bytes()).await?;

        let secrets = SessionSecrets {
            method,
            shared_secret: &shared_secret,
            exchange_hash: &exchange_hash,
            session_id: &exchange_hash,
        };
        let (sealer, opener) = secrets.protection(&negotiated, Role::Server)?;
        t.send_newkeys(sealer).await?;
        t.recv_newkeys(opener).await?;

        if report.client_offered_ext_info && !b.extensions.is_empty() {
            let mut ext = Writer::message(msg::EXT_INFO);
            ext.put_u32(b.extensions.len() as u32);
            for (name, value) in &b.extensions {
                ext.put_str(name).put_str(value);
            }
            t.send(ext.as_bytes()).await?;
        }

        loop {
            let payload = t.recv_message().await?;
            let mut r = Reader::new(&payload[1..]);
            match payload[0] {
                msg::SERVICE_REQUEST => {
                    let service = r.utf8()?;
                    let mut accept = Writer::message(msg::SERVICE_ACCEPT);
                    accept.put_str(&service);
                    t.send(accept.as_bytes()).await?;
                }
                msg::USERAUTH_REQUEST => {
                    let user = r.utf8()?;
                    let _service = r.utf8()?;
                    let method = r.utf8()?;
                    report.auth_requests.push((user, method));
                    if let Some(text) = &b.userauth_banner {
                        let mut banner = Writer::message(msg::USERAUTH_BANNER);
                        banner.put_str(text).put_str("");
                        t.send(banner.as_bytes()).await?;
                    }
                    let mut failure = Writer::message(msg::USERAUTH_FAILURE);
                    failure.put_name_list(&b.auth_methods).put_bool(false);
                    t.send(failure.as_bytes()).await?;
                }
                other => {
                    return Err(TransportError::Protocol(format!(
                        "mock server got message {other}"
                    )))
                }
            }
        }
    }
}
