//! The partial SSH handshake.
//!
//! `VersionExchange -> KeyExchange -> (ExtensionNegotiation) -> (UserAuthProbe) -> Done`.
//! Each phase writes what it observes into the caller's [`HandshakeLog`] before moving on, and
//! any failure stops the machine at that phase. No channel is ever opened and no credential is
//! ever sent: the only authentication request is the `none` method.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::debug;

use super::config::{HostKeyPolicy, ProbeConfig};
use super::error::{Phase, ProbeError};
use super::log::{Extension, GexBoundsLog, GroupLog, HandshakeLog, KeyExchangeLog};
use super::transport::hostkey::{self, HostKey};
use super::transport::ident::{self, Identification};
use super::transport::kex::{DhGroup, ExchangeHash, KexMethod, KeyShare, SessionSecrets};
use super::transport::kexinit::{self, KexInit};
use super::transport::wire::{Reader, Writer};
use super::transport::{msg, Role, Transport, TransportError};

const EXT_INFO_C: &str = "ext-info-c";
const USERAUTH_SERVICE: &str = "ssh-userauth";

/// Identification lines as exchanged, needed again for the exchange hash.
struct Versions {
    client: Vec<u8>,
    server: Vec<u8>,
}

pub struct HandshakeDriver<'c> {
    config: &'c ProbeConfig,
}

impl<'c> HandshakeDriver<'c> {
    pub fn new(config: &'c ProbeConfig) -> Self {
        Self { config }
    }

    /// Runs every enabled phase over `stream`. Reads and writes past `deadline` fail with a
    /// timeout.
    pub async fn run<S>(
        &self,
        stream: &mut S,
        log: &mut HandshakeLog,
        deadline: Instant,
    ) -> Result<(), ProbeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut transport = Transport::new(stream, Role::Client, deadline);

        let versions = self
            .version_exchange(&mut transport, log)
            .await
            .map_err(|err| ProbeError::handshake(Phase::VersionExchange, err))?;
        if self.config.hello_only() {
            debug!("hello-only probe, stopping after version exchange");
            return Ok(());
        }

        self.key_exchange(&mut transport, log, &versions)
            .await
            .map_err(|err| ProbeError::handshake(Phase::KeyExchange, err))?;

        let mut service_accepted = false;
        if self.config.collect_extensions() {
            self.extension_negotiation(&mut transport, log)
                .await
                .map_err(|err| ProbeError::handshake(Phase::ExtensionNegotiation, err))?;
            service_accepted = true;
        }

        if self.config.collect_userauth() {
            self.userauth_probe(&mut transport, log, service_accepted)
                .await
                .map_err(|err| ProbeError::handshake(Phase::UserAuthProbe, err))?;
        }
        Ok(())
    }

    /// Sends our identification first, then reads the server's. In hello-only mode only the
    /// banner and its parsed form are recorded.
    async fn version_exchange<S>(
        &self,
        t: &mut Transport<'_, S>,
        log: &mut HandshakeLog,
    ) -> Result<Versions, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let full_log = !self.config.hello_only();
        let client_id = self.config.client_id();
        ident::write_identification(t, client_id).await?;

        let mut preamble = Vec::new();
        let result = ident::read_server_hello(t, &mut preamble).await;
        if full_log {
            for line in preamble {
                log.note(Phase::VersionExchange, format!("line before identification: {line}"));
            }
        }
        let line = result?;

        let banner = String::from_utf8_lossy(&line).trim().to_string();
        log.banner = Some(banner.clone());
        let server = Identification::parse(&banner)?;
        log.server_id = Some(server.clone());
        if !server.speaks_ssh2() {
            return Err(TransportError::Protocol(format!(
                "server speaks protocol version {}",
                server.proto_version
            )));
        }
        if full_log {
            log.client_id = Some(Identification::parse(client_id)?);
        }
        debug!(server = %server.software_version, "version exchange complete");

        Ok(Versions {
            client: client_id.as_bytes().to_vec(),
            server: line,
        })
    }

    async fn key_exchange<S>(
        &self,
        t: &mut Transport<'_, S>,
        log: &mut HandshakeLog,
        versions: &Versions,
    ) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut kex_algorithms = self.config.kex_algorithms().to_vec();
        if self.config.collect_extensions() {
            kex_algorithms.push(EXT_INFO_C.to_string());
        }
        let client_kexinit = KexInit::offer(
            kex_algorithms,
            self.config.host_key_algorithms().to_vec(),
            self.config.ciphers().to_vec(),
            self.config.macs().to_vec(),
        );
        let client_payload = client_kexinit.encode();
        log.client_key_exchange = Some(client_kexinit.clone());
        t.send(&client_payload).await?;

        let server_payload = t.expect(msg::KEXINIT).await?;
        let server_kexinit = KexInit::decode(&server_payload)?;
        log.server_key_exchange = Some(server_kexinit.clone());

        let negotiated = kexinit::negotiate(&client_kexinit, &server_kexinit)?;
        log.algorithm_selection = Some(negotiated.clone());
        debug!(
            kex = %negotiated.kex,
            host_key = %negotiated.host_key,
            cipher = %negotiated.server_to_client.cipher,
            "negotiated algorithms"
        );
        if kexinit::guess_was_wrong(&server_kexinit, &negotiated) {
            t.recv_message().await?;
            log.note(Phase::KeyExchange, "discarded the server's guessed kex packet");
        }

        let method = KexMethod::from_name(&negotiated.kex).ok_or_else(|| {
            TransportError::Protocol(format!("kex method {} is not implemented", negotiated.kex))
        })?;

        let mut group = None;
        let share = if method.is_group_exchange() {
            let negotiated_group = self.request_group(t, log, method).await?;
            let share = KeyShare::dh(negotiated_group.clone());
            group = Some(negotiated_group);
            share
        } else {
            KeyShare::for_method(method)?
        };
        if let (Some(fixed), None) = (method.fixed_group(), &group) {
            log.key_exchange = Some(KeyExchangeLog {
                method: method.name().to_string(),
                group: Some(GroupLog {
                    prime_bits: fixed.bits(),
                    generator: fixed.g.to_bytes_be(),
                    requested: None,
                }),
                client_public: Vec::new(),
                server_public: Vec::new(),
            });
        }

        let (init, reply) = if method.is_group_exchange() {
            (msg::KEX_DH_GEX_INIT, msg::KEX_DH_GEX_REPLY)
        } else {
            (msg::KEX_INIT, msg::KEX_REPLY)
        };
        let client_public = share.public();
        let mut request = Writer::message(init);
        share.put_public(&mut request);
        t.send(request.as_bytes()).await?;

        let payload = t.expect(reply).await?;
        let mut r = Reader::new(&payload[1..]);
        let host_key_blob = r.string()?;
        let server_public = if method.is_ecdh() {
            r.string()?.to_vec()
        } else {
            r.mpint()?.to_vec()
        };
        let signature_blob = r.string()?;

        let entry = log.key_exchange.get_or_insert_with(|| KeyExchangeLog {
            method: method.name().to_string(),
            group: None,
            client_public: Vec::new(),
            server_public: Vec::new(),
        });
        entry.client_public = client_public.clone();
        entry.server_public = server_public.clone();

        let host_key = HostKey::parse(host_key_blob)?;
        debug!(
            key_type = %host_key.key_type,
            fingerprint = %host_key.fingerprint_sha256,
            "server host key"
        );
        log.server_host_key = Some(host_key.clone());
        match self.config.host_key_policy() {
            HostKeyPolicy::AcceptAny => debug!("host key accepted without a trust check"),
        }

        let shared_secret = share.agree(&server_public)?;
        let mut hash = ExchangeHash::new(
            method,
            &versions.client,
            &versions.server,
            &client_payload,
            &server_payload,
            host_key_blob,
        );
        if let Some(group) = &group {
            hash.group_exchange(self.config.gex(), group);
        }
        hash.public_values(method, &client_public, &server_public);
        let exchange_hash = hash.finish(&shared_secret);

        let signature = hostkey::verify_exchange(
            &host_key,
            &negotiated.host_key,
            signature_blob,
            &exchange_hash,
        )?;
        log.signature = Some(signature);

        let secrets = SessionSecrets {
            method,
            shared_secret: &shared_secret,
            exchange_hash: &exchange_hash,
            session_id: &exchange_hash,
        };
        let (sealer, opener) = secrets.protection(&negotiated, Role::Client)?;
        t.send_newkeys(sealer).await?;
        t.recv_newkeys(opener).await?;
        debug!("new keys in use");
        Ok(())
    }

    /// Group exchange (RFC 4419): asks for a group within the configured bounds and checks
    /// that the server honoured them.
    async fn request_group<S>(
        &self,
        t: &mut Transport<'_, S>,
        log: &mut HandshakeLog,
        method: KexMethod,
    ) -> Result<DhGroup, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let bounds = self.config.gex();
        let mut request = Writer::message(msg::KEX_DH_GEX_REQUEST);
        request
            .put_u32(bounds.min)
            .put_u32(bounds.preferred)
            .put_u32(bounds.max);
        t.send(request.as_bytes()).await?;

        let payload = t.expect(msg::KEX_REPLY).await?;
        let mut r = Reader::new(&payload[1..]);
        let group = DhGroup::from_magnitudes(r.mpint()?, r.mpint()?)?;
        let bits = group.bits();
        log.key_exchange = Some(KeyExchangeLog {
            method: method.name().to_string(),
            group: Some(GroupLog {
                prime_bits: bits,
                generator: group.g.to_bytes_be(),
                requested: Some(GexBoundsLog {
                    min: bounds.min,
                    preferred: bounds.preferred,
                    max: bounds.max,
                }),
            }),
            client_public: Vec::new(),
            server_public: Vec::new(),
        });
        if bits < u64::from(bounds.min) || bits > u64::from(bounds.max) {
            return Err(TransportError::Protocol(format!(
                "server sent a {bits}-bit group outside {}..={} bits",
                bounds.min, bounds.max
            )));
        }
        Ok(group)
    }

    /// RFC 8308 §2.4: EXT_INFO arrives right after the server's first NEWKEYS. Requesting the
    /// userauth service gives a definite end point: SERVICE_ACCEPT.
    async fn extension_negotiation<S>(
        &self,
        t: &mut Transport<'_, S>,
        log: &mut HandshakeLog,
    ) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        send_service_request(t).await?;
        loop {
            let payload = t.recv_message().await?;
            match payload[0] {
                msg::EXT_INFO => {
                    let extensions = parse_ext_info(&payload)?;
                    debug!(count = extensions.len(), "server extensions");
                    log.server_extensions
                        .get_or_insert_with(Vec::new)
                        .extend(extensions);
                }
                msg::SERVICE_ACCEPT => {
                    log.server_extensions.get_or_insert_with(Vec::new);
                    return Ok(());
                }
                other => {
                    return Err(TransportError::Protocol(format!(
                        "unexpected message {other} before SERVICE_ACCEPT"
                    )))
                }
            }
        }
    }

    async fn userauth_probe<S>(
        &self,
        t: &mut Transport<'_, S>,
        log: &mut HandshakeLog,
        service_accepted: bool,
    ) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if !service_accepted {
            send_service_request(t).await?;
            loop {
                let payload = t.recv_message().await?;
                match payload[0] {
                    msg::SERVICE_ACCEPT => break,
                    msg::EXT_INFO => debug!("ignoring EXT_INFO that was not asked for"),
                    other => {
                        return Err(TransportError::Protocol(format!(
                            "unexpected message {other} before SERVICE_ACCEPT"
                        )))
                    }
                }
            }
        }

        let mut request = Writer::message(msg::USERAUTH_REQUEST);
        request
            .put_str("")
            .put_str("ssh-connection")
            .put_str("none");
        t.send(request.as_bytes()).await?;

        loop {
            let payload = t.recv_message().await?;
            let mut r = Reader::new(&payload[1..]);
            match payload[0] {
                msg::USERAUTH_BANNER => {
                    let message = r.utf8()?;
                    log.userauth_banner
                        .get_or_insert_with(String::new)
                        .push_str(&message);
                }
                msg::USERAUTH_FAILURE => {
                    let methods = r.name_list()?;
                    debug!(methods = ?methods, "userauth methods");
                    log.userauth = Some(methods);
                    return Ok(());
                }
                msg::USERAUTH_SUCCESS => {
                    log.userauth = Some(vec!["none".to_string()]);
                    log.note(
                        Phase::UserAuthProbe,
                        "server accepted the none method; stopping without opening a session",
                    );
                    return Ok(());
                }
                other => {
                    return Err(TransportError::Protocol(format!(
                        "unexpected message {other} in reply to a userauth request"
                    )))
                }
            }
        }
    }
}

async fn send_service_request<S>(t: &mut Transport<'_, S>) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut request = Writer::message(msg::SERVICE_REQUEST);
    request.put_str(USERAUTH_SERVICE);
    t.send(request.as_bytes()).await
}

fn parse_ext_info(payload: &[u8]) -> Result<Vec<Extension>, TransportError> {
    let mut r = Reader::new(&payload[1..]);
    let count = r.u32()?;
    let mut extensions = Vec::new();
    for _ in 0..count {
        let name = r.utf8()?;
        let value = r.utf8()?;
        extensions.push(Extension { name, value });
    }
    Ok(extensions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::config::ProbeOptions;
    use crate::ssh::status::ScanStatus;
    use crate::ssh::testing::{MockServer, ServerBehavior};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    fn config(options: ProbeOptions) -> ProbeConfig {
        ProbeConfig::assemble(&options).unwrap()
    }

    async fn probe(
        options: ProbeOptions,
        behavior: ServerBehavior,
    ) -> (HandshakeLog, Result<(), ProbeError>, crate::ssh::testing::ServerReport) {
        let config = config(options);
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(MockServer::new(behavior).serve(server));
        let mut log = HandshakeLog::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        let result = HandshakeDriver::new(&config)
            .run(&mut client, &mut log, deadline)
            .await;
        drop(client);
        let report = server.await.unwrap();
        (log, result, report)
    }

    #[tokio::test]
    async fn default_preferences_negotiate_curve25519_and_ed25519() {
        let (log, result, _) = probe(ProbeOptions::default(), ServerBehavior::default()).await;
        result.unwrap();
        assert_eq!(log.banner.as_deref(), Some("SSH-2.0-OpenSSH_9.0"));
        let selection = log.algorithm_selection.as_ref().unwrap();
        assert_eq!(selection.kex, "curve25519-sha256");
        assert_eq!(selection.host_key, "ssh-ed25519");
        let key = log.server_host_key.as_ref().unwrap();
        assert_eq!(key.key_type, "ssh-ed25519");
        assert_eq!(
            log.signature.as_ref().unwrap().check,
            hostkey::SignatureCheck::Verified
        );
        assert!(log.server_extensions.is_none());
        assert!(log.userauth.is_none());
    }

    #[tokio::test]
    async fn hello_only_records_only_the_banner() {
        let options = ProbeOptions {
            hello_only: true,
            ..ProbeOptions::default()
        };
        let (log, result, _) = probe(options, ServerBehavior::default()).await;
        assert_eq!(ScanStatus::classify(result.as_ref().err()), ScanStatus::Success);
        assert_eq!(log.banner.as_deref(), Some("SSH-2.0-OpenSSH_9.0"));
        assert!(log.server_id.is_some());
        let only_banner = HandshakeLog {
            banner: log.banner.clone(),
            server_id: log.server_id.clone(),
            ..HandshakeLog::new()
        };
        assert_eq!(log, only_banner);
    }

    #[tokio::test]
    async fn hello_only_leaves_preamble_lines_out_of_the_log() {
        let config = config(ProbeOptions {
            hello_only: true,
            ..ProbeOptions::default()
        });
        let (mut client, mut server) = tokio::io::duplex(4096);
        server
            .write_all(b"Welcome\r\nSSH-2.0-OpenSSH_9.0\r\n")
            .await
            .unwrap();
        let mut log = HandshakeLog::new();
        let deadline = Instant::now() + Duration::from_secs(1);
        HandshakeDriver::new(&config)
            .run(&mut client, &mut log, deadline)
            .await
            .unwrap();
        assert!(log.notes.is_empty());
        assert!(log.client_id.is_none());
        assert_eq!(log.banner.as_deref(), Some("SSH-2.0-OpenSSH_9.0"));
    }

    #[tokio::test]
    async fn client_identification_is_sent_before_the_server_speaks() {
        let config = config(ProbeOptions {
            hello_only: true,
            ..ProbeOptions::default()
        });
        let (mut client, server) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut line = String::new();
            tokio::io::BufReader::new(read).read_line(&mut line).await.unwrap();
            write.write_all(b"SSH-2.0-OpenSSH_9.0\r\n").await.unwrap();
            line
        });
        let mut log = HandshakeLog::new();
        let deadline = Instant::now() + Duration::from_secs(1);
        HandshakeDriver::new(&config)
            .run(&mut client, &mut log, deadline)
            .await
            .unwrap();
        assert_eq!(server.await.unwrap(), "SSH-2.0-Go\r\n");
        assert_eq!(log.banner.as_deref(), Some("SSH-2.0-OpenSSH_9.0"));
    }

    #[tokio::test]
    async fn extensions_and_auth_methods_are_collected_without_credentials() {
        let options = ProbeOptions {
            collect_extensions: true,
            collect_userauth: true,
            ..ProbeOptions::default()
        };
        let behavior = ServerBehavior {
            extensions: vec![("server-sig-algs".into(), "ssh-ed25519,rsa-sha2-512".into())],
            auth_methods: vec!["publickey".into(), "password".into()],
            userauth_banner: Some("authorised access only\n".into()),
            ..ServerBehavior::default()
        };
        let (log, result, report) = probe(options, behavior).await;
        result.unwrap();
        let extensions = log.server_extensions.as_ref().unwrap();
        assert_eq!(extensions[0].name, "server-sig-algs");
        assert_eq!(extensions[0].value, "ssh-ed25519,rsa-sha2-512");
        assert_eq!(
            log.userauth.as_deref(),
            Some(&["publickey".to_string(), "password".to_string()][..])
        );
        assert_eq!(
            log.userauth_banner.as_deref(),
            Some("authorised access only\n")
        );
        assert_eq!(report.auth_requests, vec![(String::new(), "none".to_string())]);
        assert!(report.client_offered_ext_info);
    }

    #[tokio::test]
    async fn server_without_extensions_is_recorded_as_empty() {
        let options = ProbeOptions {
            collect_extensions: true,
            ..ProbeOptions::default()
        };
        let (log, result, report) = probe(options, ServerBehavior::default()).await;
        result.unwrap();
        assert_eq!(log.server_extensions, Some(Vec::new()));
        assert!(report.auth_requests.is_empty());
    }

    #[tokio::test]
    async fn ext_info_c_is_only_offered_when_collecting() {
        let (log, _, report) = probe(ProbeOptions::default(), ServerBehavior::default()).await;
        assert!(!report.client_offered_ext_info);
        assert!(!log
            .client_key_exchange
            .unwrap()
            .kex_algorithms
            .contains(&EXT_INFO_C.to_string()));
    }

    #[tokio::test]
    async fn every_cipher_suite_completes() {
        for (cipher, mac) in [
            ("aes128-gcm@openssh.com", "hmac-sha2-256"),
            ("aes256-gcm@openssh.com", "hmac-sha2-256"),
            ("aes128-ctr", "hmac-sha2-256-etm@openssh.com"),
            ("aes192-ctr", "hmac-sha1"),
            ("aes256-ctr", "hmac-sha1-96"),
            ("aes128-cbc", "hmac-sha2-256"),
            ("3des-cbc", "hmac-sha1"),
            ("arcfour", "hmac-sha1"),
            ("arcfour128", "hmac-sha2-256-etm@openssh.com"),
            ("arcfour256", "hmac-sha1-96"),
        ] {
            let options = ProbeOptions {
                ciphers: cipher.into(),
                macs: mac.into(),
                collect_userauth: true,
                ..ProbeOptions::default()
            };
            let (log, result, _) = probe(options, ServerBehavior::default()).await;
            result.unwrap_or_else(|err| panic!("{cipher}/{mac}: {err}"));
            let selection = log.algorithm_selection.unwrap();
            assert_eq!(selection.client_to_server.cipher, cipher);
            assert!(log.userauth.is_some());
        }
    }

    #[tokio::test]
    async fn ecdh_and_fixed_group_methods_complete() {
        for kex in [
            "ecdh-sha2-nistp256",
            "ecdh-sha2-nistp384",
            "ecdh-sha2-nistp521",
            "curve25519-sha256@libssh.org",
            "diffie-hellman-group14-sha256",
            "diffie-hellman-group1-sha1",
        ] {
            let options = ProbeOptions {
                kex_algorithms: kex.into(),
                ..ProbeOptions::default()
            };
            let (log, result, _) = probe(options, ServerBehavior::default()).await;
            result.unwrap_or_else(|err| panic!("{kex}: {err}"));
            let exchange = log.key_exchange.unwrap();
            assert_eq!(exchange.method, kex);
            assert!(!exchange.server_public.is_empty());
        }
    }

    #[tokio::test]
    async fn legacy_only_server_completes_with_default_preferences() {
        let behavior = ServerBehavior {
            kex_algorithms: vec!["diffie-hellman-group1-sha1".into()],
            ciphers: vec!["3des-cbc".into()],
            macs: vec!["hmac-sha1".into()],
            ..ServerBehavior::default()
        };
        let options = ProbeOptions {
            collect_userauth: true,
            ..ProbeOptions::default()
        };
        let (log, result, _) = probe(options, behavior).await;
        result.unwrap();
        let selection = log.algorithm_selection.unwrap();
        assert_eq!(selection.kex, "diffie-hellman-group1-sha1");
        assert_eq!(selection.server_to_client.cipher, "3des-cbc");
        assert_eq!(log.userauth.as_deref(), Some(&["publickey".to_string()][..]));
    }

    #[tokio::test]
    async fn group_exchange_records_the_group() {
        let options = ProbeOptions {
            kex_algorithms: "diffie-hellman-group-exchange-sha256".into(),
            ..ProbeOptions::default()
        };
        let (log, result, report) = probe(options, ServerBehavior::default()).await;
        result.unwrap();
        assert_eq!(report.gex_request, Some((1024, 2048, 8192)));
        let group = log.key_exchange.unwrap().group.unwrap();
        assert_eq!(group.prime_bits, 2048);
        assert_eq!(group.generator, vec![2]);
    }

    #[tokio::test]
    async fn group_outside_bounds_is_a_key_exchange_error() {
        let options = ProbeOptions {
            kex_algorithms: "diffie-hellman-group-exchange-sha1".into(),
            gex_min_bits: 3072,
            gex_preferred_bits: 4096,
            ..ProbeOptions::default()
        };
        let (log, result, _) = probe(options, ServerBehavior::default()).await;
        let err = result.unwrap_err();
        assert_eq!(err.phase(), Some(Phase::KeyExchange));
        assert_eq!(log.key_exchange.unwrap().group.unwrap().prime_bits, 2048);
        assert!(log.server_host_key.is_none());
    }

    #[tokio::test]
    async fn no_common_cipher_fails_key_exchange() {
        let options = ProbeOptions {
            ciphers: "aes192-ctr".into(),
            ..ProbeOptions::default()
        };
        let behavior = ServerBehavior {
            ciphers: vec!["aes128-ctr".into()],
            ..ServerBehavior::default()
        };
        let (log, result, _) = probe(options, behavior).await;
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            ProbeError::Handshake {
                phase: Phase::KeyExchange,
                source: TransportError::NoCommonAlgorithm { .. }
            }
        ));
        assert_eq!(ScanStatus::classify(Some(&err)), ScanStatus::HandshakeError);
        assert!(log.server_key_exchange.is_some());
        assert!(log.algorithm_selection.is_none());
    }

    #[tokio::test]
    async fn forged_signature_is_rejected() {
        let behavior = ServerBehavior {
            corrupt_signature: true,
            ..ServerBehavior::default()
        };
        let (log, result, _) = probe(ProbeOptions::default(), behavior).await;
        assert!(matches!(
            result,
            Err(ProbeError::Handshake {
                phase: Phase::KeyExchange,
                source: TransportError::Crypto(_)
            })
        ));
        assert!(log.server_host_key.is_some());
        assert!(log.signature.is_none());
    }

    #[tokio::test]
    async fn close_after_banner_is_a_handshake_error_with_banner_kept() {
        let config = config(ProbeOptions::default());
        let (mut client, mut server) = tokio::io::duplex(4096);
        server.write_all(b"SSH-2.0-OpenSSH_9.0\r\n").await.unwrap();
        server.shutdown().await.unwrap();
        let mut log = HandshakeLog::new();
        let deadline = Instant::now() + Duration::from_secs(1);
        let err = HandshakeDriver::new(&config)
            .run(&mut client, &mut log, deadline)
            .await
            .unwrap_err();
        assert_eq!(ScanStatus::classify(Some(&err)), ScanStatus::HandshakeError);
        assert_eq!(log.banner.as_deref(), Some("SSH-2.0-OpenSSH_9.0"));
        assert!(log.server_key_exchange.is_none());
        assert!(log.algorithm_selection.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out_in_version_exchange() {
        let config = config(ProbeOptions::default());
        let (mut client, _server) = tokio::io::duplex(4096);
        let mut log = HandshakeLog::new();
        let deadline = Instant::now() + Duration::from_secs(3);
        let err = HandshakeDriver::new(&config)
            .run(&mut client, &mut log, deadline)
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Some(Phase::VersionExchange));
        assert_eq!(ScanStatus::classify(Some(&err)), ScanStatus::Timeout);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn ssh1_server_is_rejected_after_recording_banner() {
        let config = config(ProbeOptions::default());
        let (mut client, mut server) = tokio::io::duplex(4096);
        server
            .write_all(b"banner line\r\nSSH-1.5-OldServer\r\n")
            .await
            .unwrap();
        let mut log = HandshakeLog::new();
        let deadline = Instant::now() + Duration::from_secs(1);
        let err = HandshakeDriver::new(&config)
            .run(&mut client, &mut log, deadline)
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Some(Phase::VersionExchange));
        assert_eq!(log.banner.as_deref(), Some("SSH-1.5-OldServer"));
        assert_eq!(log.notes.len(), 1);
        assert!(log.client_id.is_none());
    }

    #[tokio::test]
    async fn repeated_probes_agree_on_everything_but_ephemeral_material() {
        let options = ProbeOptions {
            collect_extensions: true,
            collect_userauth: true,
            ..ProbeOptions::default()
        };
        let (first, _, _) = probe(options.clone(), ServerBehavior::default()).await;
        let (second, _, _) = probe(options, ServerBehavior::default()).await;
        assert_eq!(first.banner, second.banner);
        assert_eq!(first.algorithm_selection, second.algorithm_selection);
        assert_eq!(first.server_extensions, second.server_extensions);
        assert_eq!(first.userauth, second.userauth);
        assert_ne!(
            first.key_exchange.unwrap().client_public,
            second.key_exchange.unwrap().client_public
        );
    }
}
