//! TLS Group (spec.md §4.6): TLS handshake tests under four SNI
//! strategies, one of which fragments the ClientHello record across the
//! SNI extension to defeat naive middlebox string matching.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::colors::{censors_string, result_icon};
use crate::config::GlobalConfig;
use crate::error::ProbeError;
use crate::group::TestGroup;
use crate::probe::{ProbeContext, ProbeSet};
use crate::results::{slot, Family, FamilyOutcome, GlobalResults, GroupResults, SniStrategy, TlsOutcome, TlsResults, TlsStrategyMap};

#[derive(Debug, Clone, Deserialize)]
pub struct TlsAddrs {
    #[serde(rename = "IPv4")]
    pub ipv4: String,
    #[serde(rename = "IPv6")]
    pub ipv6: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsSnis {
    pub allow: String,
    pub block: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub addrs: TlsAddrs,
    pub snis: TlsSnis,
    pub timeout: f64,
}

impl TlsConfig {
    fn addr(&self, family: Family) -> &str {
        match family {
            Family::IPv4 => &self.addrs.ipv4,
            Family::IPv6 => &self.addrs.ipv6,
        }
    }
}

pub struct TlsGroup;

impl TestGroup for TlsGroup {
    fn tag(&self) -> &'static str {
        "TLS"
    }

    fn prereqs(&self) -> &'static [&'static str] {
        &["Route", "TCP"]
    }

    fn default_results(&self) -> GroupResults {
        GroupResults::Tls(TlsResults::default_unroutable())
    }

    fn should_skip(
        &self,
        defaults: GroupResults,
        _config: &GlobalConfig,
        upstream: &GlobalResults,
    ) -> (GroupResults, Option<String>) {
        let mut tls = match defaults {
            GroupResults::Tls(t) => t,
            other => return (other, Some("internal error: expected Tls results".to_string())),
        };
        let tcp = upstream.get("TCP").and_then(|r| r.as_tcp());
        let family_has_open_443 = |family: Family| -> bool {
            let Some(tcp) = tcp else { return false };
            let Some(port_map) = tcp.family(family).data() else { return false };
            let Some(addr_map) = port_map.get(&443) else { return false };
            addr_map.values().any(|slot| *slot.lock().unwrap() == crate::results::TcpOutcome::Connected)
        };

        if !Family::ALL.iter().any(|&f| family_has_open_443(f)) {
            return (GroupResults::Tls(tls), Some("cannot make TCP connections".to_string()));
        }

        for family in Family::ALL {
            if !family_has_open_443(family) {
                continue;
            }
            let mut strategy_map: TlsStrategyMap = HashMap::new();
            for strategy in SniStrategy::ALL {
                strategy_map.insert(strategy, slot(TlsOutcome::Timeout));
            }
            *tls.family_mut(family) = FamilyOutcome::Data(strategy_map);
        }
        (GroupResults::Tls(tls), None)
    }

    fn spawn(&self, config: &GlobalConfig, results: &GroupResults, probes: &mut ProbeSet) {
        let tls_results = results.as_tls().expect("TLS group always produces TlsResults");
        // `GlobalConfig::validate` rejects a malformed "TLS" section before
        // the scheduler ever runs, so `Err` can't reach here; `None` just
        // means the tag was never enabled.
        let cfg: TlsConfig = match config.group("TLS") {
            Some(Ok(c)) => c,
            _ => return,
        };
        let timeout = Duration::from_secs_f64(cfg.timeout);
        let client_config = Arc::new(build_client_config());

        for family in Family::ALL {
            let Some(strategy_map) = tls_results.family(family).data() else { continue };
            let dst: IpAddr = match cfg.addr(family).parse() {
                Ok(ip) => ip,
                Err(_) => continue,
            };

            for strategy in SniStrategy::ALL {
                let Some(slot) = strategy_map.get(&strategy) else { continue };
                let slot = slot.clone();
                let cfg = cfg.clone();
                let client_config = Arc::clone(&client_config);

                probes.spawn(format!("{family}, {strategy}"), timeout, move |ctx| async move {
                    let outcome = tokio::select! {
                        outcome = run_probe(dst, client_config, strategy, &cfg, &ctx) => outcome,
                        _ = ctx.cancelled() => return,
                    };
                    if !ctx.is_cancelled() {
                        *slot.lock().unwrap() = outcome;
                    }
                });
            }
        }
    }

    fn summarize(&self, results: &GroupResults, _config: &GlobalConfig) -> String {
        let tls = results.as_tls().expect("TLS group always produces TlsResults");
        let mut out = String::new();
        for family in Family::ALL {
            let Some(strategy_map) = tls.family(family).data() else { continue };
            let get = |s: SniStrategy| strategy_map.get(&s).map(|slot| *slot.lock().unwrap());

            let ip_only_ok = get(SniStrategy::None) == Some(TlsOutcome::Success);
            let sni_ok = get(SniStrategy::Allow) == Some(TlsOutcome::Success);
            out.push_str(&format!(
                "{family}: IP-only {} SNI {}\n",
                result_icon(Some(ip_only_ok), None),
                result_icon(Some(sni_ok), None)
            ));

            let mut censors = Vec::new();
            match get(SniStrategy::Block) {
                Some(TlsOutcome::Success) | None => {}
                Some(other) => censors.push(format!("Blocked SNI handshake {}", outcome_word(other))),
            }
            out.push_str(&censors_string(&censors));

            match get(SniStrategy::Frag) {
                Some(TlsOutcome::Success) => {
                    out.push_str(&format!("    {}Circumvention found: TLS record fragmentation{}\n", crate::colors::GREEN, crate::colors::RESET));
                }
                Some(other) => {
                    out.push_str(&format!("    {}Circumvention failed: {}{}\n", crate::colors::RED, outcome_word(other), crate::colors::RESET));
                }
                None => {}
            }
        }
        out
    }
}

fn outcome_word(outcome: TlsOutcome) -> &'static str {
    match outcome {
        TlsOutcome::Timeout => "timeout",
        TlsOutcome::Error => "error",
        TlsOutcome::Success => "success",
    }
}

fn server_name_for(strategy: SniStrategy, addr: IpAddr, cfg: &TlsConfig) -> Result<ServerName<'static>, ProbeError> {
    match strategy {
        SniStrategy::None => Ok(ServerName::IpAddress(addr.into())),
        SniStrategy::Allow => {
            ServerName::try_from(cfg.snis.allow.clone()).map_err(|_| ProbeError::SniNotInClientHello { sni: cfg.snis.allow.clone() })
        }
        SniStrategy::Block | SniStrategy::Frag => {
            ServerName::try_from(cfg.snis.block.clone()).map_err(|_| ProbeError::SniNotInClientHello { sni: cfg.snis.block.clone() })
        }
    }
}

fn sni_bytes_for(strategy: SniStrategy, cfg: &TlsConfig) -> Option<Vec<u8>> {
    match strategy {
        SniStrategy::None => None,
        SniStrategy::Allow => Some(cfg.snis.allow.clone().into_bytes()),
        SniStrategy::Block | SniStrategy::Frag => Some(cfg.snis.block.clone().into_bytes()),
    }
}

async fn run_probe(
    addr: IpAddr,
    client_config: Arc<ClientConfig>,
    strategy: SniStrategy,
    cfg: &TlsConfig,
    ctx: &ProbeContext,
) -> TlsOutcome {
    let target = SocketAddr::new(addr, 443);
    ctx.log(format!("Connecting to {target}"));
    let mut stream = match TcpStream::connect(target).await {
        Ok(s) => s,
        Err(e) => {
            ctx.log(format!("Failed with exception: {e}"));
            return TlsOutcome::Error;
        }
    };

    let server_name = match server_name_for(strategy, addr, cfg) {
        Ok(s) => s,
        Err(e) => {
            ctx.log(format!("Failed with exception: {e}"));
            return TlsOutcome::Error;
        }
    };
    let conn = match ClientConnection::new(client_config, server_name) {
        Ok(c) => c,
        Err(e) => {
            ctx.log(format!("Failed with exception: {e}"));
            return TlsOutcome::Error;
        }
    };

    let frag = strategy == SniStrategy::Frag;
    let sni_bytes = sni_bytes_for(strategy, cfg);
    match run_handshake(&mut stream, conn, frag, sni_bytes.as_deref(), ctx).await {
        Ok(()) => {
            ctx.log("Handshake complete");
            TlsOutcome::Success
        }
        Err(e) if e.is_benign_handshake_failure() => {
            ctx.log("Received handshake_failure alert");
            TlsOutcome::Success
        }
        Err(e) => {
            ctx.log(format!("Failed with exception: {e}"));
            TlsOutcome::Error
        }
    }
}

/// The memory-BIO handshake pump (spec.md §4.6 step 3, §9 "TLS memory-BIO
/// pump"): drive `conn` purely through its own in-memory buffers so the
/// first outbound flight can be intercepted and fragmented before any byte
/// reaches the socket.
async fn run_handshake(
    stream: &mut TcpStream,
    mut conn: ClientConnection,
    frag: bool,
    sni_bytes: Option<&[u8]>,
    ctx: &ProbeContext,
) -> Result<(), ProbeError> {
    let mut first_flight = true;
    let mut read_buf = vec![0u8; 65535];

    loop {
        if ctx.is_cancelled() {
            return Err(ProbeError::ConnectionClosed);
        }
        if conn.wants_write() {
            let mut out = Vec::new();
            conn.write_tls(&mut out).map_err(ProbeError::Send)?;
            if frag && first_flight {
                let fragmented = fragment_client_hello(&out, sni_bytes.unwrap_or(&[]))?;
                stream.write_all(&fragmented).await.map_err(ProbeError::Send)?;
            } else {
                stream.write_all(&out).await.map_err(ProbeError::Send)?;
            }
            first_flight = false;
            continue;
        }
        if !conn.is_handshaking() {
            return Ok(());
        }
        if conn.wants_read() {
            let n = stream.read(&mut read_buf).await.map_err(ProbeError::Receive)?;
            if n == 0 {
                return Err(ProbeError::ConnectionClosed);
            }
            let mut cursor = &read_buf[..n];
            conn.read_tls(&mut cursor).map_err(ProbeError::Receive)?;
            conn.process_new_packets().map_err(ProbeError::Tls)?;
            continue;
        }
        return Ok(());
    }
}

/// Fragments a single outbound TLS record containing a ClientHello so the
/// SNI value straddles a TLS record boundary (spec.md §4.6 "ClientHello
/// fragmentation algorithm"). Fails if `sni` does not literally occur in
/// the record payload, or is too short to split at offset 3 — both cases
/// map to `"error"` per spec.md §9's open question on the single-flight
/// assumption.
fn fragment_client_hello(record: &[u8], sni: &[u8]) -> Result<Vec<u8>, ProbeError> {
    if record.len() < 5 || sni.len() < 3 {
        return Err(ProbeError::SniNotInClientHello { sni: String::from_utf8_lossy(sni).into_owned() });
    }
    let header = &record[0..3];
    let payload = &record[5..];

    let split_at = find_subslice(payload, sni)
        .ok_or_else(|| ProbeError::SniNotInClientHello { sni: String::from_utf8_lossy(sni).into_owned() })?;
    let pre = &payload[..split_at];
    let post = &payload[split_at + sni.len()..];

    let mut fragment1 = Vec::with_capacity(pre.len() + 3);
    fragment1.extend_from_slice(pre);
    fragment1.extend_from_slice(&sni[0..3]);

    let mut fragment2 = Vec::with_capacity(sni.len() - 3 + post.len());
    fragment2.extend_from_slice(&sni[3..]);
    fragment2.extend_from_slice(post);

    let mut out = Vec::with_capacity(record.len() + 10);
    for fragment in [fragment1, fragment2] {
        out.extend_from_slice(header);
        out.extend_from_slice(&(fragment.len() as u16).to_be_bytes());
        out.extend_from_slice(&fragment);
    }
    Ok(out)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// rustls's documented "danger" API: hostname verification is disabled per
/// spec.md §4.6 step 2, since a probe that presents the `block` SNI is
/// expected to reach a server that doesn't serve it.
fn build_client_config() -> ClientConfig {
    ClientConfig::builder().dangerous().with_custom_certificate_verifier(Arc::new(NoServerVerification)).with_no_client_auth()
}

#[derive(Debug)]
struct NoServerVerification;

impl ServerCertVerifier for NoServerVerification {
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
        vec![
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{Protocol, TcpOutcome, TcpPortMap};

    fn tcp_results_with_open_443(family: Family) -> GroupResults {
        let mut tcp = crate::results::TcpResults::default_unroutable();
        let mut port_map: TcpPortMap = HashMap::new();
        let mut addr_map = HashMap::new();
        addr_map.insert("93.184.216.34".to_string(), slot(TcpOutcome::Connected));
        port_map.insert(443, addr_map);
        *tcp.family_mut(family) = FamilyOutcome::Data(port_map);
        GroupResults::Tcp(tcp)
    }

    #[test]
    fn skip_when_no_family_has_open_443() {
        let group = TlsGroup;
        let defaults = group.default_results();
        let mut upstream = GlobalResults::new();
        upstream.insert("TCP".to_string(), GroupResults::Tcp(crate::results::TcpResults::default_unroutable()));
        let (prepared, reason) = group.should_skip(defaults, &GlobalConfig { groups: HashMap::new() }, &upstream);
        assert_eq!(reason, Some("cannot make TCP connections".to_string()));
        let tls = prepared.as_tls().unwrap();
        assert!(matches!(tls.family(Family::IPv4), FamilyOutcome::Unroutable));
    }

    #[test]
    fn surviving_family_gets_all_four_strategies_preset_to_timeout() {
        let group = TlsGroup;
        let defaults = group.default_results();
        let mut upstream = GlobalResults::new();
        upstream.insert("TCP".to_string(), tcp_results_with_open_443(Family::IPv4));
        let (prepared, reason) = group.should_skip(defaults, &GlobalConfig { groups: HashMap::new() }, &upstream);
        assert!(reason.is_none());
        let tls = prepared.as_tls().unwrap();
        let strategy_map = tls.family(Family::IPv4).data().unwrap();
        for strategy in SniStrategy::ALL {
            assert_eq!(*strategy_map.get(&strategy).unwrap().lock().unwrap(), TlsOutcome::Timeout);
        }
        assert!(matches!(tls.family(Family::IPv6), FamilyOutcome::Unroutable));
    }

    #[test]
    fn fragmentation_splits_sni_at_offset_three() {
        let header = [0x16, 0x03, 0x01];
        let sni = b"blocked.example";
        let mut record = Vec::new();
        record.extend_from_slice(&header);
        record.extend_from_slice(&[0, 0]); // length placeholder, dropped by the algorithm
        record.extend_from_slice(b"...clienthello-prefix...");
        record.extend_from_slice(sni);
        record.extend_from_slice(b"...clienthello-suffix...");

        let fragmented = fragment_client_hello(&record, sni).unwrap();

        // Each emitted record starts with the original 3-byte header.
        assert_eq!(&fragmented[0..3], &header);
        let frag1_len = u16::from_be_bytes([fragmented[3], fragmented[4]]) as usize;
        let frag1_start = 5;
        let frag2_header_start = frag1_start + frag1_len;
        assert_eq!(&fragmented[frag2_header_start..frag2_header_start + 3], &header);

        // Concatenated fragment payloads (excluding each 5-byte record
        // header) reconstruct the original bytes after offset 5.
        let frag1 = &fragmented[frag1_start..frag1_start + frag1_len];
        let frag2_len_start = frag2_header_start + 3;
        let frag2_len = u16::from_be_bytes([fragmented[frag2_len_start], fragmented[frag2_len_start + 1]]) as usize;
        let frag2_start = frag2_len_start + 2;
        let frag2 = &fragmented[frag2_start..frag2_start + frag2_len];

        let mut reconstructed = Vec::new();
        reconstructed.extend_from_slice(frag1);
        reconstructed.extend_from_slice(frag2);
        assert_eq!(reconstructed, record[5..]);

        // The SNI bytes no longer occur intact in either individual fragment.
        assert!(find_subslice(frag1, sni).is_none());
        assert!(find_subslice(frag2, sni).is_none());
    }

    #[test]
    fn fragmentation_fails_fast_when_sni_absent() {
        let record = vec![0x16, 0x03, 0x01, 0, 5, b'h', b'e', b'l', b'l', b'o'];
        assert!(fragment_client_hello(&record, b"not-present.example").is_err());
    }
}
