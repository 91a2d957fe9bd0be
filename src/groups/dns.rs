//! DNS Group (spec.md §4.4): resolve allow/block hostnames via the host
//! resolver, plus a random-subdomain poison probe for every blocked host.

use std::collections::HashMap;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;

use crate::colors::{censors_string, result_icon};
use crate::config::GlobalConfig;
use crate::group::TestGroup;
use crate::probe::ProbeSet;
use crate::results::{slot, DnsHostMap, DnsResults, Family, FamilyOutcome, GlobalResults, GroupResults};

#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    pub allow: Vec<String>,
    pub block: Vec<String>,
    pub timeout: f64,
}

pub struct DnsGroup;

/// Builds the random poison prefix spec.md §4.4 describes: 40-60 lowercase
/// letters/digits followed by a dot. No legitimate zone would ever
/// delegate this subdomain, so any successful resolution of
/// `<prefix>.<blocked-host>` is necessarily a synthetic, on-path answer.
fn poison_prefix() -> String {
    let len = rand::thread_rng().gen_range(40..=60);
    let body: String =
        rand::thread_rng().sample_iter(&Alphanumeric).filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit()).take(len).map(char::from).collect();
    format!("{body}.")
}

fn poison_key(prefix: &str, host: &str) -> String {
    format!("{prefix}{host}")
}

impl TestGroup for DnsGroup {
    fn tag(&self) -> &'static str {
        "DNS"
    }

    fn prereqs(&self) -> &'static [&'static str] {
        &["Route"]
    }

    fn default_results(&self) -> GroupResults {
        GroupResults::Dns(DnsResults::default_unroutable())
    }

    fn should_skip(
        &self,
        defaults: GroupResults,
        config: &GlobalConfig,
        upstream: &GlobalResults,
    ) -> (GroupResults, Option<String>) {
        let mut dns = match defaults {
            GroupResults::Dns(d) => d,
            other => return (other, Some("internal error: expected Dns results".to_string())),
        };
        let route = upstream.get("Route").and_then(|r| r.as_route());
        let family_routable = |family: Family| -> bool {
            route
                .map(|r| {
                    let p = r.family(family);
                    *p.get(crate::results::Protocol::Tcp).lock().unwrap()
                        || *p.get(crate::results::Protocol::Udp).lock().unwrap()
                })
                .unwrap_or(false)
        };
        if !Family::ALL.iter().any(|&f| family_routable(f)) {
            return (GroupResults::Dns(dns), Some("no routable networks".to_string()));
        }

        // Every surviving family gets the same pre-populated map: one slot
        // per allow host, one per block host, one per block host's poison
        // key. Keys must exist before `spawn` runs, since `spawn` only ever
        // sees an immutable `&GroupResults` and cannot insert new entries.
        // `GlobalConfig::validate` rejects a malformed "DNS" section before
        // the scheduler ever runs, so `Err` can't reach here; `None` just
        // means the tag was never enabled.
        let cfg: Option<DnsConfig> = match config.group("DNS") {
            Some(Ok(c)) => Some(c),
            _ => None,
        };
        dns.poison_prefix = poison_prefix();

        for family in Family::ALL {
            if !family_routable(family) {
                continue;
            }
            let mut host_map: DnsHostMap = HashMap::new();
            if let Some(cfg) = &cfg {
                for host in &cfg.allow {
                    host_map.insert(host.clone(), slot(false));
                }
                for host in &cfg.block {
                    host_map.insert(host.clone(), slot(false));
                    host_map.insert(poison_key(&dns.poison_prefix, host), slot(false));
                }
            }
            *dns.family_mut(family) = FamilyOutcome::Data(host_map);
        }
        (GroupResults::Dns(dns), None)
    }

    fn spawn(&self, config: &GlobalConfig, results: &GroupResults, probes: &mut ProbeSet) {
        let dns_results = results.as_dns().expect("DNS group always produces DnsResults");
        // See `should_skip`: `Err` is ruled out by upfront validation,
        // `None` means disabled.
        let cfg: DnsConfig = match config.group("DNS") {
            Some(Ok(c)) => c,
            _ => return,
        };
        let timeout = Duration::from_secs_f64(cfg.timeout);
        let prefix = dns_results.poison_prefix.clone();
        tracing::info!("Using POISON test prefix: {prefix}");

        for family in Family::ALL {
            let Some(host_map) = dns_results.family(family).data() else { continue };

            for host in &cfg.allow {
                spawn_resolve(probes, host_map, family, host.clone(), timeout, None);
            }
            for host in &cfg.block {
                spawn_resolve(probes, host_map, family, host.clone(), timeout, None);
                spawn_resolve(probes, host_map, family, host.clone(), timeout, Some(prefix.clone()));
            }
        }
    }

    fn summarize(&self, results: &GroupResults, config: &GlobalConfig) -> String {
        let dns = results.as_dns().expect("DNS group always produces DnsResults");
        // Same invariant as `spawn`: a malformed section can't reach here.
        let cfg: DnsConfig = match config.group("DNS") {
            Some(Ok(c)) => c,
            _ => return String::new(),
        };

        let mut out = String::new();
        for family in Family::ALL {
            let Some(host_map) = dns.family(family).data() else { continue };

            let allow_total = cfg.allow.len();
            let allow_ok = cfg.allow.iter().filter(|h| resolved(host_map, h)).count();
            let dns_icon = if allow_total == 0 || allow_ok == allow_total {
                result_icon(Some(true), None)
            } else if allow_ok == 0 {
                result_icon(Some(false), None)
            } else {
                result_icon(None, Some(&format!("resolved {allow_ok}/{allow_total}")))
            };
            out.push_str(&format!("{family}: DNS {dns_icon}\n"));

            let mut censors = Vec::new();
            let block_total = cfg.block.len();
            let block_ok = cfg.block.iter().filter(|h| resolved(host_map, h)).count();
            if block_total > 0 && block_ok < block_total {
                censors.push(format!("DNS blocking: {}/{} blocked", block_total - block_ok, block_total));
            }

            let poisoned = cfg
                .block
                .iter()
                .filter(|h| resolved(host_map, &poison_key(&dns.poison_prefix, h)))
                .count();
            if poisoned > 0 {
                censors.push(format!("DNS poisoning: {poisoned}/{block_total} poisoned"));
            }
            out.push_str(&censors_string(&censors));
        }
        out
    }
}

fn resolved(host_map: &DnsHostMap, host: &str) -> bool {
    host_map.get(host).map(|slot| *slot.lock().unwrap()).unwrap_or(false)
}

fn spawn_resolve(
    probes: &mut ProbeSet,
    host_map: &DnsHostMap,
    family: Family,
    host: String,
    timeout: Duration,
    poison_prefix: Option<String>,
) {
    let key = match &poison_prefix {
        Some(prefix) => poison_key(prefix, &host),
        None => host.clone(),
    };
    let Some(slot) = host_map.get(&key) else { return };
    let slot = slot.clone();
    let log_tag = match &poison_prefix {
        Some(_) => format!("{family}, {host}, POISON"),
        None => format!("{family}, {host}"),
    };
    let lookup_host = key.clone();

    probes.spawn(log_tag, timeout, move |ctx| async move {
        let resolved = resolve(family, &lookup_host).await;
        if !ctx.is_cancelled() {
            if let Ok(count) = resolved {
                ctx.log(format!("Got {count} records"));
                *slot.lock().unwrap() = true;
            }
        }
    });
}

/// Resolve `host` restricted to `family` using the host resolver
/// (`tokio::net::lookup_host`, which defers to the system resolver; spec.md
/// §1's "no recursive DNS" Non-goal means only that resolver is consulted,
/// never a hand-rolled recursive one).
async fn resolve(family: Family, host: &str) -> std::io::Result<usize> {
    let addrs = tokio::net::lookup_host((host, 0)).await?;
    let count = addrs
        .filter(|a| match family {
            Family::IPv4 => a.is_ipv4(),
            Family::IPv6 => a.is_ipv6(),
        })
        .count();
    if count == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no records for family"));
    }
    Ok(count)
}
