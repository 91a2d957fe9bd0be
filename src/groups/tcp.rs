//! TCP Group (spec.md §4.5): TCP handshake tests on configured ports
//! against allow/block IP lists.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tokio::net::TcpStream;

use crate::colors::{censors_string, result_icon};
use crate::config::GlobalConfig;
use crate::group::TestGroup;
use crate::probe::ProbeSet;
use crate::results::{slot, Family, FamilyOutcome, GlobalResults, GroupResults, Protocol, TcpOutcome, TcpPortMap, TcpResults};

#[derive(Debug, Clone, Deserialize)]
pub struct TcpHostList {
    pub allow: Vec<String>,
    pub block: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TcpAddrs {
    #[serde(rename = "IPv4")]
    pub ipv4: TcpHostList,
    #[serde(rename = "IPv6")]
    pub ipv6: TcpHostList,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TcpConfig {
    pub ports: Vec<u16>,
    pub addrs: TcpAddrs,
    pub timeout: f64,
}

impl TcpAddrs {
    fn family(&self, family: Family) -> &TcpHostList {
        match family {
            Family::IPv4 => &self.ipv4,
            Family::IPv6 => &self.ipv6,
        }
    }
}

pub struct TcpGroup;

impl TestGroup for TcpGroup {
    fn tag(&self) -> &'static str {
        "TCP"
    }

    fn prereqs(&self) -> &'static [&'static str] {
        &["Route"]
    }

    fn default_results(&self) -> GroupResults {
        GroupResults::Tcp(TcpResults::default_unroutable())
    }

    fn should_skip(
        &self,
        defaults: GroupResults,
        config: &GlobalConfig,
        upstream: &GlobalResults,
    ) -> (GroupResults, Option<String>) {
        let mut tcp = match defaults {
            GroupResults::Tcp(t) => t,
            other => return (other, Some("internal error: expected Tcp results".to_string())),
        };
        let route = upstream.get("Route").and_then(|r| r.as_route());
        let family_routable =
            |family: Family| -> bool { route.map(|r| *r.family(family).get(Protocol::Tcp).lock().unwrap()).unwrap_or(false) };

        if !Family::ALL.iter().any(|&f| family_routable(f)) {
            return (GroupResults::Tcp(tcp), Some("no routable TCP networks".to_string()));
        }

        // `GlobalConfig::validate` rejects a malformed "TCP" section before
        // the scheduler ever runs, so `Err` can't reach here; `None` just
        // means the tag was never enabled.
        let cfg: Option<TcpConfig> = match config.group("TCP") {
            Some(Ok(c)) => Some(c),
            _ => None,
        };
        for family in Family::ALL {
            if !family_routable(family) {
                continue;
            }
            let mut port_map: TcpPortMap = HashMap::new();
            if let Some(cfg) = &cfg {
                let hosts = cfg.addrs.family(family);
                for &port in &cfg.ports {
                    let mut addr_map: HashMap<String, _> = HashMap::new();
                    for addr in hosts.allow.iter().chain(hosts.block.iter()) {
                        addr_map.insert(addr.clone(), slot(TcpOutcome::Timeout));
                    }
                    port_map.insert(port, addr_map);
                }
            }
            *tcp.family_mut(family) = FamilyOutcome::Data(port_map);
        }
        (GroupResults::Tcp(tcp), None)
    }

    fn spawn(&self, config: &GlobalConfig, results: &GroupResults, probes: &mut ProbeSet) {
        let tcp_results = results.as_tcp().expect("TCP group always produces TcpResults");
        // See the `should_skip` note above: `Err` is ruled out by upfront
        // validation, `None` means disabled.
        let cfg: TcpConfig = match config.group("TCP") {
            Some(Ok(c)) => c,
            _ => return,
        };
        let timeout = Duration::from_secs_f64(cfg.timeout);

        for family in Family::ALL {
            let Some(port_map) = tcp_results.family(family).data() else { continue };
            let hosts = cfg.addrs.family(family);

            for &port in &cfg.ports {
                let Some(addr_map) = port_map.get(&port) else { continue };
                for addr in hosts.allow.iter().chain(hosts.block.iter()) {
                    let Some(slot) = addr_map.get(addr) else { continue };
                    let slot = slot.clone();
                    let addr = addr.clone();
                    probes.spawn(format!("{family}, {addr}:{port}"), timeout, move |ctx| async move {
                        let connect = TcpStream::connect((addr.as_str(), port));
                        tokio::select! {
                            res = connect => {
                                if !ctx.is_cancelled() {
                                    let outcome = match res {
                                        Ok(_) => {
                                            ctx.log("Connected");
                                            TcpOutcome::Connected
                                        }
                                        Err(e) => {
                                            ctx.log(format!("Failed with exception: {e}"));
                                            TcpOutcome::Error
                                        }
                                    };
                                    *slot.lock().unwrap() = outcome;
                                }
                            }
                            _ = ctx.cancelled() => {}
                        }
                    });
                }
            }
        }
    }

    fn summarize(&self, results: &GroupResults, config: &GlobalConfig) -> String {
        let tcp = results.as_tcp().expect("TCP group always produces TcpResults");
        // Same invariant as `spawn`: a malformed section can't reach here.
        let cfg: TcpConfig = match config.group("TCP") {
            Some(Ok(c)) => c,
            _ => return String::new(),
        };

        let mut out = String::new();
        for family in Family::ALL {
            let Some(port_map) = tcp.family(family).data() else { continue };
            let hosts = cfg.addrs.family(family);
            out.push_str(&format!("{family}:\n"));

            for &port in &cfg.ports {
                let Some(addr_map) = port_map.get(&port) else { continue };

                let allow_total = hosts.allow.len();
                let allow_ok = hosts.allow.iter().filter(|a| outcome(addr_map, a) == Some(TcpOutcome::Connected)).count();
                let icon = if allow_total == 0 || allow_ok == allow_total {
                    result_icon(Some(true), None)
                } else if allow_ok == 0 {
                    result_icon(Some(false), None)
                } else {
                    result_icon(None, Some(&format!("connected {allow_ok}/{allow_total}")))
                };
                out.push_str(&format!("  port {port}: {icon}\n"));

                let block_total = hosts.block.len();
                let timeouts = hosts.block.iter().filter(|a| outcome(addr_map, a) == Some(TcpOutcome::Timeout)).count();
                let errors = hosts.block.iter().filter(|a| outcome(addr_map, a) == Some(TcpOutcome::Error)).count();
                let mut censors = Vec::new();
                if timeouts > 0 {
                    censors.push(format!("Blocked TCP:{port} handshake timeouts: {timeouts}/{block_total} timeouts"));
                }
                if errors > 0 {
                    censors.push(format!("Blocked TCP:{port} handshake errors: {errors}/{block_total} errors"));
                }
                out.push_str(&censors_string(&censors));
            }
        }
        out
    }
}

fn outcome(addr_map: &HashMap<String, crate::results::Slot<TcpOutcome>>, addr: &str) -> Option<TcpOutcome> {
    addr_map.get(addr).map(|slot| *slot.lock().unwrap())
}
