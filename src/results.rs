//! Result trees (SPEC_FULL.md §3).
//!
//! Each group owns a strongly typed result tree; the scheduler only ever
//! sees the `GroupResults` enum variant for a tag (REDESIGN FLAGS:
//! "heterogeneous result trees ... tagged variants per group"). Downstream
//! groups pattern-match the variant of the upstream tag they depend on.
//!
//! Leaves are `Arc<Mutex<T>>` rather than bare values: one probe task and,
//! after it has been joined, the summarizer are the only two holders that
//! ever touch a given leaf, and they never touch it concurrently (probes
//! run to completion or are abandoned before `join_all` returns), but a
//! leaf still needs to cross the `'static` boundary of `tokio::spawn`,
//! which a borrowed `&mut` cannot do. The mutex is never contended in
//! practice; it is the safe stand-in for the spec's "slots never alias"
//! argument.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type Slot<T> = Arc<Mutex<T>>;

pub fn slot<T>(value: T) -> Slot<T> {
    Arc::new(Mutex::new(value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    IPv4,
    IPv6,
}

impl Family {
    pub const ALL: [Family; 2] = [Family::IPv4, Family::IPv6];
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Family::IPv4 => write!(f, "IPv4"),
            Family::IPv6 => write!(f, "IPv6"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub const ALL: [Protocol; 2] = [Protocol::Tcp, Protocol::Udp];
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

/// Either a family never made it past the skip check ("not routable" per
/// spec.md §3 invariant (a)), or it survived and carries group-specific
/// per-probe data.
#[derive(Debug, Clone)]
pub enum FamilyOutcome<T> {
    Unroutable,
    Data(T),
}

impl<T> FamilyOutcome<T> {
    pub fn data(&self) -> Option<&T> {
        match self {
            FamilyOutcome::Data(d) => Some(d),
            FamilyOutcome::Unroutable => None,
        }
    }
}

// ---------------------------------------------------------------- Route

#[derive(Debug, Clone)]
pub struct ProtocolResults {
    pub tcp: Slot<bool>,
    pub udp: Slot<bool>,
}

impl ProtocolResults {
    pub fn default_false() -> Self {
        Self { tcp: slot(false), udp: slot(false) }
    }

    pub fn get(&self, protocol: Protocol) -> &Slot<bool> {
        match protocol {
            Protocol::Tcp => &self.tcp,
            Protocol::Udp => &self.udp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteResults {
    pub ipv4: ProtocolResults,
    pub ipv6: ProtocolResults,
}

impl RouteResults {
    pub fn default_all_false() -> Self {
        Self { ipv4: ProtocolResults::default_false(), ipv6: ProtocolResults::default_false() }
    }

    pub fn family(&self, family: Family) -> &ProtocolResults {
        match family {
            Family::IPv4 => &self.ipv4,
            Family::IPv6 => &self.ipv6,
        }
    }
}

// ------------------------------------------------------------------ DNS

pub type DnsHostMap = HashMap<String, Slot<bool>>;

#[derive(Debug, Clone)]
pub struct DnsResults {
    pub ipv4: FamilyOutcome<DnsHostMap>,
    pub ipv6: FamilyOutcome<DnsHostMap>,
    /// This run's poison-probe prefix (spec.md §4.4), fixed once by
    /// `should_skip` so the same prefix is used to populate the host map's
    /// poison keys and to resolve them later in `spawn`/`summarize`. Empty
    /// until a family survives long enough to need one.
    pub poison_prefix: String,
}

impl DnsResults {
    pub fn default_unroutable() -> Self {
        Self { ipv4: FamilyOutcome::Unroutable, ipv6: FamilyOutcome::Unroutable, poison_prefix: String::new() }
    }

    pub fn family(&self, family: Family) -> &FamilyOutcome<DnsHostMap> {
        match family {
            Family::IPv4 => &self.ipv4,
            Family::IPv6 => &self.ipv6,
        }
    }

    pub fn family_mut(&mut self, family: Family) -> &mut FamilyOutcome<DnsHostMap> {
        match family {
            Family::IPv4 => &mut self.ipv4,
            Family::IPv6 => &mut self.ipv6,
        }
    }
}

// ------------------------------------------------------------------ TCP

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpOutcome {
    Timeout,
    Error,
    Connected,
}

/// port -> addr -> outcome
pub type TcpPortMap = HashMap<u16, HashMap<String, Slot<TcpOutcome>>>;

#[derive(Debug, Clone)]
pub struct TcpResults {
    pub ipv4: FamilyOutcome<TcpPortMap>,
    pub ipv6: FamilyOutcome<TcpPortMap>,
}

impl TcpResults {
    pub fn default_unroutable() -> Self {
        Self { ipv4: FamilyOutcome::Unroutable, ipv6: FamilyOutcome::Unroutable }
    }

    pub fn family(&self, family: Family) -> &FamilyOutcome<TcpPortMap> {
        match family {
            Family::IPv4 => &self.ipv4,
            Family::IPv6 => &self.ipv6,
        }
    }

    pub fn family_mut(&mut self, family: Family) -> &mut FamilyOutcome<TcpPortMap> {
        match family {
            Family::IPv4 => &mut self.ipv4,
            Family::IPv6 => &mut self.ipv6,
        }
    }
}

// ------------------------------------------------------------------ TLS

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SniStrategy {
    None,
    Allow,
    Block,
    Frag,
}

impl SniStrategy {
    pub const ALL: [SniStrategy; 4] =
        [SniStrategy::None, SniStrategy::Allow, SniStrategy::Block, SniStrategy::Frag];
}

impl std::fmt::Display for SniStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SniStrategy::None => write!(f, "none"),
            SniStrategy::Allow => write!(f, "allow"),
            SniStrategy::Block => write!(f, "block"),
            SniStrategy::Frag => write!(f, "frag"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsOutcome {
    Timeout,
    Error,
    Success,
}

pub type TlsStrategyMap = HashMap<SniStrategy, Slot<TlsOutcome>>;

#[derive(Debug, Clone)]
pub struct TlsResults {
    pub ipv4: FamilyOutcome<TlsStrategyMap>,
    pub ipv6: FamilyOutcome<TlsStrategyMap>,
}

impl TlsResults {
    pub fn default_unroutable() -> Self {
        Self { ipv4: FamilyOutcome::Unroutable, ipv6: FamilyOutcome::Unroutable }
    }

    pub fn family(&self, family: Family) -> &FamilyOutcome<TlsStrategyMap> {
        match family {
            Family::IPv4 => &self.ipv4,
            Family::IPv6 => &self.ipv6,
        }
    }

    pub fn family_mut(&mut self, family: Family) -> &mut FamilyOutcome<TlsStrategyMap> {
        match family {
            Family::IPv4 => &mut self.ipv4,
            Family::IPv6 => &mut self.ipv6,
        }
    }
}

// -------------------------------------------------------------- Registry

/// A group's result tree, tagged by which group produced it.
#[derive(Debug, Clone)]
pub enum GroupResults {
    Route(RouteResults),
    Dns(DnsResults),
    Tcp(TcpResults),
    Tls(TlsResults),
}

impl GroupResults {
    pub fn as_route(&self) -> Option<&RouteResults> {
        match self {
            GroupResults::Route(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_dns(&self) -> Option<&DnsResults> {
        match self {
            GroupResults::Dns(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_tcp(&self) -> Option<&TcpResults> {
        match self {
            GroupResults::Tcp(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_tls(&self) -> Option<&TlsResults> {
        match self {
            GroupResults::Tls(r) => Some(r),
            _ => None,
        }
    }
}

/// The shared registry threaded through the scheduler: tag -> that group's
/// frozen result tree. Read-only once a group has finished, per spec.md §3.
pub type GlobalResults = HashMap<String, GroupResults>;
