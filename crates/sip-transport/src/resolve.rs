//! Next-hop resolution per RFC 3263.
//!
//! The actual DNS traffic lives behind [`RecordSource`]; this module
//! only implements the candidate ordering: NAPTR records sorted by
//! order then preference pick the SRV names to try, SRV records drain
//! priority tier by priority tier with the RFC 2782 weighted-random
//! ordering inside a tier, and plain addresses are the last resort.
//!
//! [`resolve`] hands back a lazy iterator. Nothing is queried until a
//! hop is demanded, each SRV name is fetched only once the previous
//! name's hops are used up, and a drained iterator stays drained.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::mem;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tracing::trace;

use siprail_sip_core::{Scheme, Uri};

use crate::transport::TransportKind;

/// Resolved next-hop candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
}

impl Hop {
    pub fn new(host: impl Into<String>, port: u16, transport: TransportKind) -> Self {
        Hop {
            host: host.into(),
            port,
            transport,
        }
    }
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.transport)
    }
}

/// NAPTR record as handed over by the DNS collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaptrRecord {
    pub order: u16,
    pub preference: u16,
    /// Service field, e.g. "SIP+D2U"
    pub service: String,
    /// SRV name to continue with
    pub replacement: String,
}

impl NaptrRecord {
    /// Transport named by the service field (RFC 3263 section 4.1),
    /// or None for services this stack does not speak
    pub fn transport(&self) -> Option<TransportKind> {
        let service = self.service.to_ascii_uppercase();
        if service.contains("SIPS+D2T") {
            Some(TransportKind::Tls)
        } else if service.contains("SIP+D2T") {
            Some(TransportKind::Tcp)
        } else if service.contains("SIP+D2U") {
            Some(TransportKind::Udp)
        } else if service.contains("SIP+D2W") || service.contains("SIPS+D2W") {
            Some(TransportKind::Ws)
        } else {
            None
        }
    }
}

/// SRV record as handed over by the DNS collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

/// DNS lookup boundary. Implementations return whatever records the
/// name has, empty when there are none; errors are indistinguishable
/// from empty on purpose, the iterator just moves to the next phase.
pub trait RecordSource: Send + Sync {
    fn naptr(&self, domain: &str) -> Vec<NaptrRecord>;
    fn srv(&self, name: &str) -> Vec<SrvRecord>;
    fn addresses(&self, host: &str) -> Vec<IpAddr>;
}

/// Starts RFC 3263 resolution for a request URI.
///
/// Transport preference comes from the URI: an explicit
/// `;transport=` parameter wins, sips forces TLS, everything else
/// tries UDP then TCP. A numeric host short-circuits to a single hop
/// and an explicit port skips NAPTR/SRV entirely, both per RFC 3263
/// section 4.
pub fn resolve(uri: &Uri, source: Arc<dyn RecordSource>) -> HopIter {
    let sips = uri.scheme == Scheme::Sips;
    let preferred = if let Some(t) = uri.transport_param() {
        match t.parse::<TransportKind>() {
            Ok(kind) => vec![kind],
            Err(_) => vec![TransportKind::Udp],
        }
    } else if sips {
        vec![TransportKind::Tls]
    } else {
        vec![TransportKind::Udp, TransportKind::Tcp]
    };

    HopIter {
        source,
        domain: uri.host.clone(),
        explicit_port: uri.port,
        default_transport: preferred[0],
        preferred,
        sips,
        srv_yielded: false,
        phase: Phase::Start,
    }
}

enum Phase {
    Start,
    Srv {
        lookups: VecDeque<(String, TransportKind)>,
        ready: VecDeque<Hop>,
    },
    Addresses(VecDeque<Hop>),
    Done,
}

/// Lazy, finite, non-restartable hop sequence
pub struct HopIter {
    source: Arc<dyn RecordSource>,
    domain: String,
    explicit_port: Option<u16>,
    default_transport: TransportKind,
    preferred: Vec<TransportKind>,
    sips: bool,
    srv_yielded: bool,
    phase: Phase,
}

impl Iterator for HopIter {
    type Item = Hop;

    fn next(&mut self) -> Option<Hop> {
        loop {
            match mem::replace(&mut self.phase, Phase::Done) {
                Phase::Start => {
                    if self.domain.parse::<IpAddr>().is_ok() {
                        let port = self
                            .explicit_port
                            .unwrap_or_else(|| self.default_transport.default_port());
                        return Some(Hop::new(self.domain.clone(), port, self.default_transport));
                    }
                    if let Some(port) = self.explicit_port {
                        self.phase = Phase::Addresses(self.address_hops(port));
                        continue;
                    }
                    self.phase = Phase::Srv {
                        lookups: self.plan_srv_lookups(),
                        ready: VecDeque::new(),
                    };
                }
                Phase::Srv { mut lookups, mut ready } => {
                    if let Some(hop) = ready.pop_front() {
                        self.srv_yielded = true;
                        self.phase = Phase::Srv { lookups, ready };
                        return Some(hop);
                    }
                    if let Some((name, transport)) = lookups.pop_front() {
                        trace!(srv = %name, "Fetching SRV records");
                        let ready = expand_srv(self.source.srv(&name), transport);
                        self.phase = Phase::Srv { lookups, ready };
                        continue;
                    }
                    if self.srv_yielded {
                        return None;
                    }
                    let port = self.default_transport.default_port();
                    self.phase = Phase::Addresses(self.address_hops(port));
                }
                Phase::Addresses(mut hops) => match hops.pop_front() {
                    Some(hop) => {
                        self.phase = Phase::Addresses(hops);
                        return Some(hop);
                    }
                    None => return None,
                },
                Phase::Done => return None,
            }
        }
    }
}

impl HopIter {
    /// NAPTR guidance sorted by order then preference; without NAPTR,
    /// SRV names constructed for the preferred transports
    fn plan_srv_lookups(&self) -> VecDeque<(String, TransportKind)> {
        let mut guided: Vec<(NaptrRecord, TransportKind)> = self
            .source
            .naptr(&self.domain)
            .into_iter()
            .filter_map(|r| r.transport().map(|t| (r, t)))
            .collect();
        if guided.is_empty() {
            return self
                .preferred
                .iter()
                .map(|&t| (srv_name(&self.domain, t, self.sips), t))
                .collect();
        }
        guided.sort_by_key(|(r, _)| (r.order, r.preference));
        guided
            .into_iter()
            .map(|(r, t)| (r.replacement.trim_end_matches('.').to_string(), t))
            .collect()
    }

    fn address_hops(&self, port: u16) -> VecDeque<Hop> {
        self.source
            .addresses(&self.domain)
            .into_iter()
            .map(|ip| Hop::new(ip.to_string(), port, self.default_transport))
            .collect()
    }
}

fn srv_name(domain: &str, transport: TransportKind, sips: bool) -> String {
    let service = match transport {
        TransportKind::Tls => "_sips",
        _ if sips => "_sips",
        _ => "_sip",
    };
    let proto = match transport {
        TransportKind::Udp => "_udp",
        _ => "_tcp",
    };
    format!("{service}.{proto}.{domain}")
}

fn expand_srv(records: Vec<SrvRecord>, transport: TransportKind) -> VecDeque<Hop> {
    let mut tiers: BTreeMap<u16, Vec<SrvRecord>> = BTreeMap::new();
    for record in records {
        tiers.entry(record.priority).or_default().push(record);
    }
    let mut hops = VecDeque::new();
    for (_, tier) in tiers {
        for record in order_by_weight(tier) {
            let target = record.target.trim_end_matches('.').to_string();
            hops.push_back(Hop::new(target, record.port, transport));
        }
    }
    hops
}

/// RFC 2782 weighted ordering within one priority tier: draw below the
/// weight sum, take the first record whose cumulative weight exceeds
/// the draw, repeat with the remainder. All-zero weights degrade to a
/// uniform pick.
fn order_by_weight(mut records: Vec<SrvRecord>) -> Vec<SrvRecord> {
    let mut rng = rand::thread_rng();
    let mut ordered = Vec::with_capacity(records.len());
    while !records.is_empty() {
        let total: u32 = records.iter().map(|r| u32::from(r.weight)).sum();
        let idx = if total == 0 {
            rng.gen_range(0..records.len())
        } else {
            let pick = rng.gen_range(0..total);
            let mut cumulative = 0u32;
            records
                .iter()
                .position(|r| {
                    cumulative += u32::from(r.weight);
                    cumulative > pick
                })
                .unwrap_or(0)
        };
        ordered.push(records.remove(idx));
    }
    ordered
}

/// Record source with canned answers, for tests and static routing.
/// Every lookup is appended to a query log so callers can assert what
/// was (and was not) asked.
#[derive(Default)]
pub struct StaticSource {
    naptr: HashMap<String, Vec<NaptrRecord>>,
    srv: HashMap<String, Vec<SrvRecord>>,
    addresses: HashMap<String, Vec<IpAddr>>,
    log: Mutex<Vec<String>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_naptr(mut self, domain: impl Into<String>, records: Vec<NaptrRecord>) -> Self {
        self.naptr.insert(domain.into(), records);
        self
    }

    pub fn with_srv(mut self, name: impl Into<String>, records: Vec<SrvRecord>) -> Self {
        self.srv.insert(name.into(), records);
        self
    }

    pub fn with_addresses(mut self, host: impl Into<String>, addrs: Vec<IpAddr>) -> Self {
        self.addresses.insert(host.into(), addrs);
        self
    }

    /// Every query issued so far, in order, as "kind name" strings
    pub fn query_log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

impl RecordSource for StaticSource {
    fn naptr(&self, domain: &str) -> Vec<NaptrRecord> {
        self.log.lock().push(format!("naptr {domain}"));
        self.naptr.get(domain).cloned().unwrap_or_default()
    }

    fn srv(&self, name: &str) -> Vec<SrvRecord> {
        self.log.lock().push(format!("srv {name}"));
        self.srv.get(name).cloned().unwrap_or_default()
    }

    fn addresses(&self, host: &str) -> Vec<IpAddr> {
        self.log.lock().push(format!("a {host}"));
        self.addresses.get(host).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srv(priority: u16, weight: u16, port: u16, target: &str) -> SrvRecord {
        SrvRecord {
            priority,
            weight,
            port,
            target: target.into(),
        }
    }

    fn naptr(order: u16, preference: u16, service: &str, replacement: &str) -> NaptrRecord {
        NaptrRecord {
            order,
            preference,
            service: service.into(),
            replacement: replacement.into(),
        }
    }

    #[test]
    fn numeric_host_is_its_own_single_hop() {
        let source = Arc::new(StaticSource::new());
        let uri: Uri = "sip:192.0.2.5".parse().unwrap();
        let hops: Vec<Hop> = resolve(&uri, source.clone()).collect();
        assert_eq!(hops, vec![Hop::new("192.0.2.5", 5060, TransportKind::Udp)]);
        assert!(source.query_log().is_empty(), "numeric hosts need no DNS");
    }

    #[test]
    fn sips_numeric_host_gets_tls_and_5061() {
        let source = Arc::new(StaticSource::new());
        let uri: Uri = "sips:192.0.2.5".parse().unwrap();
        let hops: Vec<Hop> = resolve(&uri, source).collect();
        assert_eq!(hops, vec![Hop::new("192.0.2.5", 5061, TransportKind::Tls)]);
    }

    #[test]
    fn explicit_port_skips_naptr_and_srv() {
        let source = Arc::new(
            StaticSource::new()
                .with_addresses("proxy.example.com", vec!["192.0.2.1".parse().unwrap()]),
        );
        let uri: Uri = "sip:proxy.example.com:5080".parse().unwrap();
        let hops: Vec<Hop> = resolve(&uri, source.clone()).collect();
        assert_eq!(hops, vec![Hop::new("192.0.2.1", 5080, TransportKind::Udp)]);
        assert_eq!(source.query_log(), vec!["a proxy.example.com"]);
    }

    #[test]
    fn naptr_order_then_preference_drives_srv_order() {
        let source = Arc::new(
            StaticSource::new()
                .with_naptr(
                    "example.com",
                    vec![
                        naptr(10, 20, "SIP+D2T", "_sip._tcp.example.com"),
                        naptr(5, 50, "SIPS+D2T", "_sips._tcp.example.com"),
                        naptr(10, 10, "SIP+D2U", "_sip._udp.example.com"),
                    ],
                )
                .with_srv("_sips._tcp.example.com", vec![srv(10, 1, 5061, "tls.example.com")])
                .with_srv("_sip._udp.example.com", vec![srv(10, 1, 5060, "udp.example.com")])
                .with_srv("_sip._tcp.example.com", vec![srv(10, 1, 5060, "tcp.example.com")]),
        );
        let uri: Uri = "sip:example.com".parse().unwrap();
        let hops: Vec<Hop> = resolve(&uri, source).collect();
        assert_eq!(
            hops,
            vec![
                Hop::new("tls.example.com", 5061, TransportKind::Tls),
                Hop::new("udp.example.com", 5060, TransportKind::Udp),
                Hop::new("tcp.example.com", 5060, TransportKind::Tcp),
            ]
        );
    }

    #[test]
    fn srv_priority_tiers_drain_low_priority_first() {
        let source = Arc::new(StaticSource::new().with_srv(
            "_sip._udp.example.com",
            vec![
                srv(20, 1, 5062, "backup.example.com"),
                srv(10, 1, 5060, "primary.example.com"),
            ],
        ));
        let uri: Uri = "sip:example.com".parse().unwrap();
        let hops: Vec<Hop> = resolve(&uri, source).collect();
        assert_eq!(hops[0].host, "primary.example.com");
        assert_eq!(hops[1].host, "backup.example.com");
    }

    #[test]
    fn weighted_ordering_prefers_heavy_records() {
        let mut first_high = 0;
        for _ in 0..1_000 {
            let ordered = order_by_weight(vec![
                srv(10, 100, 5060, "high"),
                srv(10, 1, 5060, "low"),
            ]);
            if ordered[0].target == "high" {
                first_high += 1;
            }
        }
        // Roughly 100:1 odds; far more than a coin flip either way
        assert!(first_high > 900, "high picked first only {first_high}/1000");
    }

    #[test]
    fn all_zero_weights_still_order_everything() {
        let ordered = order_by_weight(vec![
            srv(10, 0, 5060, "a"),
            srv(10, 0, 5060, "b"),
            srv(10, 0, 5060, "c"),
        ]);
        assert_eq!(ordered.len(), 3);
    }

    #[test]
    fn falls_back_to_addresses_when_srv_is_empty() {
        let source = Arc::new(
            StaticSource::new()
                .with_addresses("example.com", vec!["192.0.2.7".parse().unwrap()]),
        );
        let uri: Uri = "sip:example.com".parse().unwrap();
        let hops: Vec<Hop> = resolve(&uri, source.clone()).collect();
        assert_eq!(hops, vec![Hop::new("192.0.2.7", 5060, TransportKind::Udp)]);
        // UDP and TCP SRV names were both tried before the A fallback
        assert_eq!(
            source.query_log(),
            vec![
                "naptr example.com",
                "srv _sip._udp.example.com",
                "srv _sip._tcp.example.com",
                "a example.com",
            ]
        );
    }

    #[test]
    fn transport_parameter_narrows_the_srv_plan() {
        let source = Arc::new(StaticSource::new().with_srv(
            "_sip._tcp.example.com",
            vec![srv(10, 1, 5060, "tcp.example.com")],
        ));
        let uri: Uri = "sip:example.com;transport=tcp".parse().unwrap();
        let hops: Vec<Hop> = resolve(&uri, source.clone()).collect();
        assert_eq!(hops, vec![Hop::new("tcp.example.com", 5060, TransportKind::Tcp)]);
        assert_eq!(
            source.query_log(),
            vec!["naptr example.com", "srv _sip._tcp.example.com"]
        );
    }

    #[test]
    fn queries_happen_only_when_hops_are_demanded() {
        let source = Arc::new(
            StaticSource::new()
                .with_srv(
                    "_sip._udp.example.com",
                    vec![srv(10, 1, 5060, "udp.example.com")],
                )
                .with_srv(
                    "_sip._tcp.example.com",
                    vec![srv(10, 1, 5060, "tcp.example.com")],
                ),
        );
        let uri: Uri = "sip:example.com".parse().unwrap();
        let mut hops = resolve(&uri, source.clone());
        assert!(source.query_log().is_empty(), "nothing asked before first next()");

        let first = hops.next().unwrap();
        assert_eq!(first.host, "udp.example.com");
        assert_eq!(
            source.query_log(),
            vec!["naptr example.com", "srv _sip._udp.example.com"],
            "the TCP lookup must wait until the UDP hops run out"
        );

        let second = hops.next().unwrap();
        assert_eq!(second.host, "tcp.example.com");
        assert_eq!(source.query_log().len(), 3);
    }

    #[test]
    fn a_drained_iterator_stays_drained() {
        let source = Arc::new(StaticSource::new());
        let uri: Uri = "sip:192.0.2.5".parse().unwrap();
        let mut hops = resolve(&uri, source);
        assert!(hops.next().is_some());
        assert!(hops.next().is_none());
        assert!(hops.next().is_none());
    }

    #[test]
    fn naptr_service_field_mapping() {
        assert_eq!(
            naptr(0, 0, "SIPS+D2T", "x").transport(),
            Some(TransportKind::Tls)
        );
        assert_eq!(
            naptr(0, 0, "SIP+D2T", "x").transport(),
            Some(TransportKind::Tcp)
        );
        assert_eq!(
            naptr(0, 0, "SIP+D2U", "x").transport(),
            Some(TransportKind::Udp)
        );
        assert_eq!(
            naptr(0, 0, "SIP+D2W", "x").transport(),
            Some(TransportKind::Ws)
        );
        assert_eq!(naptr(0, 0, "E2U+sip", "x").transport(), None);
    }
}
