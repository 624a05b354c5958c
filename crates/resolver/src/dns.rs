//! SRV resolution over the system DNS configuration.

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::error::ResolveErrorKind;
use rand::Rng;
use tracing::debug;

use crate::ResolveError;
use crate::types::{RecordResolver, ResolveFuture, SrvTarget};

/// Resolves SRV records through hickory's async resolver.
///
/// Answers with a single target chosen the way SRV consumers are expected
/// to: only the lowest-priority group is considered, and the pick within it
/// is random, weighted by the records' weight fields.
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    /// Creates a resolver from the system configuration
    /// (`/etc/resolv.conf` on unix).
    pub fn from_system_conf() -> Result<Self, ResolveError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| ResolveError::Config(format!("failed to read system DNS config: {e}")))?;
        Ok(Self { resolver })
    }
}

impl From<TokioAsyncResolver> for DnsResolver {
    fn from(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }
}

impl RecordResolver for DnsResolver {
    fn lookup<'a>(&'a self, host: &'a str) -> ResolveFuture<'a> {
        Box::pin(async move {
            let lookup = match self.resolver.srv_lookup(host).await {
                Ok(l) => l,
                Err(e) => {
                    if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) {
                        debug!(%host, "no SRV records published");
                        return Ok(None);
                    }
                    return Err(ResolveError::Lookup(e.to_string()));
                }
            };

            let candidates: Vec<Candidate> = lookup
                .iter()
                .filter_map(|srv| {
                    let target = srv.target().to_utf8();
                    let host = target.trim_end_matches('.');
                    // A root target means the service is decidedly absent.
                    if host.is_empty() {
                        return None;
                    }
                    Some(Candidate {
                        priority: srv.priority(),
                        weight: srv.weight(),
                        target: SrvTarget::new(host, srv.port()),
                    })
                })
                .collect();

            let picked = select_target(candidates);
            if let Some(t) = &picked {
                debug!(%host, target = %t.host, port = t.port, "resolved SRV target");
            }
            Ok(picked)
        })
    }
}

/// An SRV record reduced to the fields selection cares about.
#[derive(Debug, Clone)]
struct Candidate {
    priority: u16,
    weight: u16,
    target: SrvTarget,
}

/// Picks one target: lowest-priority group only, weighted random within it.
///
/// When every weight in the group is zero the pick is uniform.
fn select_target(candidates: Vec<Candidate>) -> Option<SrvTarget> {
    let best = candidates.iter().map(|c| c.priority).min()?;
    let group: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| c.priority == best)
        .collect();

    let total: u32 = group.iter().map(|c| u32::from(c.weight)).sum();
    let mut rng = rand::thread_rng();

    if total == 0 {
        let idx = rng.gen_range(0..group.len());
        return Some(group[idx].target.clone());
    }

    let mut roll = rng.gen_range(0..total);
    for candidate in &group {
        let weight = u32::from(candidate.weight);
        if roll < weight {
            return Some(candidate.target.clone());
        }
        roll -= weight;
    }
    // Unreachable: roll < total and the weights sum to total.
    group.last().map(|c| c.target.clone())
}
