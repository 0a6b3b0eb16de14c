use std::fmt;
use std::time::Duration;

use nnn_core::strategy::best_route::StrategyStats;
use nnn_core::{BestRoute, FaceId, Forwarder, Name, NextHop, Pdu};
use serde::Serialize;

/// Snapshot of a node's tables after a run.
#[derive(Debug, Serialize)]
pub struct Report {
    pub node: String,
    pub at_secs: f64,
    pub expired: usize,
    pub routes: Vec<RouteReport>,
    pub leases: Vec<LeaseReport>,
    pub queues: Vec<QueueReport>,
    pub lookups: Vec<LookupReport>,
    pub sent: Vec<SentReport>,
    pub stats: StrategyStats,
}

#[derive(Debug, Serialize)]
pub struct RouteReport {
    pub prefix: String,
    pub next_hops: Vec<NextHop>,
}

#[derive(Debug, Serialize)]
pub struct LeaseReport {
    pub old: String,
    pub new: String,
    pub lease_expiry_secs: f64,
    pub renew_at_secs: f64,
    pub due_for_renewal: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueReport {
    pub destination: String,
    pub pending: usize,
}

#[derive(Debug, Serialize)]
pub struct LookupReport {
    pub name: String,
    /// Name after following renames; equal to `name` when none apply.
    pub resolved: String,
    pub prefix: Option<String>,
    pub face: Option<FaceId>,
    pub metric: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct SentReport {
    pub face: FaceId,
    pub kind: String,
    pub destination: Option<String>,
    pub bytes: usize,
}

impl Report {
    pub fn collect(
        node: &Name,
        at: Duration,
        expired: usize,
        forwarder: &Forwarder<BestRoute>,
        lookups: &[Name],
        sent: &[(FaceId, Vec<u8>)],
    ) -> Self {
        let ctx = forwarder.context();

        let routes = ctx
            .fib
            .iter()
            .map(|entry| RouteReport {
                prefix: entry.prefix().to_string(),
                next_hops: entry.next_hops().to_vec(),
            })
            .collect();

        let leases = ctx
            .nnpt
            .iter_by_lease()
            .map(|entry| LeaseReport {
                old: entry.old_name().to_string(),
                new: entry.new_name().to_string(),
                lease_expiry_secs: entry.lease_expiry().as_secs_f64(),
                renew_at_secs: entry.renew_at().as_secs_f64(),
                due_for_renewal: entry.needs_renewal(at),
            })
            .collect();

        let queues = ctx
            .buffer
            .queues()
            .map(|queue| QueueReport {
                destination: queue.destination().to_string(),
                pending: queue.len(),
            })
            .collect();

        let lookups = lookups
            .iter()
            .map(|name| lookup(forwarder, name))
            .collect();

        let sent = sent
            .iter()
            .map(|(face, bytes)| {
                let pdu = Pdu::decode(bytes).ok();
                SentReport {
                    face: *face,
                    kind: pdu
                        .as_ref()
                        .map_or_else(|| "?".to_string(), |pdu| pdu.kind().to_string()),
                    destination: pdu
                        .as_ref()
                        .and_then(Pdu::destination)
                        .map(|dst| dst.to_string()),
                    bytes: bytes.len(),
                }
            })
            .collect();

        Self {
            node: node.to_string(),
            at_secs: at.as_secs_f64(),
            expired,
            routes,
            leases,
            queues,
            lookups,
            sent,
            stats: forwarder.strategy().stats(),
        }
    }
}

fn lookup(forwarder: &Forwarder<BestRoute>, name: &Name) -> LookupReport {
    let ctx = forwarder.context();

    let resolved = ctx.nnpt.resolve(&name.clone().into_shared());

    let entry = ctx.fib.peek_longest_prefix_match(&resolved);
    let best = entry.and_then(|entry| entry.best());
    LookupReport {
        name: name.to_string(),
        resolved: resolved.to_string(),
        prefix: entry.map(|entry| entry.prefix().to_string()),
        face: best.map(|hop| hop.face),
        metric: best.map(|hop| hop.metric),
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "node {} at {}s", self.node, self.at_secs)?;
        if self.expired > 0 {
            writeln!(f, "expired {} lease(s)", self.expired)?;
        }

        writeln!(f, "FIB ({} entries)", self.routes.len())?;
        for route in &self.routes {
            write!(f, "  {}", route.prefix)?;
            for hop in &route.next_hops {
                write!(f, "  {}(metric {}, {:?})", hop.face, hop.metric, hop.status)?;
            }
            writeln!(f)?;
        }

        writeln!(f, "NNPT ({} leases)", self.leases.len())?;
        for lease in &self.leases {
            write!(
                f,
                "  {} -> {} lease={}s renew={}s",
                lease.old, lease.new, lease.lease_expiry_secs, lease.renew_at_secs
            )?;
            if lease.due_for_renewal {
                f.write_str(" (renew due)")?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Buffer ({} destinations)", self.queues.len())?;
        for queue in &self.queues {
            writeln!(f, "  {} pending={}", queue.destination, queue.pending)?;
        }

        if !self.lookups.is_empty() {
            writeln!(f, "Lookups")?;
            for lookup in &self.lookups {
                write!(f, "  {}", lookup.name)?;
                if lookup.resolved != lookup.name {
                    write!(f, " -> {}", lookup.resolved)?;
                }
                match (&lookup.prefix, lookup.face, lookup.metric) {
                    (Some(prefix), Some(face), Some(metric)) => {
                        writeln!(f, " via {face} (prefix {prefix}, metric {metric})")?
                    }
                    (Some(prefix), _, _) => writeln!(f, " no usable hop under {prefix}")?,
                    _ => writeln!(f, " unreachable")?,
                }
            }
        }

        if !self.sent.is_empty() {
            writeln!(f, "Sent")?;
            for sent in &self.sent {
                write!(f, "  {} {}", sent.face, sent.kind)?;
                if let Some(dst) = &sent.destination {
                    write!(f, " -> {dst}")?;
                }
                writeln!(f, " ({} bytes)", sent.bytes)?;
            }
        }

        write!(
            f,
            "forwarded={} buffered={} flushed={} dropped={}",
            self.stats.forwarded, self.stats.buffered, self.stats.flushed, self.stats.dropped
        )
    }
}
