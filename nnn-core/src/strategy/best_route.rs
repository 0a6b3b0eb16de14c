//! Reference strategy: forward on the lowest-metric usable next hop.
//!
//! DO and DU destinations are first passed through the lease table, so units
//! for a renamed node follow its new name. Units with no usable route are
//! buffered under their destination and released when a covering route or a
//! lease for that name shows up. Solicitations and new rename notices are
//! flooded to every other face.

use log::{debug, warn};
use serde::Serialize;

use super::{Context, ForwardingStrategy};
use crate::buffer::PduQueue;
use crate::face::FaceId;
use crate::fib::{FibEntry, FibObserver, NextHopStatus};
use crate::name::{Name, SharedName};
use crate::nnpt::{LeaseEntry, LeaseObserver};
use crate::pdu::{DataObject, DataUnit, Pdu, Rename, Solicitation};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StrategyStats {
    pub forwarded: u64,
    pub buffered: u64,
    pub flushed: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Via(FaceId),
    /// Every usable next hop leads back to the arrival face.
    Loop,
    Unreachable,
}

#[derive(Debug, Default)]
pub struct BestRoute {
    stats: StrategyStats,
}

impl BestRoute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StrategyStats {
        self.stats
    }

    fn route(ctx: &mut Context, name: &Name, in_face: Option<FaceId>) -> Route {
        let candidates: Vec<FaceId> = match ctx.fib.longest_prefix_match(name) {
            Some(entry) => entry
                .next_hops()
                .iter()
                .filter(|hop| hop.status != NextHopStatus::Red)
                .map(|hop| hop.face)
                .collect(),
            None => return Route::Unreachable,
        };

        let mut looped = false;
        for face in candidates {
            if Some(face) == in_face {
                looped = true;
            } else if ctx.has_face(face) {
                return Route::Via(face);
            }
        }
        if looped {
            Route::Loop
        } else {
            Route::Unreachable
        }
    }

    fn forward(&mut self, ctx: &mut Context, in_face: FaceId, mut pdu: Pdu) {
        let Some(dst) = pdu.destination().cloned() else {
            ctx.drop_pdu(in_face, pdu);
            return;
        };
        let target = ctx.nnpt.resolve(&dst);
        if target != dst {
            debug!("Readdressing {} for {dst} to {target}", pdu.kind());
            pdu.set_destination(target.clone());
        }

        match Self::route(ctx, &target, Some(in_face)) {
            Route::Via(face) => {
                self.stats.forwarded += 1;
                ctx.send(face, pdu);
            }
            Route::Loop => {
                self.stats.dropped += 1;
                ctx.drop_pdu(in_face, pdu);
            }
            Route::Unreachable => self.buffer(ctx, in_face, target, pdu),
        }
    }

    fn buffer(&mut self, ctx: &mut Context, in_face: FaceId, target: SharedName, pdu: Pdu) {
        let result = ctx.buffer.add_destination(target.clone()).and_then(|evicted| {
            if let Some(queue) = evicted {
                self.discard(ctx, in_face, queue);
            }
            ctx.buffer.push(&target, &pdu)
        });
        match result {
            Ok(()) => {
                self.stats.buffered += 1;
                debug!("No route for {target}, buffered {}", pdu.kind());
            }
            Err(e) => {
                warn!("Cannot buffer {pdu}: {e}");
                self.stats.dropped += 1;
                ctx.drop_pdu(in_face, pdu);
            }
        }
    }

    /// Drop every unit of a queue the buffer gave up to admit another
    /// destination.
    fn discard(&mut self, ctx: &mut Context, in_face: FaceId, queue: PduQueue) {
        let destination = queue.destination().clone();
        for unit in queue.into_units() {
            match Pdu::decode(&unit) {
                Ok(pdu) => {
                    self.stats.dropped += 1;
                    ctx.drop_pdu(in_face, pdu);
                }
                Err(e) => warn!("Discarding corrupt buffered unit for {destination}: {e}"),
            }
        }
    }

    fn flood(&mut self, ctx: &mut Context, in_face: FaceId, pdu: Pdu) {
        let faces: Vec<FaceId> = ctx.faces().filter(|face| *face != in_face).collect();
        if faces.is_empty() {
            self.stats.dropped += 1;
            ctx.drop_pdu(in_face, pdu);
            return;
        }
        for face in faces {
            self.stats.forwarded += 1;
            ctx.send(face, pdu.clone());
        }
    }
}

impl FibObserver for BestRoute {
    fn did_add_fib_entry(&mut self, entry: &FibEntry) {
        debug!("Route to {} installed", entry.prefix());
    }

    fn will_remove_fib_entry(&mut self, entry: &FibEntry) {
        debug!("Route to {} withdrawn", entry.prefix());
    }
}

impl LeaseObserver for BestRoute {
    fn did_add_lease_entry(&mut self, entry: &LeaseEntry) {
        debug!("Lease {entry}");
    }

    fn will_remove_lease_entry(&mut self, entry: &LeaseEntry) {
        debug!("Lease for {} ends", entry.old_name());
    }
}

impl ForwardingStrategy for BestRoute {
    fn add_face(&mut self, ctx: &mut Context, face: FaceId) {
        let pending = ctx.buffer.pending();
        if !pending.is_empty() {
            debug!("{face} up, retrying {} buffered destination(s)", pending.len());
        }
        for destination in pending {
            self.on_destination_reachable(ctx, &destination);
        }
    }

    fn on_so(&mut self, ctx: &mut Context, face: FaceId, pdu: Solicitation) {
        self.flood(ctx, face, pdu.into());
    }

    fn on_do(&mut self, ctx: &mut Context, face: FaceId, pdu: DataObject) {
        self.forward(ctx, face, pdu.into());
    }

    fn on_du(&mut self, ctx: &mut Context, face: FaceId, pdu: DataUnit) {
        self.forward(ctx, face, pdu.into());
    }

    fn on_inf(&mut self, ctx: &mut Context, face: FaceId, pdu: Rename) {
        let expiry = ctx.now().saturating_add(pdu.remaining_lease);
        let known = ctx
            .nnpt
            .find_paired_name_ptr(&pdu.old_name)
            .is_some_and(|new_name| *new_name == pdu.new_name);

        if known {
            // refresh only; neighbours already heard about this rename
            if let Err(e) = ctx.nnpt.update_lease_time(&pdu.old_name, expiry, None) {
                warn!("Lease refresh for {} failed: {e}", pdu.old_name);
            }
            return;
        }

        let added = ctx
            .nnpt
            .add_observed(pdu.old_name.clone(), pdu.new_name.clone(), expiry, None, self)
            .map(|_| ());
        if let Err(e) = added {
            warn!("Rejected rename {} -> {}: {e}", pdu.old_name, pdu.new_name);
            self.stats.dropped += 1;
            ctx.drop_pdu(face, pdu);
            return;
        }

        let old_name = pdu.old_name.clone();
        self.flood(ctx, face, pdu.into());
        self.on_destination_reachable(ctx, &old_name);
    }

    fn on_destination_reachable(&mut self, ctx: &mut Context, destination: &SharedName) {
        if ctx.buffer.queue_size(destination) == 0 {
            return;
        }
        let target = ctx.nnpt.resolve(destination);
        let Route::Via(face) = Self::route(ctx, &target, None) else {
            return;
        };

        let units = ctx
            .buffer
            .remove_destination(destination)
            .map(PduQueue::into_units)
            .unwrap_or_default();
        for unit in units {
            match Pdu::decode(&unit) {
                Ok(mut pdu) => {
                    pdu.set_destination(target.clone());
                    self.stats.flushed += 1;
                    ctx.send(face, pdu);
                }
                Err(e) => warn!("Discarding corrupt buffered unit for {destination}: {e}"),
            }
        }
    }
}
