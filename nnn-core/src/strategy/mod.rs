//! Forwarding strategy dispatch.
//!
//! A [`Forwarder`] owns the tables in a [`Context`] and a strategy. Every
//! received PDU fires the `In` trace point and is then handed to the matching
//! handler of [`ForwardingStrategy`]. Handlers act only through the context:
//! [`Context::send`] fires `Out` and queues the encoded unit,
//! [`Context::drop_pdu`] fires `Drop`. Trace sinks observe, they never steer.

pub mod best_route;

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::buffer::PduBuffer;
use crate::face::FaceId;
use crate::fib::{Fib, FibError, FibObserver};
use crate::name::{Name, SharedName};
use crate::nnpt::{LeaseError, LeaseObserver, Nnpt};
use crate::pdu::{
    AckEnrollment, DataObject, DataUnit, DeniedEnrollment, Enrollment, NullPdu, Pdu, PduError,
    Rename, RequestEnrollment, Solicitation,
};

pub use best_route::BestRoute;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TracePoint {
    /// Just before a unit leaves on a face.
    Out,
    /// Just after a unit arrived on a face.
    In,
    /// The unit was discarded.
    Drop,
}

impl fmt::Display for TracePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TracePoint::Out => "out",
            TracePoint::In => "in",
            TracePoint::Drop => "drop",
        })
    }
}

pub type TraceSink = Box<dyn FnMut(TracePoint, &Pdu, FaceId) + Send>;

/// Fan-out of trace events to every connected sink.
#[derive(Default)]
pub struct Tracer {
    sinks: Vec<TraceSink>,
}

impl Tracer {
    pub fn connect<F>(&mut self, sink: F)
    where
        F: FnMut(TracePoint, &Pdu, FaceId) + Send + 'static,
    {
        self.sinks.push(Box::new(sink));
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn fire(&mut self, point: TracePoint, pdu: &Pdu, face: FaceId) {
        trace!("{point} {} on {face}", pdu.kind());
        for sink in &mut self.sinks {
            sink(point, pdu, face);
        }
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// Tables, known faces and pending output seen by strategy handlers.
#[derive(Debug, Default)]
pub struct Context {
    pub fib: Fib,
    pub nnpt: Nnpt,
    pub buffer: PduBuffer,
    tracer: Tracer,
    faces: BTreeSet<FaceId>,
    outbox: Vec<(FaceId, Vec<u8>)>,
    now: Duration,
}

impl Context {
    pub fn new(fib: Fib, nnpt: Nnpt, buffer: PduBuffer) -> Self {
        Self {
            fib,
            nnpt,
            buffer,
            tracer: Tracer::default(),
            faces: BTreeSet::new(),
            outbox: Vec::new(),
            now: Duration::ZERO,
        }
    }

    /// Time of the event being handled, as supplied by the scheduler.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn has_face(&self, face: FaceId) -> bool {
        self.faces.contains(&face)
    }

    pub fn faces(&self) -> impl Iterator<Item = FaceId> + '_ {
        self.faces.iter().copied()
    }

    pub fn tracer_mut(&mut self) -> &mut Tracer {
        &mut self.tracer
    }

    /// Queue `pdu` for transmission on `face`. A unit for an unknown face is
    /// dropped instead.
    pub fn send(&mut self, face: FaceId, pdu: impl Into<Pdu>) {
        let pdu = pdu.into();
        if !self.has_face(face) {
            warn!("Dropping {pdu}: {face} is not up");
            self.tracer.fire(TracePoint::Drop, &pdu, face);
            return;
        }
        self.tracer.fire(TracePoint::Out, &pdu, face);
        self.outbox.push((face, pdu.encode()));
    }

    /// Discard `pdu`, which arrived on or was meant for `face`.
    pub fn drop_pdu(&mut self, face: FaceId, pdu: impl Into<Pdu>) {
        let pdu = pdu.into();
        debug!("Dropping {pdu} ({face})");
        self.tracer.fire(TracePoint::Drop, &pdu, face);
    }

    /// Encoded units sent since the last call, in send order.
    pub fn take_outbox(&mut self) -> Vec<(FaceId, Vec<u8>)> {
        std::mem::take(&mut self.outbox)
    }
}

/// Event handlers of a forwarding strategy. Every method defaults to a no-op.
///
/// FIB and lease notifications arrive through the [`FibObserver`] and
/// [`LeaseObserver`] supertraits.
#[allow(unused_variables)]
pub trait ForwardingStrategy: FibObserver + LeaseObserver {
    fn on_so(&mut self, ctx: &mut Context, face: FaceId, pdu: Solicitation) {}

    fn on_do(&mut self, ctx: &mut Context, face: FaceId, pdu: DataObject) {}

    fn on_null(&mut self, ctx: &mut Context, face: FaceId, pdu: NullPdu) {}

    fn on_en(&mut self, ctx: &mut Context, face: FaceId, pdu: Enrollment) {}

    fn on_aen(&mut self, ctx: &mut Context, face: FaceId, pdu: AckEnrollment) {}

    fn on_ren(&mut self, ctx: &mut Context, face: FaceId, pdu: RequestEnrollment) {}

    fn on_den(&mut self, ctx: &mut Context, face: FaceId, pdu: DeniedEnrollment) {}

    fn on_inf(&mut self, ctx: &mut Context, face: FaceId, pdu: Rename) {}

    fn on_du(&mut self, ctx: &mut Context, face: FaceId, pdu: DataUnit) {}

    /// A face came up.
    fn add_face(&mut self, ctx: &mut Context, face: FaceId) {}

    /// A face is going down. Its routes are purged right after this returns.
    fn remove_face(&mut self, ctx: &mut Context, face: FaceId) {}

    /// Units buffered for `destination` may have become deliverable.
    fn on_destination_reachable(&mut self, ctx: &mut Context, destination: &SharedName) {}
}

/// Drives a strategy with received PDUs and table changes.
#[derive(Debug)]
pub struct Forwarder<S> {
    ctx: Context,
    strategy: S,
    next_retransmission: Duration,
}

impl<S: ForwardingStrategy> Forwarder<S> {
    pub fn new(ctx: Context, strategy: S) -> Self {
        Self {
            ctx,
            strategy,
            next_retransmission: Duration::ZERO,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn strategy_mut(&mut self) -> &mut S {
        &mut self.strategy
    }

    pub fn connect_trace<F>(&mut self, sink: F)
    where
        F: FnMut(TracePoint, &Pdu, FaceId) + Send + 'static,
    {
        self.ctx.tracer.connect(sink);
    }

    /// Dispatch a PDU received on `face` at `now`.
    pub fn receive(&mut self, now: Duration, face: FaceId, pdu: Pdu) {
        self.ctx.now = now;
        self.ctx.tracer.fire(TracePoint::In, &pdu, face);

        let ctx = &mut self.ctx;
        let strategy = &mut self.strategy;
        match pdu {
            Pdu::So(p) => strategy.on_so(ctx, face, p),
            Pdu::Do(p) => strategy.on_do(ctx, face, p),
            Pdu::Null(p) => strategy.on_null(ctx, face, p),
            Pdu::En(p) => strategy.on_en(ctx, face, p),
            Pdu::Aen(p) => strategy.on_aen(ctx, face, p),
            Pdu::Ren(p) => strategy.on_ren(ctx, face, p),
            Pdu::Den(p) => strategy.on_den(ctx, face, p),
            Pdu::Inf(p) => strategy.on_inf(ctx, face, p),
            Pdu::Du(p) => strategy.on_du(ctx, face, p),
        }
    }

    /// Decode a transportable unit and dispatch it.
    pub fn receive_bytes(&mut self, now: Duration, face: FaceId, data: &[u8]) -> Result<(), PduError> {
        let pdu = Pdu::decode(data)?;
        self.receive(now, face, pdu);
        Ok(())
    }

    pub fn add_face(&mut self, face: FaceId) {
        if self.ctx.faces.insert(face) {
            debug!("{face} up");
        }
        self.strategy.add_face(&mut self.ctx, face);
    }

    /// Take `face` down and purge it from the FIB. Returns the number of FIB
    /// entries erased because `face` was their last next hop.
    pub fn remove_face(&mut self, face: FaceId) -> usize {
        self.strategy.remove_face(&mut self.ctx, face);
        self.ctx.faces.remove(&face);
        debug!("{face} down");
        self.ctx.fib.remove_face_observed(face, &mut self.strategy)
    }

    pub fn add_route(
        &mut self,
        prefix: impl Into<SharedName>,
        face: FaceId,
        metric: i32,
    ) -> Result<(), FibError> {
        let prefix = prefix.into();
        self.ctx
            .fib
            .add_observed(prefix.clone(), face, metric, &mut self.strategy)?;
        // units may be queued under a name that has since been renamed into
        // the new prefix
        let covered: Vec<SharedName> = self
            .ctx
            .buffer
            .pending()
            .into_iter()
            .filter(|destination| prefix.is_prefix_of(&self.ctx.nnpt.resolve(destination)))
            .collect();
        for destination in covered {
            self.strategy
                .on_destination_reachable(&mut self.ctx, &destination);
        }
        Ok(())
    }

    pub fn remove_route(&mut self, prefix: &Name) -> bool {
        self.ctx
            .fib
            .remove_observed(prefix, &mut self.strategy)
            .is_some()
    }

    /// Bind `old_name` to `new_name` until `lease_expiry`.
    pub fn add_lease(
        &mut self,
        old_name: impl Into<SharedName>,
        new_name: impl Into<SharedName>,
        lease_expiry: Duration,
        renew_at: Option<Duration>,
    ) -> Result<(), LeaseError> {
        let old_name = old_name.into();
        self.ctx.nnpt.add_observed(
            old_name.clone(),
            new_name,
            lease_expiry,
            renew_at,
            &mut self.strategy,
        )?;
        if self.ctx.buffer.queue_size(&old_name) > 0 {
            self.strategy
                .on_destination_reachable(&mut self.ctx, &old_name);
        }
        Ok(())
    }

    pub fn remove_lease(&mut self, old_name: &Name) -> bool {
        self.ctx
            .nnpt
            .remove_observed(old_name, &mut self.strategy)
            .is_some()
    }

    /// Expire leases at `now`. Returns the number of removed bindings.
    pub fn clean_expired(&mut self, now: Duration) -> usize {
        self.ctx.now = now;
        self.ctx
            .nnpt
            .clean_expired(now, &mut self.strategy)
            .len()
    }

    /// Retry every buffered destination once per retransmission interval of
    /// the buffer. Calls before the interval has elapsed do nothing. Returns
    /// the number of units that left the buffer.
    pub fn retransmit(&mut self, now: Duration) -> usize {
        self.ctx.now = now;
        if now < self.next_retransmission {
            return 0;
        }
        self.next_retransmission = now.saturating_add(self.ctx.buffer.retransmission());

        let pending = self.ctx.buffer.pending();
        let queued = |ctx: &Context| -> usize {
            pending
                .iter()
                .map(|destination| ctx.buffer.queue_size(destination))
                .sum()
        };
        let before = queued(&self.ctx);
        for destination in &pending {
            self.strategy
                .on_destination_reachable(&mut self.ctx, destination);
        }
        let released = before.saturating_sub(queued(&self.ctx));
        if released > 0 {
            debug!("Retransmission at {now:?} released {released} unit(s)");
        }
        released
    }

    pub fn take_outbox(&mut self) -> Vec<(FaceId, Vec<u8>)> {
        self.ctx.take_outbox()
    }
}
