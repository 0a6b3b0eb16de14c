//! End-to-end behaviour of the forwarding tables and the forwarder.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use nnn_core::pdu::{DataObject, DataUnit, Rename, Solicitation};
use nnn_core::{
    BestRoute, Context, FaceId, Fib, FibError, ForwarderConfig, Forwarder, LeaseError, Name,
    Nnpt, Pdu, PduBuffer, SharedName, TracePoint,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn name(uri: &str) -> Name {
    Name::from_uri(uri)
}

fn shared(uri: &str) -> SharedName {
    name(uri).into_shared()
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[test]
fn test_more_specific_prefix_wins() {
    init_logging();
    let mut fib = Fib::new();
    fib.add(name("/a/b"), FaceId(1), 10).unwrap();

    let entry = fib.longest_prefix_match(&name("/a/b/c")).unwrap();
    assert_eq!(entry.prefix().as_ref(), &name("/a/b"));
    assert_eq!(entry.metric(FaceId(1)), Some(10));

    fib.add(name("/a/b/c"), FaceId(2), 5).unwrap();
    let entry = fib.longest_prefix_match(&name("/a/b/c")).unwrap();
    assert_eq!(entry.best().unwrap().face, FaceId(2));
    assert_eq!(entry.metric(FaceId(2)), Some(5));

    let entry = fib.longest_prefix_match(&name("/a/b/x")).unwrap();
    assert_eq!(entry.best().unwrap().face, FaceId(1));
}

#[test]
fn test_every_route_is_found_exactly_and_by_extension() {
    let mut fib = Fib::new();
    let routes = [("/x", 1, 3), ("/x/y", 2, 1), ("/p/q/r", 3, -4), ("/p", 4, 0)];
    for (prefix, face, metric) in routes {
        fib.add(name(prefix), FaceId(face), metric).unwrap();
    }

    for (prefix, face, metric) in routes {
        assert_eq!(fib.find(&name(prefix)).unwrap().metric(FaceId(face)), Some(metric));
        let extended = name(prefix).child("leaf");
        let entry = fib.longest_prefix_match(&extended).unwrap();
        assert_eq!(entry.metric(FaceId(face)), Some(metric));
    }
    assert!(fib.longest_prefix_match(&name("/nothing")).is_none());
    assert_eq!(fib.add(Name::new(), FaceId(1), 1).unwrap_err(), FibError::EmptyPrefix);
}

#[test]
fn test_remove_face_leaves_no_trace_of_face() {
    let mut fib = Fib::new();
    for (i, prefix) in ["/a", "/a/b", "/a/b/c", "/b", "/c/d", "/c/e"].iter().enumerate() {
        fib.add(name(prefix), FaceId(7), i as i32).unwrap();
        if i % 2 == 0 {
            fib.add(name(prefix), FaceId(8), 0).unwrap();
        }
    }
    let before = fib.len();

    let erased = fib.remove_face(FaceId(7));

    assert_eq!(erased, 3);
    assert_eq!(fib.len(), before - erased);
    assert!(fib.iter().all(|entry| !entry.contains(FaceId(7))));
    assert!(fib.iter().all(|entry| !entry.is_empty()));
}

#[test]
fn test_lease_lifecycle() {
    init_logging();
    let mut nnpt = Nnpt::new();
    nnpt.add_entry(name("/n1"), name("/n2"), secs(100)).unwrap();

    assert!(nnpt.found_old_name(&name("/n1")));
    assert!(nnpt.found_new_name(&name("/n2")));
    assert_eq!(*nnpt.find_paired_name(&name("/n1")).unwrap(), name("/n2"));
    assert_eq!(
        nnpt.add_entry(name("/n1"), name("/n9"), secs(5)).unwrap_err(),
        LeaseError::OldNameBound(name("/n1"))
    );
    assert_eq!(
        nnpt.add_entry(name("/n9"), name("/n2"), secs(5)).unwrap_err(),
        LeaseError::NewNameBound(name("/n2"))
    );

    assert!(nnpt.clean_expired(secs(50), &mut ()).is_empty());
    assert!(nnpt.found_old_name(&name("/n1")));

    assert_eq!(nnpt.clean_expired(secs(150), &mut ()).len(), 1);
    assert!(!nnpt.found_old_name(&name("/n1")));
    assert!(!nnpt.found_new_name(&name("/n2")));
    assert!(nnpt.is_empty());
}

#[test]
fn test_update_lease_time_keeps_pairing() {
    let mut nnpt = Nnpt::new();
    nnpt.add_entry(name("/a"), name("/a2"), secs(10)).unwrap();
    nnpt.add_entry(name("/b"), name("/b2"), secs(20)).unwrap();

    nnpt.update_lease_time(&name("/a"), secs(30), Some(secs(25))).unwrap();

    assert_eq!(*nnpt.find_paired_name(&name("/a")).unwrap(), name("/a2"));
    assert_eq!(nnpt.find_entry(&name("/a")).unwrap().renew_at(), secs(25));
    assert_eq!(nnpt.clean_expired(secs(20), &mut ()).len(), 1);
    assert!(nnpt.found_old_name(&name("/a")));
}

#[test]
fn test_sweep_is_exact_and_idempotent() {
    let mut nnpt = Nnpt::new();
    for i in 1..=10u64 {
        nnpt.add_entry(
            name(&format!("/old/{i}")),
            name(&format!("/new/{i}")),
            secs(i * 10),
        )
        .unwrap();
    }

    let removed = nnpt.clean_expired(secs(45), &mut ());
    assert_eq!(removed.len(), 4);
    assert!(removed.iter().all(|entry| entry.lease_expiry() <= secs(45)));
    assert!(nnpt.iter().all(|entry| entry.lease_expiry() > secs(45)));
    assert!(nnpt.clean_expired(secs(45), &mut ()).is_empty());
}

#[test]
fn test_buffer_round_trip_in_push_order() {
    let mut buffer = PduBuffer::default();
    let dst = shared("/n1");
    buffer.add_destination(dst.clone()).unwrap();
    assert_eq!(buffer.queue_size(&dst), 0);

    let units = [
        Pdu::from(Solicitation::new(shared("/me"), vec![1])),
        Pdu::from(DataObject::new(dst.clone(), vec![2])),
        Pdu::from(DataUnit::new(shared("/me"), dst.clone(), vec![3])),
    ];
    for unit in &units {
        buffer.push(&dst, unit).unwrap();
    }
    assert_eq!(buffer.queue_size(&dst), 3);

    let popped: Vec<Pdu> = buffer
        .pop_queue(&dst)
        .unwrap()
        .iter()
        .map(|bytes| Pdu::decode(bytes).unwrap())
        .collect();
    assert_eq!(popped, units);
    assert_eq!(buffer.queue_size(&dst), 0);
}

#[test]
fn test_mobility_handoff_through_forwarder() {
    init_logging();
    let config = ForwarderConfig::default();
    let mut forwarder = Forwarder::new(config.build_context().unwrap(), BestRoute::new());

    let trace = Arc::new(Mutex::new(Vec::new()));
    let sink = trace.clone();
    forwarder.connect_trace(move |point, pdu, face| {
        sink.lock().unwrap().push((point, pdu.kind(), face));
    });

    for face in 1..=3 {
        forwarder.add_face(FaceId(face));
    }
    forwarder.add_route(shared("/net/a"), FaceId(2), 10).unwrap();

    // traffic for the mobile node under its old name
    forwarder.receive(secs(1), FaceId(1), DataObject::new(shared("/net/a/host"), vec![1]).into());
    assert_eq!(forwarder.take_outbox().len(), 1);

    // the node moves: its new name sits behind face 3
    forwarder.add_route(shared("/net/b"), FaceId(3), 10).unwrap();
    let rename = Rename::new(shared("/net/a/host"), shared("/net/b/host"), secs(60));
    forwarder.receive(secs(2), FaceId(2), rename.into());
    forwarder.take_outbox();

    forwarder.receive(secs(3), FaceId(1), DataObject::new(shared("/net/a/host"), vec![2]).into());
    let out = forwarder.take_outbox();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].0, FaceId(3));
    assert_eq!(
        Pdu::decode(&out[0].1).unwrap().destination().unwrap().as_ref(),
        &name("/net/b/host")
    );

    // once the lease runs out the old name routes normally again
    assert_eq!(forwarder.clean_expired(secs(62)), 1);
    forwarder.receive(secs(63), FaceId(1), DataObject::new(shared("/net/a/host"), vec![3]).into());
    assert_eq!(forwarder.take_outbox()[0].0, FaceId(2));

    let trace = trace.lock().unwrap();
    let ins = trace.iter().filter(|(point, _, _)| *point == TracePoint::In).count();
    assert_eq!(ins, 4);
    assert!(trace.iter().all(|(point, _, _)| *point != TracePoint::Drop));
}

#[test]
fn test_face_down_purges_routes_and_buffers_traffic() {
    let mut forwarder = Forwarder::new(Context::default(), BestRoute::new());
    forwarder.add_face(FaceId(1));
    forwarder.add_face(FaceId(2));
    forwarder.add_route(shared("/dst"), FaceId(2), 1).unwrap();

    assert_eq!(forwarder.remove_face(FaceId(2)), 1);
    assert!(forwarder.context().fib.is_empty());

    forwarder.receive(secs(0), FaceId(1), DataObject::new(shared("/dst/x"), vec![]).into());
    assert!(forwarder.take_outbox().is_empty());
    assert_eq!(forwarder.context().buffer.queue_size(&name("/dst/x")), 1);

    forwarder.add_face(FaceId(2));
    forwarder.add_route(shared("/dst"), FaceId(2), 1).unwrap();
    assert_eq!(forwarder.take_outbox().len(), 1);
    assert_eq!(forwarder.strategy().stats().flushed, 1);
}
