//! End-to-end scenarios from spec.md §8, exercised through the public
//! API: a [`Leaf`] pair joined by a [`LocalConnection`], rather than
//! poking terminal cores directly the way the unit tests under `src/`
//! do. These confirm the endpoint/connection/terminal wiring works
//! together, not just each piece in isolation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use yogi::connection::LocalConnection;
use yogi::endpoint::{Leaf, Node};
use yogi::runtime::scheduler::Scheduler;
use yogi::signal::registry::SignalRegistry;
use yogi::signal::Signal;
use yogi::terminal::operation::ContinuationDecision;
use yogi::terminal::TerminalCore;
use yogi::timer::Timer;
use yogi::{Encoding, ErrorKind, Message, Path, Signature, TerminalVariant};

fn leaf_pair(sched: &Scheduler) -> (Leaf, Leaf, Arc<LocalConnection>) {
    let a = Leaf::new(sched.clone(), Path::new("/a").unwrap());
    let b = Leaf::new(sched.clone(), Path::new("/b").unwrap());
    let conn = LocalConnection::new(Arc::clone(a.core()), Arc::clone(b.core()));
    (a, b, conn)
}

/// Scenario 1: two leaves on one scheduler, connected locally, each
/// owning a `PublishSubscribe "T"`. Receiver arms `receive_message`.
/// Sender publishes `[1, 2, 3]`. The receiver's handler fires with
/// `Success, [1, 2, 3]`.
#[test]
fn scenario_1_plain_publish_subscribe() {
    let sched = Scheduler::new();
    let (a, b, _conn) = leaf_pair(&sched);
    let sig = Signature::new(0x0000_d007);

    let sender_id = a
        .create_terminal("T", TerminalVariant::PublishSubscribe, sig, 8)
        .unwrap();
    let receiver_id = b
        .create_terminal("T", TerminalVariant::PublishSubscribe, sig, 8)
        .unwrap();

    let TerminalCore::PubSub(receiver) = b.core().get_terminal(receiver_id).unwrap().core else {
        panic!("expected pub/sub core");
    };
    let got = Arc::new(Mutex::new(None));
    let got2 = Arc::clone(&got);
    receiver
        .receive_message(move |res| {
            let (msg, cached) = res.unwrap();
            *got2.lock().unwrap() = Some((msg.into_payload(), cached));
        })
        .unwrap();

    let TerminalCore::PubSub(sender) = a.core().get_terminal(sender_id).unwrap().core else {
        panic!("expected pub/sub core");
    };
    sender
        .publish(Message::new(sig, Encoding::Raw, vec![1, 2, 3]))
        .unwrap();
    sched.poll();

    let (payload, cached) = got.lock().unwrap().take().unwrap();
    assert_eq!(payload, vec![1, 2, 3]);
    assert!(!cached);
}

/// Scenario 2: cached variant. Sender publishes before the connection
/// exists (seeding the cache via `try_publish`, since `publish` fails
/// `NotBound` with nobody to deliver to yet). Once connected, the
/// receiver's first message is tagged `cached = true`; a second publish
/// afterwards is tagged `cached = false`.
#[test]
fn scenario_2_cached_publish_subscribe_replays_then_goes_live() {
    let sched = Scheduler::new();
    let sig = Signature::new(0x0000_d007);
    let a = Leaf::new(sched.clone(), Path::new("/a").unwrap());
    let b = Leaf::new(sched.clone(), Path::new("/b").unwrap());

    let sender_id = a
        .create_terminal("T", TerminalVariant::CachedPublishSubscribe, sig, 8)
        .unwrap();
    let TerminalCore::PubSub(sender) = a.core().get_terminal(sender_id).unwrap().core else {
        panic!("expected pub/sub core");
    };
    assert!(!sender
        .try_publish(Message::new(sig, Encoding::Raw, vec![1, 2, 3]))
        .unwrap());

    let receiver_id = b
        .create_terminal("T", TerminalVariant::CachedPublishSubscribe, sig, 8)
        .unwrap();
    let _conn = LocalConnection::new(Arc::clone(a.core()), Arc::clone(b.core()));

    let TerminalCore::PubSub(receiver) = b.core().get_terminal(receiver_id).unwrap().core else {
        panic!("expected pub/sub core");
    };

    let first = Arc::new(Mutex::new(None));
    let first2 = Arc::clone(&first);
    receiver
        .receive_message(move |res| {
            let (msg, cached) = res.unwrap();
            *first2.lock().unwrap() = Some((msg.into_payload(), cached));
        })
        .unwrap();
    sched.poll();
    let (payload, cached) = first.lock().unwrap().take().unwrap();
    assert_eq!(payload, vec![1, 2, 3]);
    assert!(cached);

    let second = Arc::new(Mutex::new(None));
    let second2 = Arc::clone(&second);
    receiver
        .receive_message(move |res| {
            let (msg, cached) = res.unwrap();
            *second2.lock().unwrap() = Some((msg.into_payload(), cached));
        })
        .unwrap();
    sender
        .publish(Message::new(sig, Encoding::Raw, vec![4, 5, 6]))
        .unwrap();
    sched.poll();
    let (payload, cached) = second.lock().unwrap().take().unwrap();
    assert_eq!(payload, vec![4, 5, 6]);
    assert!(!cached);
}

/// Scenario 3: `ScatterGather` between two leaves. Receiver arms
/// `receive_scattered_message`, calls `ignore()`. The initiator's
/// handler fires once with the `Ignored` flag set and returns `Stop`.
#[test]
fn scenario_3_scatter_gather_ignored() {
    let sched = Scheduler::new();
    let (a, b, _conn) = leaf_pair(&sched);
    let sig = Signature::new(1);

    let initiator_id = a
        .create_terminal("SG", TerminalVariant::ScatterGather, sig, 8)
        .unwrap();
    let responder_id = b
        .create_terminal("SG", TerminalVariant::ScatterGather, sig, 8)
        .unwrap();

    let TerminalCore::Operation(responder) = b.core().get_terminal(responder_id).unwrap().core else {
        panic!("expected operation core");
    };
    responder
        .receive_scattered_message(|res| {
            res.unwrap().ignore().unwrap();
        })
        .unwrap();

    let TerminalCore::Operation(initiator) = a.core().get_terminal(initiator_id).unwrap().core else {
        panic!("expected operation core");
    };
    let got = Arc::new(Mutex::new(Vec::new()));
    let got2 = Arc::clone(&got);
    initiator
        .scatter_gather(Message::new(sig, Encoding::Raw, vec![9]), move |res| {
            got2.lock().unwrap().push(res.unwrap().flags);
            ContinuationDecision::Stop
        })
        .unwrap();
    sched.poll();

    let flags = got.lock().unwrap().clone();
    assert_eq!(flags.len(), 1);
    assert!(flags[0].contains(yogi::terminal::GatherFlags::IGNORED));
}

/// Scenario 4: Request/response. Client sends `"Hello"`; Service
/// responds with a MessagePack-encoded `[1, 2, 3]`. The client's
/// handler fires with the `Finished` flag and the exact response bytes.
#[test]
fn scenario_4_request_response_round_trip() {
    let sched = Scheduler::new();
    let (a, b, _conn) = leaf_pair(&sched);
    let sig = Signature::new(7);

    let client_id = a.create_terminal("RPC", TerminalVariant::Client, sig, 8).unwrap();
    let service_id = b.create_terminal("RPC", TerminalVariant::Service, sig, 8).unwrap();

    let TerminalCore::Operation(service) = b.core().get_terminal(service_id).unwrap().core else {
        panic!("expected operation core");
    };
    let response_bytes = rmp_serde::to_vec(&(1i32, 2i32, 3i32)).unwrap();
    let response_bytes_for_service = response_bytes.clone();
    service
        .receive_scattered_message(move |res| {
            let scattered = res.unwrap();
            assert_eq!(scattered.payload().payload(), b"Hello");
            scattered
                .respond(Message::new(sig, Encoding::MsgPack, response_bytes_for_service))
                .unwrap();
        })
        .unwrap();

    let TerminalCore::Operation(client) = a.core().get_terminal(client_id).unwrap().core else {
        panic!("expected operation core");
    };
    let got = Arc::new(Mutex::new(None));
    let got2 = Arc::clone(&got);
    client
        .scatter_gather(Message::new(sig, Encoding::Raw, b"Hello".to_vec()), move |res| {
            let outcome = res.unwrap();
            *got2.lock().unwrap() = Some((outcome.flags, outcome.message.map(|m| m.into_payload())));
            ContinuationDecision::Stop
        })
        .unwrap();
    sched.poll();

    let (flags, payload) = got.lock().unwrap().take().unwrap();
    assert!(flags.contains(yogi::terminal::GatherFlags::FINISHED));
    assert_eq!(payload, Some(response_bytes));
}

/// Scenario 5: a signal set subscribed to `Term | Usr5`. Raising `Term`
/// with `sigarg = 123` fires the pending `await_signal` handler with
/// `(Term, 123)`; the raiser's cleanup runs exactly once.
#[test]
fn scenario_5_signal_raise_and_cleanup() {
    let registry: SignalRegistry<u32> = SignalRegistry::new();
    let set = registry.create_set(Signal::TERM | Signal::USR5);

    let received = Arc::new(Mutex::new(None));
    let received2 = Arc::clone(&received);
    set.await_signal(move |res| {
        *received2.lock().unwrap() = Some(res.unwrap());
    })
    .unwrap();

    let cleanup_calls = Arc::new(Mutex::new(0u32));
    let cleanup_calls2 = Arc::clone(&cleanup_calls);
    registry.raise_signal(Signal::TERM, 123, move |_sigarg| {
        *cleanup_calls2.lock().unwrap() += 1;
    });

    assert_eq!(*received.lock().unwrap(), Some((Signal::TERM, 123)));
    assert_eq!(*cleanup_calls.lock().unwrap(), 1);
}

/// Scenario 6: a timer started with a short duration is cancelled
/// immediately. The handler fires with `Canceled`; a second `cancel()`
/// returns `false` ("nothing to cancel").
#[test]
fn scenario_6_timer_immediate_cancel() {
    let sched = Scheduler::new();
    let timer = Timer::new(sched.clone());

    let got = Arc::new(Mutex::new(None));
    let got2 = Arc::clone(&got);
    timer.start_async(Duration::from_millis(1), move |res| {
        *got2.lock().unwrap() = Some(res.err().map(|e| e.kind()));
    });
    assert!(timer.cancel());
    sched.poll();

    assert_eq!(got.lock().unwrap().take(), Some(Some(ErrorKind::Canceled)));
    assert!(!timer.cancel());
}

/// A `Node`'s known-terminals view stays live across the connection's
/// whole lifetime: a terminal created after the connection attaches
/// still shows up, and tearing the connection down drains it again
/// (spec §4.2).
#[test]
fn node_known_terminals_end_to_end() {
    let sched = Scheduler::new();
    let node = Node::new(sched.clone(), Path::new("/node").unwrap());
    let leaf = Leaf::new(sched, Path::new("/leaf").unwrap());
    let conn = LocalConnection::new(Arc::clone(node.core()), Arc::clone(leaf.core()));
    assert!(node.known_terminals().snapshot().is_empty());

    let id = leaf
        .create_terminal("topic", TerminalVariant::PublishSubscribe, Signature::new(42), 4)
        .unwrap();
    assert_eq!(node.known_terminals().snapshot().len(), 1);

    leaf.destroy_terminal(id).unwrap();
    assert!(node.known_terminals().snapshot().is_empty());

    leaf.create_terminal("topic2", TerminalVariant::PublishSubscribe, Signature::new(43), 4)
        .unwrap();
    assert_eq!(node.known_terminals().snapshot().len(), 1);
    conn.destroy();
    assert!(node.known_terminals().snapshot().is_empty());
}
