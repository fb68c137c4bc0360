//! Integration Tests for the Propagation Engine
//!
//! These tests verify that sources, combinators, transactions and observers
//! work together correctly.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::time::Duration;

use parking_lot::Mutex;

use cascade_core::{
    Continuation, Domain, EventSource, Events, EventValue, NodeKind, Observer, PropagationError,
    TransactionError, UsageError,
};

/// Attach an observer that records every batch of events it sees.
fn record<E: EventValue>(domain: &Domain, events: &Events<E>) -> (Observer, Arc<Mutex<Vec<Vec<E>>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let observer = domain
        .observe(events, move |events: &[E], _| {
            sink.lock().push(events.to_vec());
        })
        .unwrap();
    (observer, seen)
}

/// Source -> Filter(x > 0) -> Transform(x * 2).
#[test]
fn filter_then_transform() {
    let domain = Domain::new();
    let source = domain.source::<i32>();
    let positive = domain.filter(&source, |x| *x > 0).unwrap();
    let doubled = domain.transform(&positive, |x| x * 2).unwrap();
    let (_observer, seen) = record(&domain, &doubled);

    let report = domain.emit(&source, -1).unwrap();
    assert!(seen.lock().is_empty());
    // The source and the filter fired; the transform had no input.
    assert_eq!(report.nodes_evaluated, 2);

    let report = domain.emit(&source, 3).unwrap();
    assert_eq!(*seen.lock(), vec![vec![6]]);
    assert_eq!(report.nodes_evaluated, 3);

    assert!(domain.current_events(&doubled).unwrap().is_empty());
}

/// Two emissions in one scope propagate in a single pass.
#[test]
fn batched_merge_runs_one_pass() {
    let domain = Domain::new();
    let s1 = domain.source::<i32>();
    let s2 = domain.source::<i32>();
    let merged = domain.merge(&[s1.events(), s2.events()]).unwrap();
    let (_observer, seen) = record(&domain, &merged);

    let report = domain
        .transaction(|tx| {
            tx.emit(&s1, 1)?;
            tx.emit(&s2, 2)?;
            Ok(())
        })
        .unwrap();

    assert_eq!(report.passes, 1);
    assert_eq!(report.inputs, 2);
    assert_eq!(*seen.lock(), vec![vec![1, 2]]);
}

/// Merge order follows declaration order, not emission order.
#[test]
fn merge_order_is_stable() {
    let domain = Domain::new();
    let p1 = domain.source::<&'static str>();
    let p2 = domain.source::<&'static str>();
    let merged = domain.merge(&[p1.events(), p2.events()]).unwrap();
    let (_observer, seen) = record(&domain, &merged);

    let mut tx = domain.begin();
    tx.emit(&p2, "b").unwrap();
    tx.emit(&p1, "a").unwrap();
    tx.commit().unwrap();

    assert_eq!(*seen.lock(), vec![vec!["a", "b"]]);
}

/// A node downstream of a diamond fires once, after both branches.
#[test]
fn diamond_is_glitch_free() {
    let domain = Domain::new();
    let source = domain.source::<i32>();
    let plus_one = domain.transform(&source, |x| x + 1).unwrap();
    let times_ten = domain.transform(&source, |x| x * 10).unwrap();
    let joined = domain.merge(&[&plus_one, &times_ten]).unwrap();

    let evaluations = Arc::new(AtomicUsize::new(0));
    let counter = evaluations.clone();
    let summed = domain
        .transform(&joined, move |x| {
            counter.fetch_add(1, Ordering::SeqCst);
            *x
        })
        .unwrap();
    let (_observer, seen) = record(&domain, &summed);

    let report = domain.emit(&source, 4).unwrap();

    // Each of the two events reaching `summed` is mapped exactly once.
    assert_eq!(evaluations.load(Ordering::SeqCst), 2);
    assert_eq!(*seen.lock(), vec![vec![5, 40]]);
    assert_eq!(report.nodes_evaluated, 5);
    assert_eq!(report.observers_notified, 1);
}

/// Filter keeps exactly the matching subsequence, in order.
#[test]
fn filter_keeps_matching_subsequence() {
    let domain = Domain::new();
    let source = domain.source::<u32>();
    let odd = domain.filter(&source, |x| x % 2 == 1).unwrap();
    let (_observer, seen) = record(&domain, &odd);

    domain
        .transaction(|tx| {
            for x in [4, 1, 1, 8, 3, 6, 5] {
                tx.emit(&source, x)?;
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(*seen.lock(), vec![vec![1, 1, 3, 5]]);
}

/// A transform may change the event type.
#[test]
fn transform_changes_type() {
    let domain = Domain::new();
    let source = domain.source::<u8>();
    let labels = domain
        .transform(&source, |b| format!("byte {b:#04x}"))
        .unwrap();
    let lengths = domain.transform(&labels, |s: &String| s.len()).unwrap();
    let (_labels_observer, seen_labels) = record(&domain, &labels);
    let (_lengths_observer, seen_lengths) = record(&domain, &lengths);

    domain.emit(&source, 10).unwrap();

    assert_eq!(*seen_labels.lock(), vec![vec!["byte 0x0a".to_string()]]);
    assert_eq!(*seen_lengths.lock(), vec![vec![9]]);
    assert_eq!(lengths.kind(), NodeKind::Transform);
}

/// A failing mapping aborts the whole transaction.
#[test]
fn failing_transform_aborts_transaction() {
    let domain = Domain::new();
    let source = domain.source::<i32>();
    let checked = domain
        .try_transform(&source, |x| {
            if *x < 0 {
                Err(format!("negative input {x}"))
            } else {
                Ok(*x)
            }
        })
        .unwrap();
    let (_source_observer, seen_source) = record(&domain, &source);
    let (_checked_observer, seen_checked) = record(&domain, &checked);

    let err = domain
        .transaction(|tx| {
            tx.emit(&source, 1)?;
            tx.emit(&source, -2)?;
            tx.emit(&source, 3)?;
            Ok(())
        })
        .unwrap_err();

    assert_eq!(err.failed_node(), Some(checked.id()));
    assert!(matches!(
        err,
        TransactionError::Propagation(PropagationError::Evaluation {
            kind: NodeKind::Transform,
            ..
        })
    ));
    assert!(err.to_string().contains("negative input -2"));

    // Nothing from the aborted transaction is observable.
    assert!(seen_source.lock().is_empty());
    assert!(seen_checked.lock().is_empty());
    assert!(domain.current_events(&source).unwrap().is_empty());
    assert!(domain.current_events(&checked).unwrap().is_empty());

    // The domain keeps working.
    domain.emit(&source, 5).unwrap();
    assert_eq!(*seen_checked.lock(), vec![vec![5]]);
}

/// A failing predicate aborts the transaction as well.
#[test]
fn failing_predicate_aborts_transaction() {
    let domain = Domain::new();
    let source = domain.source::<Option<i32>>();
    let present = domain
        .try_filter(&source, |x| x.map(|v| v > 0).ok_or("missing value"))
        .unwrap();
    let (_observer, seen) = record(&domain, &present);

    let err = domain.emit(&source, None).unwrap_err();
    assert_eq!(err.failed_node(), Some(present.id()));
    assert!(seen.lock().is_empty());

    domain.emit(&source, Some(2)).unwrap();
    assert_eq!(*seen.lock(), vec![vec![Some(2)]]);
}

/// Events never leak from one transaction into the next.
#[test]
fn transactions_are_isolated() {
    let domain = Domain::new();
    let source = domain.source::<i32>();
    let (_observer, seen) = record(&domain, &source);

    domain.emit(&source, 1).unwrap();
    assert!(domain.current_events(&source).unwrap().is_empty());
    domain.emit(&source, 2).unwrap();

    assert_eq!(*seen.lock(), vec![vec![1], vec![2]]);
}

/// Intermediate handles may be dropped; downstream nodes keep them alive.
#[test]
fn downstream_handles_keep_upstream_alive() {
    let domain = Domain::new();
    let source = domain.source::<i32>();
    let doubled = domain
        .transform(&domain.filter(&source, |x| *x != 0).unwrap(), |x| x * 2)
        .unwrap();
    let (observer, seen) = record(&domain, &doubled);

    let report = domain.emit(&source, 2).unwrap();
    assert_eq!(report.nodes_evaluated, 3);
    assert_eq!(*seen.lock(), vec![vec![4]]);

    // Once every handle is gone the chain is no longer evaluated.
    drop(observer);
    drop(doubled);
    let report = domain.emit(&source, 2).unwrap();
    assert_eq!(report.nodes_evaluated, 1);
}

/// Emitting through a released weak source is reported, not dropped.
#[test]
fn released_source_is_reported() {
    let domain = Domain::new();
    let source = domain.source::<i32>();
    let weak = source.downgrade();
    let id = source.id();
    drop(source);

    let err = domain.emit(&weak, 1).unwrap_err();
    assert!(matches!(
        err,
        TransactionError::Usage(UsageError::SourceReleased { node }) if node == id
    ));
}

/// Observers feeding back into the graph run in the same commit.
#[test]
fn observer_feedback_is_absorbed() {
    let domain = Domain::new();
    let orders = domain.source::<u32>();
    let audit = domain.source::<String>();
    let both = domain
        .merge(&[
            &domain.transform(&orders, |n| format!("order {n}")).unwrap(),
            audit.events(),
        ])
        .unwrap();
    let (_observer, seen) = record(&domain, &both);

    let audit_sink = audit.downgrade();
    let _auditor = domain
        .observe(&orders, move |orders: &[u32], cont| {
            let total: u32 = orders.iter().sum();
            cont.emit(&audit_sink, format!("total {total}")).unwrap();
        })
        .unwrap();

    let report = domain
        .transaction(|tx| {
            tx.emit(&orders, 2)?;
            tx.emit(&orders, 5)?;
            Ok(())
        })
        .unwrap();

    assert_eq!(report.passes, 2);
    assert_eq!(
        *seen.lock(),
        vec![
            vec!["order 2".to_string(), "order 5".to_string()],
            vec!["total 7".to_string()],
        ]
    );
}

/// Commits from several threads are serialized and none is lost.
#[test]
fn concurrent_commits_are_serialized() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 50;

    let domain = Domain::new();
    let left = domain.source::<usize>();
    let right = domain.source::<usize>();
    let merged = domain.merge(&[left.events(), right.events()]).unwrap();

    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let batches = Arc::new(Mutex::new(Vec::new()));
    let _observer = {
        let busy = busy.clone();
        let overlaps = overlaps.clone();
        let batches = batches.clone();
        domain
            .observe(&merged, move |events: &[usize], _| {
                if busy.swap(true, Ordering::SeqCst) {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                batches.lock().push(events.to_vec());
                busy.store(false, Ordering::SeqCst);
            })
            .unwrap()
    };

    std::thread::scope(|scope| {
        for thread in 0..THREADS {
            let domain = &domain;
            let left = &left;
            let right = &right;
            scope.spawn(move || {
                for round in 0..ROUNDS {
                    let value = thread * 1000 + round;
                    domain
                        .transaction(|tx| {
                            tx.emit(left, value)?;
                            tx.emit(right, value)?;
                            Ok(())
                        })
                        .unwrap();
                }
            });
        }
    });

    let batches = batches.lock();
    assert_eq!(batches.len(), THREADS * ROUNDS);
    assert!(batches.iter().all(|batch| batch.len() == 2 && batch[0] == batch[1]));
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert!(domain.current_events(&merged).unwrap().is_empty());
}

/// Independent domains have independent graphs and locks.
#[test]
fn domains_are_independent() {
    let first = Domain::new();
    let second = Domain::new();
    let a = first.source::<i32>();
    let b = second.source::<i32>();

    let err = first.merge(&[a.events(), b.events()]).unwrap_err();
    assert!(err.to_string().contains("belongs to domain"));

    let (_observer, seen) = record(&second, &b);
    let forward = b.downgrade();
    let target = second.clone();
    let _bridge = first
        .observe(&a, move |events: &[i32], cont| {
            // A direct commit is refused; deferring runs it after this one.
            assert!(matches!(
                target.emit(&forward, -1),
                Err(TransactionError::Usage(UsageError::ReentrantCommit { .. }))
            ));
            for x in events {
                cont.defer(&target).emit(&forward, x * 100).unwrap();
            }
        })
        .unwrap();

    let report = first.emit(&a, 1).unwrap();
    assert_eq!(report.deferred, 1);
    second.emit(&b, 2).unwrap();
    assert_eq!(*seen.lock(), vec![vec![100], vec![2]]);
}

/// Two threads whose observers feed each other's domains both finish.
#[test]
fn cross_domain_feedback_from_two_threads_completes() {
    let first = Domain::new();
    let second = Domain::new();
    let a = first.source::<i32>();
    let b = second.source::<i32>();
    let (_first_observer, seen_first) = record(&first, &a);
    let (_second_observer, seen_second) = record(&second, &b);

    // Both observers wait here, so each thread holds its own domain's lock
    // while the other one forwards into it.
    let barrier = Arc::new(Barrier::new(2));
    let bridge = |target: &Domain, forward: &EventSource<i32>| {
        let target = target.clone();
        let forward = forward.downgrade();
        let barrier = barrier.clone();
        move |events: &[i32], cont: &mut Continuation| {
            if events.iter().all(|x| *x >= 100) {
                return;
            }
            barrier.wait();
            for x in events {
                cont.defer(&target).emit(&forward, x + 100).unwrap();
            }
        }
    };
    let _a_to_b = first.observe(&a, bridge(&second, &b)).unwrap();
    let _b_to_a = second.observe(&b, bridge(&first, &a)).unwrap();

    let (done, finished) = mpsc::channel();
    for (domain, source, value) in [(first.clone(), a.clone(), 1), (second.clone(), b.clone(), 2)] {
        let done = done.clone();
        std::thread::spawn(move || {
            let outcome = domain.emit(&source, value).map(|report| report.deferred);
            let _ = done.send(outcome.map_err(|err| err.to_string()));
        });
    }

    for _ in 0..2 {
        let outcome = finished
            .recv_timeout(Duration::from_secs(5))
            .expect("commit did not finish");
        assert_eq!(outcome, Ok(1));
    }

    let mut first_batches = seen_first.lock().clone();
    let mut second_batches = seen_second.lock().clone();
    first_batches.sort();
    second_batches.sort();
    assert_eq!(first_batches, vec![vec![1], vec![102]]);
    assert_eq!(second_batches, vec![vec![2], vec![101]]);
}
