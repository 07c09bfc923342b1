//! End-to-end scenarios driving the public API the way an embedder
//! would, plus a handful of checks on the ambient stack (config
//! immutability, error round-tripping).

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use loomrt::sync::{Channel, Semaphore};
use loomrt::{cede, terminate, values, Context, RuntimeConfig, RuntimeError, Value};

#[test]
fn hand_off_between_two_contexts_alternates_in_order() {
    let log = Rc::new(RefCell::new(Vec::new()));

    let log_a = log.clone();
    let a = Context::new(move |_| {
        log_a.borrow_mut().push("a1");
        cede();
        log_a.borrow_mut().push("a2");
        Vec::new()
    });
    let log_b = log.clone();
    let b = Context::new(move |_| {
        log_b.borrow_mut().push("b1");
        cede();
        log_b.borrow_mut().push("b2");
        Vec::new()
    });

    a.ready().unwrap();
    b.ready().unwrap();
    cede();
    a.join();
    b.join();

    assert_eq!(*log.borrow(), vec!["a1", "b1", "a2", "b2"]);
}

#[test]
fn a_higher_priority_context_preempts_at_the_next_reschedule() {
    let log = Rc::new(RefCell::new(Vec::new()));

    let log_low = log.clone();
    let low = Context::new(move |_| {
        log_low.borrow_mut().push("low");
        Vec::new()
    });
    let log_high = log.clone();
    let high = Context::new(move |_| {
        log_high.borrow_mut().push("high");
        Vec::new()
    });

    low.ready().unwrap();
    high.set_prio(2);
    high.ready().unwrap();

    cede();
    low.join();
    high.join();

    assert_eq!(*log.borrow(), vec!["high", "low"]);
}

#[test]
fn join_after_cancel_returns_exactly_the_cancelled_values() {
    let c = Context::new(|_| {
        cede();
        values!["never seen"]
    });
    c.ready().unwrap();
    cede(); // let it block on its own cede()
    c.cancel(values!["cancelled"]);
    assert_eq!(c.join(), values!["cancelled"]);
}

#[test]
fn bounded_channel_preserves_fifo_order_across_suspension() {
    let ch = Rc::new(Channel::new(1));
    let log = Rc::new(RefCell::new(Vec::new()));

    let producers: Vec<_> = (0..3i64)
        .map(|i| {
            let ch = ch.clone();
            let c = Context::new(move |_| {
                ch.put(Value::Int(i)).unwrap();
                Vec::new()
            });
            c.ready().unwrap();
            c
        })
        .collect();

    let consumer_ch = ch.clone();
    let consumer_log = log.clone();
    let consumer = Context::new(move |_| {
        for _ in 0..3 {
            let v = consumer_ch.get().unwrap();
            if let Value::Int(n) = v {
                consumer_log.borrow_mut().push(n);
            }
        }
        Vec::new()
    });
    consumer.ready().unwrap();

    cede();
    for p in producers {
        p.join();
    }
    consumer.join();

    assert_eq!(*log.borrow(), vec![0, 1, 2]);
}

#[test]
fn a_semaphore_enforces_mutual_exclusion_across_suspension_points() {
    let sem = Rc::new(Semaphore::new(1));
    let critical = Rc::new(RefCell::new(0i64));
    let peak = Rc::new(RefCell::new(0i64));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let sem = sem.clone();
            let critical = critical.clone();
            let peak = peak.clone();
            let c = Context::new(move |_| {
                sem.down();
                *critical.borrow_mut() += 1;
                *peak.borrow_mut() = (*peak.borrow()).max(*critical.borrow());
                cede();
                *critical.borrow_mut() -= 1;
                sem.up();
                Vec::new()
            });
            c.ready().unwrap();
            c
        })
        .collect();

    cede();
    for w in workers {
        w.join();
    }

    assert_eq!(*peak.borrow(), 1);
}

#[test]
fn config_builder_clamps_out_of_range_stack_sizes() {
    let cfg = RuntimeConfig::builder().stack_size(1).build();
    assert_eq!(cfg.stack_size(), loomrt::config::MIN_STACK_SIZE);

    let cfg = RuntimeConfig::builder().stack_size(usize::MAX).build();
    assert_eq!(cfg.stack_size(), loomrt::config::MAX_STACK_SIZE);
}

#[test]
fn runtime_errors_render_a_stable_message() {
    let err = RuntimeError::ChannelClosed;
    assert_eq!(err.to_string(), "channel closed while waiting");
}

#[cfg(unix)]
#[test]
fn handle_readable_times_out_cleanly_when_nothing_arrives() {
    use loomrt::handle::Handle;
    use std::os::unix::net::UnixStream;

    let (a, _b) = UnixStream::pair().unwrap();
    a.set_nonblocking(true).unwrap();

    let started = std::time::Instant::now();
    let c = Context::new(move |_| {
        let h = Handle::with_timeout(a, Duration::from_millis(5));
        let ready = h.readable();
        values![ready]
    });
    c.ready().unwrap();
    cede();
    let result = c.join();

    assert_eq!(result, values![false]);
    assert!(started.elapsed() >= Duration::from_millis(5));
    // No leaked watch: the reactor has nothing left registered, so a
    // second unrelated sleeping context still wakes on its own deadline
    // rather than stalling behind a stale fd registration.
    let d = Context::new(|_| {
        loomrt::timer::sleep(Duration::from_millis(1));
        terminate(Vec::new())
    });
    d.ready().unwrap();
    cede();
    d.join();
}

#[test]
fn sleeping_context_resumes_after_roughly_its_requested_duration() {
    let started = std::time::Instant::now();
    let c = Context::new(|_| {
        loomrt::timer::sleep(Duration::from_millis(10));
        terminate(Vec::new())
    });
    c.ready().unwrap();
    cede();
    c.join();
    assert!(started.elapsed() >= Duration::from_millis(10));
}
