//! Event bus delivery order, fault isolation and history bounds.

use std::sync::{Arc, Mutex};

use mender_core::event_bus::WILDCARD;
use mender_core::{EventBus, EventBusConfig};
use serde_json::json;

#[test]
fn test_named_handlers_run_before_wildcards_in_registration_order() {
    let bus = EventBus::default();
    let log = Arc::new(Mutex::new(Vec::<String>::new()));

    let l = log.clone();
    bus.subscribe_all(move |name, _| l.lock().unwrap().push(format!("all:{name}")));
    for tag in ["first", "second"] {
        let l = log.clone();
        bus.subscribe("recovery:started", move |_| l.lock().unwrap().push(tag.to_string()));
    }

    assert_eq!(bus.publish("recovery:started", json!({"flowId": "f1"})), 3);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["first", "second", "all:recovery:started"]
    );
}

#[test]
fn test_wildcard_payload_subscription_sees_every_event() {
    let bus = EventBus::default();
    let count = Arc::new(Mutex::new(0));
    let c = count.clone();
    bus.subscribe(WILDCARD, move |_| *c.lock().unwrap() += 1);

    bus.publish("a", json!(1));
    bus.publish("b", json!(2));
    assert_eq!(*count.lock().unwrap(), 2);
}

#[test]
fn test_panicking_handler_does_not_stop_delivery() {
    let bus = EventBus::default();
    let delivered = Arc::new(Mutex::new(Vec::<i64>::new()));

    bus.subscribe("tick", |_| panic!("handler bug"));
    let d = delivered.clone();
    bus.subscribe("tick", move |p| d.lock().unwrap().push(p.as_i64().unwrap_or(-1)));

    assert_eq!(bus.publish("tick", json!(7)), 2);
    assert_eq!(*delivered.lock().unwrap(), vec![7]);
    assert_eq!(bus.history(Some("tick")).len(), 1);
}

#[test]
fn test_history_keeps_most_recent_max_records() {
    let bus = EventBus::new(EventBusConfig {
        max_history_size: 5,
        history_enabled: true,
    });
    for i in 0..12 {
        bus.publish(if i % 2 == 0 { "even" } else { "odd" }, json!(i));
    }

    let history = bus.history(None);
    assert_eq!(history.len(), 5);
    let payloads: Vec<i64> = history.iter().map(|r| r.payload.as_i64().unwrap()).collect();
    assert_eq!(payloads, vec![7, 8, 9, 10, 11]);
    assert_eq!(bus.history(Some("even")).len(), 2);

    bus.clear_history();
    assert!(bus.history(None).is_empty());
}

#[test]
fn test_history_shorter_than_max_keeps_everything() {
    let bus = EventBus::default();
    for i in 0..3 {
        bus.publish("e", json!(i));
    }
    assert_eq!(bus.history(None).len(), 3);
}

#[test]
fn test_handlers_may_publish_reentrantly() {
    let bus = Arc::new(EventBus::default());
    let inner = bus.clone();
    bus.subscribe("outer", move |_| {
        inner.publish("inner", json!({}));
    });
    let seen = Arc::new(Mutex::new(false));
    let s = seen.clone();
    bus.subscribe("inner", move |_| *s.lock().unwrap() = true);

    bus.publish("outer", json!({}));
    assert!(*seen.lock().unwrap());
    let names: Vec<String> = bus.history(None).into_iter().map(|r| r.event_name).collect();
    assert_eq!(names, vec!["inner", "outer"]);
}

#[test]
fn test_concurrent_publishers() {
    let bus = Arc::new(EventBus::new(EventBusConfig {
        max_history_size: 10_000,
        history_enabled: true,
    }));
    let count = Arc::new(Mutex::new(0usize));
    let c = count.clone();
    bus.subscribe("work", move |_| *c.lock().unwrap() += 1);

    let threads: Vec<_> = (0..8)
        .map(|t| {
            let bus = bus.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    bus.publish("work", json!({"thread": t, "i": i}));
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(*count.lock().unwrap(), 800);
    assert_eq!(bus.history(Some("work")).len(), 800);
}
