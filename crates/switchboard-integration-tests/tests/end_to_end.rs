//! End-to-end publish/subscribe through registered objects.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use switchboard_broker::matcher::PayloadMatcher;
use switchboard_broker::{
    Broker, BrokerError, DataEvent, EventSource, HandlerMethod, Matcher, MatcherRef, Payload,
    ObjectKey, StrategyKind,
};
use switchboard_test::{
    Button, ClickArgs, HandlingExtension, InvalidOperation, Listener, Notification,
    ThrowingListener,
};

#[test]
fn test_click_reaches_every_listener_in_order() {
    let (broker, recording) = common::recorded_broker();
    let button = Button::new();
    let first = Listener::new();
    let second = Listener::new();

    broker.register(&button).unwrap();
    broker.register(&first).unwrap();
    broker.register(&second).unwrap();

    let summary = button.click(10).unwrap();

    assert_eq!(summary.relayed, 2);
    assert_eq!(summary.skipped, 0);
    assert_eq!(first.clicks(), vec![10]);
    assert_eq!(second.clicks(), vec![10]);
    assert!(first.all_from_button());

    let relayed: Vec<_> = recording
        .notifications()
        .into_iter()
        .filter(|n| matches!(n, Notification::Relayed { .. }))
        .collect();
    assert_eq!(relayed.len(), 2);
}

#[test]
fn test_registration_order_does_not_matter() {
    let broker = common::builder().build().unwrap();
    let listener = Listener::new();
    let button = Button::new();

    broker.register(&listener).unwrap();
    broker.register(&button).unwrap();

    button.click(1).unwrap();
    assert_eq!(listener.clicks(), vec![1]);
}

#[test]
fn test_one_source_on_two_topics() {
    let broker = common::builder().build().unwrap();
    let button = Button::on("ui.a");
    let on_a = Listener::on("ui.a");
    let on_b = Listener::on("ui.b");
    broker.register(&button).unwrap();
    broker
        .registrar()
        .add_publication("ui.b", &button, &button.clicked, None, [])
        .unwrap();
    broker.register(&on_a).unwrap();
    broker.register(&on_b).unwrap();

    let summary = button.click(5).unwrap();

    assert_eq!(summary.relayed, 2);
    assert_eq!(on_a.clicks(), vec![5]);
    assert_eq!(on_b.clicks(), vec![5]);
}

struct Gauge {
    reading: EventSource<DataEvent<u64>>,
}

struct Meter {
    last: AtomicU64,
}

#[test]
fn test_value_handler_receives_unwrapped_data() {
    let broker = Broker::new();
    let gauge = Arc::new(Gauge {
        reading: EventSource::new("reading"),
    });
    let meter = Arc::new(Meter {
        last: AtomicU64::new(0),
    });

    broker
        .registrar()
        .add_publication("plant.pressure", &gauge, &gauge.reading, None, [])
        .unwrap();
    broker
        .registrar()
        .add_subscription(
            "plant.pressure",
            &meter,
            HandlerMethod::value("update", |meter: &Meter, value: &u64| {
                meter.last.store(*value, Ordering::SeqCst);
                Ok(())
            }),
            &StrategyKind::SYNCHRONOUS,
            [],
        )
        .unwrap();

    gauge.reading.raise(DataEvent::new(42)).unwrap();
    assert_eq!(meter.last.load(Ordering::SeqCst), 42);
}

#[test]
fn test_named_matcher_filters_and_reports_skips() {
    let recording = Arc::new(switchboard_test::RecordingExtension::new());
    let broker = common::builder()
        .extension(recording.clone())
        .matcher("even", || {
            Arc::new(PayloadMatcher::new("even", |args: &ClickArgs| args.x.rem_euclid(2) == 0))
                as Arc<dyn Matcher>
        })
        .build()
        .unwrap();
    let button = Button::new();
    let listener = Listener::with_matchers(switchboard_test::BUTTON_TOPIC, &["even"]);
    broker.register(&button).unwrap();
    broker.register(&listener).unwrap();

    let odd = button.click(1).unwrap();
    let even = button.click(2).unwrap();

    assert_eq!((odd.relayed, odd.skipped), (0, 1));
    assert_eq!((even.relayed, even.skipped), (1, 0));
    assert_eq!(listener.clicks(), vec![2]);
    assert_eq!(
        recording.count(|n| matches!(
            n,
            Notification::Skipped { failed, .. } if failed == &vec!["even".to_owned()]
        )),
        1
    );
}

#[test]
fn test_unknown_matcher_name_rejects_registration() {
    let broker = common::builder().build().unwrap();
    let listener = Listener::with_matchers("ui.x", &["missing"]);

    let err = broker.register(&listener).unwrap_err();

    assert!(matches!(err, BrokerError::UnknownMatcher { ref name } if name == "missing"));
    assert_eq!(broker.topic("ui.x").subscription_count(), 0);
}

#[test]
fn test_global_matcher_applies_to_every_topic() {
    let broker = common::builder()
        .global_matcher(Arc::new(switchboard_broker::matcher::Never))
        .build()
        .unwrap();
    let button = Button::new();
    let listener = Listener::new();
    broker.register(&button).unwrap();
    broker.register(&listener).unwrap();

    let summary = button.click(1).unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(listener.click_count(), 0);

    assert!(broker.topics().remove_global_matcher("never"));
    assert_eq!(button.click(2).unwrap().relayed, 1);
}

#[test]
fn test_publication_matcher_instance() {
    let broker = common::builder().build().unwrap();
    let button = Button::on("ui.filtered");
    let listener = Listener::on("ui.filtered");
    broker
        .registrar()
        .add_publication(
            "ui.filtered",
            &button,
            &button.clicked,
            None,
            [MatcherRef::instance(PayloadMatcher::new(
                "positive",
                |args: &ClickArgs| args.x > 0,
            ))],
        )
        .unwrap();
    broker.register(&listener).unwrap();

    button.click(-3).unwrap();
    button.click(3).unwrap();

    assert_eq!(listener.clicks(), vec![3]);
}

#[test]
fn test_publish_as_fires_existing_publication() {
    let broker = common::builder().build().unwrap();
    let button = Button::new();
    let listener = Listener::new();
    broker.register(&button).unwrap();
    broker.register(&listener).unwrap();

    let topic = broker.topic(switchboard_test::BUTTON_TOPIC);
    let summary = topic
        .publish_as(ObjectKey::of(&button), "clicked", Payload::new(ClickArgs { x: 8 }))
        .unwrap();

    assert_eq!(summary.relayed, 1);
    assert_eq!(listener.clicks(), vec![8]);

    let unknown = topic
        .publish_as(ObjectKey::of(&button), "pressed", Payload::new(ClickArgs { x: 8 }))
        .unwrap_err();
    assert!(matches!(unknown, BrokerError::UnknownPublication { .. }));

    let wrong_type = topic
        .publish_as(ObjectKey::of(&button), "clicked", Payload::new(8_u32))
        .unwrap_err();
    assert!(matches!(wrong_type, BrokerError::IncompatiblePayload { .. }));
}

#[test]
fn test_unhandled_failure_stops_the_firing() {
    let broker = common::builder().build().unwrap();
    let button = Button::new();
    let thrower = ThrowingListener::new();
    let listener = Listener::new();
    broker.register(&button).unwrap();
    broker.register(&thrower).unwrap();
    broker.register(&listener).unwrap();

    let err = button.click(9).unwrap_err();

    match &err {
        BrokerError::Subscriber { topic, handler, .. } => {
            assert_eq!(topic, switchboard_test::BUTTON_TOPIC);
            assert_eq!(handler, "explode");
        },
        other => panic!("unexpected error: {other}"),
    }
    let cause = err.into_handler_error().unwrap();
    assert!(cause.downcast_ref::<InvalidOperation>().is_some());
    assert_eq!(listener.click_count(), 0);
}

#[test]
fn test_handled_failure_lets_the_firing_continue() {
    let handling = Arc::new(HandlingExtension::new());
    let broker = common::builder()
        .extension(handling.clone())
        .build()
        .unwrap();
    let button = Button::new();
    let thrower = ThrowingListener::new();
    let listener = Listener::new();
    broker.register(&button).unwrap();
    broker.register(&thrower).unwrap();
    broker.register(&listener).unwrap();

    let summary = button.click(9).unwrap();

    assert_eq!(summary.relayed, 2);
    assert_eq!(handling.handled(), 1);
    assert_eq!(listener.clicks(), vec![9]);
}

#[test]
fn test_incompatible_subscription_is_rejected() {
    let broker = common::builder().build().unwrap();
    let button = Button::new();
    broker.register(&button).unwrap();
    let meter = Arc::new(Meter {
        last: AtomicU64::new(0),
    });

    let err = broker
        .registrar()
        .add_subscription(
            switchboard_test::BUTTON_TOPIC,
            &meter,
            HandlerMethod::payload("on_number", |_: &Meter, _: &u64| Ok(())),
            &StrategyKind::SYNCHRONOUS,
            [],
        )
        .unwrap_err();

    assert!(matches!(err, BrokerError::IncompatiblePayload { .. }));
    assert!(err.is_registration_error());
    assert_eq!(
        broker.topic(switchboard_test::BUTTON_TOPIC).subscription_count(),
        0
    );
}

#[test]
fn test_no_args_handler_accepts_any_publication() {
    let broker = common::builder().build().unwrap();
    let button = Button::new();
    broker.register(&button).unwrap();
    let meter = Arc::new(Meter {
        last: AtomicU64::new(0),
    });
    broker
        .registrar()
        .add_subscription(
            switchboard_test::BUTTON_TOPIC,
            &meter,
            HandlerMethod::no_args("ping", |meter: &Meter| {
                meter.last.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            &StrategyKind::SYNCHRONOUS,
            [],
        )
        .unwrap();

    button.click(0).unwrap();
    button.click(0).unwrap();
    assert_eq!(meter.last.load(Ordering::SeqCst), 2);
}

#[test]
fn test_restricted_publication_rejects_other_strategies() {
    let broker = common::builder().build().unwrap();
    let button = Button::restricted("ui.restricted", StrategyKind::BACKGROUND);
    let listener = Listener::on("ui.restricted");
    broker.register(&button).unwrap();

    let err = broker.register(&listener).unwrap_err();

    assert!(matches!(
        err,
        BrokerError::HandlerRestrictionViolation { ref required, ref actual, .. }
            if required == "background" && actual == "synchronous"
    ));
    assert_eq!(broker.topic("ui.restricted").subscription_count(), 0);
}
