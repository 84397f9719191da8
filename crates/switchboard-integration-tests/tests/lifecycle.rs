//! Registration lifecycle: unregistering, dead owners, teardown.

mod common;

use std::sync::Arc;

use switchboard_broker::{
    BrokerError, Inspectable, PublicationDescriptor, Registrar, Scan, StrategyKind,
    SubscriptionDescriptor, TypeInspector,
};
use switchboard_test::{BUTTON_TOPIC, Button, Listener, Notification, fixture_inspector};

#[test]
fn test_unregister_stops_delivery() {
    let (broker, recording) = common::recorded_broker();
    let button = Button::new();
    let listener = Listener::new();
    broker.register(&button).unwrap();
    let added = broker.register(&listener).unwrap();
    assert_eq!(added.subscriptions, 1);

    button.click(1).unwrap();
    let removed = broker.unregister(&listener).unwrap();
    let summary = button.click(2).unwrap();

    assert_eq!(removed.subscriptions, 1);
    assert_eq!(summary.relayed, 0);
    assert_eq!(listener.clicks(), vec![1]);
    assert_eq!(
        recording.count(|n| matches!(n, Notification::Unregistered(item) if item.subscriptions == 1)),
        1
    );
}

#[test]
fn test_unregistered_publisher_is_unbound() {
    let broker = common::builder().build().unwrap();
    let button = Button::new();
    broker.register(&button).unwrap();
    assert!(button.clicked.is_bound());

    broker.unregister(&button).unwrap();

    assert!(!button.clicked.is_bound());
    assert_eq!(broker.topic(BUTTON_TOPIC).publication_count(), 0);
}

#[test]
fn test_dropped_subscriber_is_swept_on_next_fire() {
    let (broker, recording) = common::recorded_broker();
    let button = Button::new();
    let listener = Listener::new();
    broker.register(&button).unwrap();
    broker.register(&listener).unwrap();

    drop(listener);
    let summary = button.click(1).unwrap();

    assert_eq!(summary.relayed, 0);
    assert_eq!(broker.topic(BUTTON_TOPIC).subscription_count(), 0);
    assert_eq!(
        recording.count(|n| matches!(n, Notification::SubscriptionRemoved { .. })),
        1
    );
}

#[test]
fn test_dropped_publisher_is_swept() {
    let broker = common::builder().build().unwrap();
    let button = Button::new();
    broker.register(&button).unwrap();
    let topic = broker.topic(BUTTON_TOPIC);
    assert_eq!(topic.publication_count(), 1);

    drop(button);

    assert_eq!(topic.sweep(), 1);
    assert_eq!(topic.publication_count(), 0);
    assert_eq!(topic.sweep(), 0);
}

#[test]
fn test_registering_twice_is_a_duplicate() {
    let broker = common::builder().build().unwrap();
    let listener = Listener::new();
    broker.register(&listener).unwrap();

    let err = broker.register(&listener).unwrap_err();

    assert!(matches!(err, BrokerError::DuplicateSubscription { .. }));
    assert_eq!(broker.topic(BUTTON_TOPIC).subscription_count(), 1);
}

#[test]
fn test_unknown_type_registers_nothing() {
    let broker = common::builder().build().unwrap();
    let stranger = Arc::new(42_u32);

    let item = broker.register(&stranger).unwrap();

    assert_eq!(item.publications, 0);
    assert_eq!(item.subscriptions, 0);
    assert!(broker.topics().is_empty());
}

#[test]
fn test_teardown_on_drop_unbinds_sources() {
    let broker = common::builder().build().unwrap();
    let button = Button::new();
    let listener = Listener::new();
    broker.register(&button).unwrap();
    broker.register(&listener).unwrap();

    drop(broker);

    assert!(!button.clicked.is_bound());
    assert_eq!(button.click(1).unwrap().relayed, 0);
    assert_eq!(listener.click_count(), 0);
}

/// Publishes one event and subscribes to a second topic, then adds a
/// third subscription from its registration hook.
struct Panel {
    opened: switchboard_broker::EventSource<u32>,
    fail_hook: bool,
}

impl Inspectable for Panel {
    fn inspect(this: &Arc<Self>, scan: &mut Scan) {
        scan.publish(PublicationDescriptor::new("panel.opened", &this.opened));
        scan.subscribe(SubscriptionDescriptor::new(
            "panel.commands",
            switchboard_broker::HandlerMethod::payload("on_command", |_: &Panel, _: &String| {
                Ok(())
            }),
        ));
    }

    fn on_register(this: &Arc<Self>, registrar: &Registrar) -> anyhow::Result<()> {
        if this.fail_hook {
            anyhow::bail!("panel refused to register");
        }
        registrar.add_subscription(
            "panel.extra",
            this,
            switchboard_broker::HandlerMethod::no_args("on_extra", |_: &Panel| Ok(())),
            &StrategyKind::SYNCHRONOUS,
            [],
        )?;
        Ok(())
    }

    fn on_unregister(this: &Arc<Self>, registrar: &Registrar) -> anyhow::Result<()> {
        registrar.remove_subscription("panel.extra", this, "on_extra");
        Ok(())
    }
}

fn panel_broker() -> switchboard_broker::Broker {
    common::builder()
        .inspector(fixture_inspector().with::<Panel>())
        .build()
        .unwrap()
}

#[test]
fn test_self_registration_hook_runs_after_descriptors() {
    let broker = panel_broker();
    let panel = Arc::new(Panel {
        opened: switchboard_broker::EventSource::new("opened"),
        fail_hook: false,
    });

    broker.register(&panel).unwrap();

    assert_eq!(broker.topic("panel.opened").publication_count(), 1);
    assert_eq!(broker.topic("panel.commands").subscription_count(), 1);
    assert_eq!(broker.topic("panel.extra").subscription_count(), 1);

    broker.unregister(&panel).unwrap();

    assert_eq!(broker.topic("panel.opened").publication_count(), 0);
    assert_eq!(broker.topic("panel.commands").subscription_count(), 0);
    assert_eq!(broker.topic("panel.extra").subscription_count(), 0);
}

#[test]
fn test_failed_self_registration_rolls_back() {
    let broker = panel_broker();
    let panel = Arc::new(Panel {
        opened: switchboard_broker::EventSource::new("opened"),
        fail_hook: true,
    });

    let err = broker.register(&panel).unwrap_err();

    assert!(matches!(err, BrokerError::SelfRegistration { .. }));
    assert!(!panel.opened.is_bound());
    assert_eq!(broker.topic("panel.opened").publication_count(), 0);
    assert_eq!(broker.topic("panel.commands").subscription_count(), 0);
}

#[test]
fn test_inspector_override_replaces_fixture_types() {
    let broker = common::builder()
        .inspector(TypeInspector::new())
        .build()
        .unwrap();
    let listener = Listener::new();

    let item = broker.register(&listener).unwrap();

    assert_eq!(item.subscriptions, 0);
}
