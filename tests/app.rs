mod helpers;

use helpers::mock_sender::MockSender;
use helpers::test_metrics::TestMetrics;
use notifier::{app::App, config::Config};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::watch;

const CONFIG: &str = r#"
    [dispatch.retry]
    max_retries = 1
    initial_backoff_ms = 10
    max_backoff_ms = 10

    [[senders]]
    type = "mail"
    mail_from = "moira@example.com"
    mail_smtp_host = "localhost"

    [[senders]]
    type = "twilio sms"
    api_asid = "AC123"
    api_authtoken = "secret"
    api_fromphone = "+15550000000"
"#;

const INPUT: &str = r#"{"events":[{"metric":"m1","timestamp":1,"state":"ERROR"},{"metric":"m2","timestamp":2,"state":"ERROR"},{"metric":"m3","timestamp":3,"state":"OK"}],"contact":{"type":"mail","value":"a@b.com"},"trigger":{"name":"T","tags":["x"]}}
this is not json

{"events":[],"contact":{"type":"pigeon","value":"coop"},"trigger":{"name":"T"}}
{"events":[{"metric":"m","timestamp":1,"state":"WARN"}],"contact":{"type":"twilio sms","value":"+15551234567"},"trigger":{"name":"T"}}
"#;

#[tokio::test]
async fn test_app_routes_input_to_senders() {
    let config = Config::from_toml(CONFIG).unwrap();
    let metrics = TestMetrics::new();
    let mail = MockSender::succeeding();
    let mail_tracker = mail.tracker();
    let sms = MockSender::failing();
    let sms_tracker = sms.tracker();

    let app = App::builder(config)
        .sender_override("mail", mail.boxed())
        .sender_override("twilio sms", sms.boxed())
        .recorder(metrics.recorder())
        .build()
        .unwrap();
    assert!(app.dispatcher().is_registered("mail"));
    assert!(app.dispatcher().is_registered("twilio sms"));

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let stats = app.run(INPUT.as_bytes(), shutdown_rx).await.unwrap();

    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.rejected, 1);

    assert_eq!(mail_tracker.contacts(), vec!["a@b.com".to_string()]);
    assert_eq!(metrics.get_counter("mail.sends_ok"), 1);
    assert_eq!(metrics.get_counter("mail.sends_failed"), 0);

    // The failing channel may be stopped before its retry is due; either
    // way the package ends up counted as failed exactly once.
    assert!(sms_tracker.calls() >= 1);
    assert_eq!(metrics.get_counter("twilio_sms.sends_failed"), 1);
    assert_eq!(metrics.get_counter("twilio_sms.sends_ok"), 0);
}

#[tokio::test]
async fn test_app_build_fails_on_unknown_sender_type() {
    let config = Config::from_toml(
        r#"
        [[senders]]
        type = "carrier pigeon"
    "#,
    )
    .unwrap();

    let err = App::builder(config)
        .recorder(TestMetrics::new().recorder())
        .build()
        .err()
        .expect("unknown sender type must fail the build");
    assert!(err.to_string().contains("carrier pigeon"), "{err}");
}

#[tokio::test]
async fn test_failed_build_stops_registered_workers() {
    let config = Config::from_toml(
        r#"
        [[senders]]
        type = "mail"

        [[senders]]
        type = "carrier pigeon"
    "#,
    )
    .unwrap();
    let mail = MockSender::succeeding();
    let mail_tracker = mail.tracker();

    let result = App::builder(config)
        .sender_override("mail", mail.boxed())
        .recorder(TestMetrics::new().recorder())
        .build();
    assert!(result.is_err());
    assert_eq!(mail_tracker.inits(), 1);

    mail_tracker.wait_for_drop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_app_build_fails_on_sender_config_error() {
    let config = Config::from_toml(
        r#"
        [[senders]]
        type = "twilio sms"
        api_asid = "AC123"
    "#,
    )
    .unwrap();

    let err = App::builder(config)
        .recorder(TestMetrics::new().recorder())
        .build()
        .err()
        .expect("incomplete twilio settings must fail the build");
    assert!(
        format!("{err:#}").contains("Can not read [twilio sms] api_authtoken param from config"),
        "{err:#}"
    );
}

#[tokio::test]
async fn test_app_stops_on_shutdown_signal() {
    let config = Config::from_toml(CONFIG).unwrap();
    let mail = MockSender::succeeding();
    let app = App::builder(config)
        .sender_override("mail", mail.boxed())
        .sender_override("twilio sms", MockSender::succeeding().boxed())
        .recorder(TestMetrics::new().recorder())
        .build()
        .unwrap();

    // The writer half stays open, so intake would never see end of input.
    let (_writer, reader) = tokio::io::duplex(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let run = tokio::spawn(app.run(BufReader::new(reader), shutdown_rx));
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown_tx.send_replace(true);

    let stats = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("app did not stop after the shutdown signal")
        .unwrap()
        .unwrap();
    assert_eq!(stats.accepted, 0);
}
