use std::{sync::Arc, time::Duration};

use orderly::{
    transport::mock::MockTransport, Error, Message, MessageId, OrderedPublisher, PublishHandle,
    PublisherConfig, ResumeMode,
};
use rand::{seq::SliceRandom, thread_rng};
use tokio::time::timeout;

fn keyed(key: &str, payload: impl Into<String>) -> Message {
    Message::new(payload.into()).with_ordering_key(key)
}

fn payloads(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .map(|m| String::from_utf8_lossy(m.payload()).into_owned())
        .collect()
}

fn publisher(transport: &Arc<MockTransport>) -> OrderedPublisher<MockTransport> {
    OrderedPublisher::new(Arc::clone(transport), PublisherConfig::default())
}

async fn outcomes(handles: Vec<PublishHandle>) -> Vec<orderly::Result<MessageId>> {
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.result_timeout(Duration::from_secs(5)).await);
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_key_order_survives_jitter() -> anyhow::Result<()> {
    let transport = Arc::new(MockTransport::new().with_latency(Duration::from_millis(5)));
    let publisher = publisher(&transport);

    // interleave three keys in a random order, numbering each key's messages
    let mut keys: Vec<_> = ["A", "B", "C"]
        .iter()
        .flat_map(|key| std::iter::repeat(*key).take(30))
        .collect();
    keys.shuffle(&mut thread_rng());
    let mut counters = [0usize; 3];
    let mut handles = Vec::new();
    for key in keys {
        let index = (key.as_bytes()[0] - b'A') as usize;
        handles.push(publisher.publish(keyed(key, format!("{key}{}", counters[index]))));
        counters[index] += 1;
    }
    for result in outcomes(handles).await {
        result?;
    }

    let sends = transport.sends().await;
    for key in ["A", "B", "C"] {
        let expected: Vec<_> = (0..30).map(|i| format!("{key}{i}")).collect();
        assert_eq!(payloads(&sends.attempts_for(key)), expected);
        assert_eq!(sends.max_in_flight.get(key), Some(&1));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn eviction_never_splits_a_key() -> anyhow::Result<()> {
    for _ in 0..50 {
        let transport = Arc::new(MockTransport::new().with_latency(Duration::from_micros(200)));
        let publisher = publisher(&transport);

        // each task awaits its own publishes, so the key's queue keeps
        // emptying and its sequencer is evicted between publishes
        let tasks: Vec<_> = (0..8)
            .map(|task| {
                let publisher = publisher.clone();
                tokio::spawn(async move {
                    for i in 0..20 {
                        publisher
                            .publish(keyed("K", format!("{task}-{i}")))
                            .result_timeout(Duration::from_secs(5))
                            .await?;
                    }
                    Ok::<_, Error>(())
                })
            })
            .collect();
        for task in tasks {
            task.await??;
        }

        let sends = transport.sends().await;
        assert_eq!(sends.max_in_flight.get("K"), Some(&1));
        let attempts = payloads(&sends.attempts_for("K"));
        assert_eq!(attempts.len(), 8 * 20);
        for task in 0..8 {
            let prefix = format!("{task}-");
            let own: Vec<usize> = attempts
                .iter()
                .filter_map(|payload| payload.strip_prefix(&prefix))
                .map(|i| i.parse::<usize>())
                .collect::<Result<_, _>>()?;
            assert_eq!(own, (0..20).collect::<Vec<_>>());
        }
    }
    Ok(())
}

#[tokio::test]
async fn failure_latches_key_until_resumed() -> anyhow::Result<()> {
    let transport = Arc::new(MockTransport::new().with_latency(Duration::from_millis(2)));
    transport.fail_next_sends("A", 1).await;
    let publisher = publisher(&transport);

    let handles = vec![
        publisher.publish(keyed("A", "m1")),
        publisher.publish(keyed("A", "m2")),
        publisher.publish(keyed("A", "m3")),
    ];
    let results = outcomes(handles).await;
    assert!(matches!(results[0], Err(Error::SendFailed(_))));
    assert_eq!(results[1], Err(Error::Blocked("A".into())));
    assert_eq!(results[2], Err(Error::Blocked("A".into())));

    // only m1 was ever attempted
    assert_eq!(payloads(&transport.sends().await.attempts), vec!["m1"]);
    assert!(publisher.is_blocked("A"));
    assert_eq!(publisher.pending_len("A"), 3);

    // new publishes on a latched key are parked, not sent
    let late = publisher.publish(keyed("A", "m4")).await;
    assert_eq!(late, Err(Error::Blocked("A".into())));
    assert_eq!(transport.sends().await.attempts.len(), 1);

    let resumed = outcomes(publisher.resume_publish("A")).await;
    assert_eq!(resumed.len(), 4);
    assert!(resumed.iter().all(Result::is_ok));
    assert_eq!(
        payloads(&transport.sends().await.attempts),
        vec!["m1", "m1", "m2", "m3", "m4"]
    );
    Ok(())
}

#[tokio::test]
async fn resume_can_drop_the_failed_message() -> anyhow::Result<()> {
    let transport = Arc::new(MockTransport::new());
    transport.fail_next_sends("A", 1).await;
    let publisher = publisher(&transport);

    let first = publisher.publish(keyed("A", "m1"));
    let second = publisher.publish(keyed("A", "m2"));
    assert!(first.await.is_err());
    assert!(second.await.is_err());

    let resumed = outcomes(publisher.resume_publish_with("A", ResumeMode::DropFailed)).await;
    assert_eq!(resumed.len(), 1);
    assert!(resumed[0].is_ok());
    let sends = transport.sends().await;
    assert_eq!(payloads(&sends.attempts), vec!["m1", "m2"]);
    assert_eq!(sends.published.len(), 1);
    Ok(())
}

#[tokio::test]
async fn a_second_failure_latches_again() -> anyhow::Result<()> {
    let transport = Arc::new(MockTransport::new());
    transport.fail_next_sends("A", 2).await;
    let publisher = publisher(&transport);

    assert!(publisher.publish(keyed("A", "m1")).await.is_err());
    let resumed = outcomes(publisher.resume_publish("A")).await;
    assert!(matches!(resumed[0], Err(Error::SendFailed(_))));
    assert!(publisher.is_blocked("A"));

    let resumed = outcomes(publisher.resume_publish("A")).await;
    assert!(resumed[0].is_ok());
    Ok(())
}

#[tokio::test]
async fn latched_key_does_not_delay_others() -> anyhow::Result<()> {
    let transport = Arc::new(MockTransport::new());
    transport.fail_next_sends("A", 1).await;
    let publisher = publisher(&transport);

    assert!(publisher.publish(keyed("A", "a1")).await.is_err());
    let blocked: Vec<_> = (2..5)
        .map(|i| publisher.publish(keyed("A", format!("a{i}"))))
        .collect();
    let others: Vec<_> = (0..10)
        .map(|i| publisher.publish(keyed("B", format!("b{i}"))))
        .collect();

    let others = timeout(Duration::from_secs(5), outcomes(others)).await?;
    assert!(others.iter().all(Result::is_ok));
    assert!(outcomes(blocked)
        .await
        .iter()
        .all(|r| *r == Err(Error::Blocked("A".into()))));
    assert!(publisher.is_blocked("A"));
    assert!(!publisher.is_blocked("B"));
    Ok(())
}

#[tokio::test]
async fn unordered_messages_bypass_latches() -> anyhow::Result<()> {
    let transport = Arc::new(MockTransport::new().with_latency(Duration::from_millis(2)));
    transport.fail_next_sends("A", 1).await;
    let publisher = publisher(&transport);

    assert!(publisher.publish(keyed("A", "a1")).await.is_err());
    let unordered: Vec<_> = (0..10)
        .map(|i| publisher.publish(Message::new(format!("u{i}"))))
        .collect();
    assert!(outcomes(unordered).await.iter().all(Result::is_ok));
    assert!(publisher.is_blocked("A"));

    // unordered sends may overlap, keyed ones never do
    let sends = transport.sends().await;
    assert_eq!(sends.max_in_flight.get("A"), Some(&1));
    assert_eq!(sends.attempts_for("").len(), 10);
    Ok(())
}

#[tokio::test]
async fn publishers_are_independent() -> anyhow::Result<()> {
    let transport = Arc::new(MockTransport::new());
    transport.fail_next_sends("A", 1).await;
    let first = publisher(&transport);
    let second = publisher(&transport);

    assert!(first.publish(keyed("A", "1")).await.is_err());
    assert!(first.is_blocked("A"));
    assert!(!second.is_blocked("A"));
    second.publish(keyed("A", "2")).await?;
    Ok(())
}
