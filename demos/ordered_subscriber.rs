use std::{sync::Arc, time::Duration};

use demos::{QuoteGenerator, KEYS};
use orderly::{
    encoding::{decode, Payload},
    transport::mock::MockTransport,
    OrderedPublisher, Subscriber, SubscriberConfig,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let transport = Arc::new(
        MockTransport::new()
            .with_latency(Duration::from_millis(20))
            .loopback(),
    );
    let publisher = OrderedPublisher::new(transport.clone(), Default::default());
    let subscriber = Subscriber::new(
        transport,
        SubscriberConfig {
            session_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        },
    );

    let session = subscriber.listen();

    let mut generator = QuoteGenerator::new();
    let handles: Vec<_> = (0..30)
        .map(|_| publisher.publish(generator.next_message()))
        .collect();
    for handle in handles {
        if let Err(err) = handle.await {
            warn!("Publish failed: {}", err);
        }
    }

    match session.await {
        Ok(report) => info!("Session finished: {:?}", report),
        Err(err) => warn!("Session failed: {}", err),
    }

    for key in KEYS {
        info!("Key `{}`:", key);
        for message in subscriber.drain(key) {
            match decode(&message.message) {
                Ok(Payload::Json(value)) => info!("  {} {}", message.message_id, value),
                Ok(Payload::Binary(bytes)) => {
                    info!("  {} {} bytes", message.message_id, bytes.len())
                }
                Err(err) => warn!("  {} undecodable: {}", message.message_id, err),
            }
        }
    }
}
