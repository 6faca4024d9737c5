use std::{sync::Arc, time::Duration};

use demos::QuoteGenerator;
use orderly::{transport::mock::MockTransport, OrderedPublisher};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // random send latency makes sends for different keys overtake one another
    let transport = Arc::new(
        MockTransport::new()
            .with_latency(Duration::from_millis(50))
            .loopback(),
    );
    let publisher = OrderedPublisher::new(transport.clone(), Default::default());

    let mut generator = QuoteGenerator::new();
    let handles: Vec<_> = (0..9)
        .map(|_| {
            let message = generator.next_message();
            let key = message.ordering_key().clone();
            (key, publisher.publish(message))
        })
        .collect();

    for (key, handle) in handles {
        match handle.await {
            Ok(id) => info!("Published message {} under key `{}`", id, key),
            Err(err) => error!("Publish under key `{}` failed: {}", key, err),
        }
    }

    for (id, message) in transport.sends().await.published.iter() {
        info!(
            "Broker saw {} `{}`: {}",
            id,
            message.ordering_key(),
            String::from_utf8_lossy(message.payload())
        );
    }
}
