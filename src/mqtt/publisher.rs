use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{ConnectError, PublishError, TransportError};
use crate::mqtt::client::RumqttConnector;
use crate::mqtt::message::{OutboundMessage, QosLevel};
use crate::mqtt::transport::{Connector, Link, LinkEvent, LinkOptions};

/// Upper bound for flushing the PUBLISH and the DISCONNECT
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// One-shot publisher: every call opens its own connection, sends one QoS 0
/// message and closes again. Nothing is shared with the subscriber session
/// or with other publish calls.
#[derive(Clone)]
pub struct Publisher {
    connector: Arc<dyn Connector>,
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new(Arc::new(RumqttConnector::new()))
    }
}

impl Publisher {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    pub async fn publish(
        &self,
        config: &ConnectionConfig,
        message: OutboundMessage,
    ) -> Result<(), PublishError> {
        self.publish_with_cancel(config, message, &CancellationToken::new())
            .await
    }

    /// Like [`publish`](Self::publish), aborting as soon as `cancel` fires.
    /// The connection is released on every path.
    pub async fn publish_with_cancel(
        &self,
        config: &ConnectionConfig,
        message: OutboundMessage,
        cancel: &CancellationToken,
    ) -> Result<(), PublishError> {
        let options = LinkOptions::from_config(config);
        let timeout = config.connect_timeout();
        debug!(
            "Opening publish connection {} for {}",
            options.client_id, message.topic
        );

        let link = tokio::select! {
            _ = cancel.cancelled() => return Err(PublishError::Cancelled),
            result = tokio::time::timeout(timeout, self.connector.connect(&options)) => match result {
                Ok(Ok(link)) => link,
                Ok(Err(e)) => return Err(ConnectError::from(e).into()),
                Err(_) => return Err(ConnectError::Timeout(timeout).into()),
            },
        };

        // `link` is owned here and dropped on every return below
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(PublishError::Cancelled),
            sent = send_one(link, message) => sent,
        };

        match &result {
            Ok(()) => info!("Published via {}", options.client_id),
            Err(e) => warn!("Publish via {} failed: {}", options.client_id, e),
        }
        result
    }
}

async fn send_one(mut link: Link, message: OutboundMessage) -> Result<(), PublishError> {
    let mut link_failed = false;
    let published = async {
        link.requests
            .publish(&message.topic, QosLevel::AtMostOnce, false, message.payload)
            .await?;
        wait_for(&mut link, LinkEvent::PublishSent, &mut link_failed).await?;
        Ok::<(), TransportError>(())
    }
    .await
    .map_err(PublishError::Publish);

    // Polling a failed event loop again would make it redial the broker
    if link_failed {
        debug!("Publish link failed, dropping it without DISCONNECT");
        return published;
    }

    // Close gracefully whatever happened above; a failure here does not
    // override the publish outcome.
    match link.requests.disconnect().await {
        Ok(()) => {
            if let Err(e) = wait_for(&mut link, LinkEvent::Closed, &mut link_failed).await {
                debug!("Publish connection closed uncleanly: {}", e);
            }
        }
        Err(e) => debug!("DISCONNECT not sent: {}", e),
    }

    published
}

/// Drive the link until `expected` shows up. Sets `failed` once the event
/// half has returned an error; the link must not be polled after that.
async fn wait_for(
    link: &mut Link,
    expected: LinkEvent,
    failed: &mut bool,
) -> Result<(), TransportError> {
    let drive = async {
        loop {
            match link.events.next_event().await {
                Ok(event) if event == expected => return Ok::<(), TransportError>(()),
                Ok(_) => {}
                Err(e) => {
                    *failed = true;
                    return Err(e);
                }
            }
        }
    };
    tokio::time::timeout(FLUSH_TIMEOUT, drive)
        .await
        .map_err(|_| TransportError::Timeout(FLUSH_TIMEOUT))?
}
