use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use anyhow::Result;
use shared::types::DiscoveryResult;
use shared::uid::{ThingTypeUID, ThingUID};

/// What discovery sources report to the inbox manager.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Discovered {
        source: String,
        result: DiscoveryResult,
    },
    Removed {
        source: String,
        thing_uid: ThingUID,
    },
    /// Drop results of the given types that `source` reported before `timestamp`
    RemoveOlder {
        source: String,
        timestamp: DateTime<Utc>,
        thing_type_uids: Vec<ThingTypeUID>,
        bridge_uid: Option<ThingUID>,
    },
}

/// Sending side handed to a discovery source, tagging every event with its name.
#[derive(Clone)]
pub struct DiscoverySink {
    source: String,
    tx: mpsc::Sender<DiscoveryEvent>,
}

impl DiscoverySink {
    pub fn new(source: impl Into<String>, tx: mpsc::Sender<DiscoveryEvent>) -> Self {
        Self {
            source: source.into(),
            tx,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub async fn thing_discovered(&self, result: DiscoveryResult) -> Result<()> {
        self.send(DiscoveryEvent::Discovered {
            source: self.source.clone(),
            result,
        })
        .await
    }

    pub async fn thing_removed(&self, thing_uid: ThingUID) -> Result<()> {
        self.send(DiscoveryEvent::Removed {
            source: self.source.clone(),
            thing_uid,
        })
        .await
    }

    pub async fn remove_older_results(
        &self,
        timestamp: DateTime<Utc>,
        thing_type_uids: Vec<ThingTypeUID>,
        bridge_uid: Option<ThingUID>,
    ) -> Result<()> {
        self.send(DiscoveryEvent::RemoveOlder {
            source: self.source.clone(),
            timestamp,
            thing_type_uids,
            bridge_uid,
        })
        .await
    }

    async fn send(&self, event: DiscoveryEvent) -> Result<()> {
        self.tx.send(event).await?;
        Ok(())
    }
}
