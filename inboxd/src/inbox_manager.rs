use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use crate::config::InboxConfig;
use crate::discovery::DiscoveryEvent;
use crate::inbox::InboxHandle;

/// Inbox manager event loop - bridges discovery events to the inbox worker and
/// drives the expiry and retry sweeps.
pub async fn run(
    inbox: InboxHandle,
    mut rx: mpsc::Receiver<DiscoveryEvent>,
    config: InboxConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let mut expiry_interval = tokio::time::interval(config.expiry_interval());
    let mut retry_interval = tokio::time::interval(config.retry_interval());

    loop {
        tokio::select! {
            Some(event) = rx.recv() => handle_event(&inbox, event).await,
            _ = expiry_interval.tick() => {
                match inbox.expire(Utc::now()).await {
                    Ok(removed) if !removed.is_empty() => {
                        tracing::info!("Removed {} expired results from inbox", removed.len());
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Failed to run expiry sweep: {}", e),
                }
            }
            _ = retry_interval.tick() => {
                match inbox.retry().await {
                    Ok(0) => {}
                    Ok(waiting) => tracing::debug!("{} discovery results still wait for their thing type", waiting),
                    Err(e) => tracing::error!("Failed to run retry sweep: {}", e),
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Inbox manager shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_event(inbox: &InboxHandle, event: DiscoveryEvent) {
    match event {
        DiscoveryEvent::Discovered { source, result } => {
            let thing_uid = result.thing_uid.clone();
            // resolving may take several retry ticks, which this loop drives
            let added = inbox.thing_discovered(&source, result);
            tokio::spawn(async move {
                if !added.await {
                    tracing::debug!("Discovery result {} from {} was not added", thing_uid, source);
                }
            });
        }
        DiscoveryEvent::Removed { source, thing_uid } => match inbox.remove(thing_uid.clone()).await {
            Ok(true) => tracing::debug!("{} withdrew {}", source, thing_uid),
            Ok(false) => {}
            Err(e) => tracing::error!("Failed to remove {}: {}", thing_uid, e),
        },
        DiscoveryEvent::RemoveOlder {
            source,
            timestamp,
            thing_type_uids,
            bridge_uid,
        } => {
            if let Err(e) = inbox
                .remove_older_results(source, timestamp, thing_type_uids, bridge_uid)
                .await
            {
                tracing::error!("Failed to remove older results: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use shared::types::{DiscoveryResult, ThingKind};
    use crate::inbox::tests::{fixture, result, thing_type, uid};

    fn config() -> InboxConfig {
        InboxConfig {
            expiry_interval_secs: 1,
            retry_interval_secs: 1,
        }
    }

    async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..50 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        check()
    }

    #[tokio::test]
    async fn test_manager_adds_retries_and_removes() {
        let f = fixture();
        let handle = InboxHandle::spawn(f.inbox.clone());
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(handle.clone(), rx, config(), cancel.clone()));

        tx.send(DiscoveryEvent::Discovered {
            source: "scanner".to_string(),
            result: result("demo:dev:1"),
        })
        .await
        .unwrap();
        tx.send(DiscoveryEvent::Discovered {
            source: "scanner".to_string(),
            result: DiscoveryResult::builder(uid("late:dev:1")).build(),
        })
        .await
        .unwrap();
        f.types.register(thing_type("late:dev", ThingKind::Thing));

        assert!(wait_for(|| f.inbox.get_all().len() == 2).await);

        tx.send(DiscoveryEvent::Removed {
            source: "scanner".to_string(),
            thing_uid: uid("demo:dev:1"),
        })
        .await
        .unwrap();

        assert!(wait_for(|| f.inbox.get(&uid("demo:dev:1")).is_none()).await);
        assert!(f.inbox.get(&uid("late:dev:1")).is_some());

        cancel.cancel();
        task.await.unwrap().unwrap();
        handle.shutdown().unwrap();
    }
}
