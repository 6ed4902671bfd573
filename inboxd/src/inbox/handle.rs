use std::future::Future;
use std::sync::Arc;
use std::thread;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use anyhow::Result;
use shared::types::DiscoveryResult;
use shared::uid::{ThingTypeUID, ThingUID};
use super::{Inbox, PendingResult};

/// Commands sent to the inbox worker thread
#[derive(Debug)]
pub enum InboxCommand {
    Add(PendingResult),
    Remove(ThingUID, oneshot::Sender<bool>),
    RemoveOlder {
        source: String,
        timestamp: DateTime<Utc>,
        thing_type_uids: Vec<ThingTypeUID>,
        bridge_uid: Option<ThingUID>,
        reply: oneshot::Sender<Vec<ThingUID>>,
    },
    Expire(DateTime<Utc>, oneshot::Sender<Vec<ThingUID>>),
    Retry(oneshot::Sender<usize>),
    Shutdown,
}

/// Handle to the thread that runs every store mutation coming from discovery
/// sources and sweepers, one at a time.
#[derive(Clone)]
pub struct InboxHandle {
    tx: mpsc::UnboundedSender<InboxCommand>,
    inbox: Arc<Inbox>,
}

impl InboxHandle {
    pub fn spawn(inbox: Arc<Inbox>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<InboxCommand>();
        let worker = Arc::clone(&inbox);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    InboxCommand::Add(pending) => worker.process(pending),
                    InboxCommand::Remove(thing_uid, reply) => {
                        let _ = reply.send(worker.remove(&thing_uid));
                    }
                    InboxCommand::RemoveOlder {
                        source,
                        timestamp,
                        thing_type_uids,
                        bridge_uid,
                        reply,
                    } => {
                        let removed = worker.remove_older_results(
                            &source,
                            timestamp,
                            &thing_type_uids,
                            bridge_uid.as_ref(),
                        );
                        let _ = reply.send(removed);
                    }
                    InboxCommand::Expire(now, reply) => {
                        let _ = reply.send(worker.remove_expired(now));
                    }
                    InboxCommand::Retry(reply) => {
                        let _ = reply.send(worker.retry_pending());
                    }
                    InboxCommand::Shutdown => {
                        tracing::info!("Inbox worker shutting down");
                        break;
                    }
                }
            }
            // queued commands are dropped with `rx`, their callers see `false`
            worker.fail_pending();
        });

        Self { tx, inbox }
    }

    pub fn inbox(&self) -> &Arc<Inbox> {
        &self.inbox
    }

    /// Queues a result for merging. The returned future resolves to whether the
    /// result ended up in the inbox; it stays pending while the thing type is
    /// unknown and the retry budget lasts.
    pub fn add(&self, result: DiscoveryResult) -> impl Future<Output = bool> + Send + 'static {
        self.submit(result, None)
    }

    /// Like [`add`](Self::add), remembering `source` as the producer.
    pub fn thing_discovered(
        &self,
        source: &str,
        result: DiscoveryResult,
    ) -> impl Future<Output = bool> + Send + 'static {
        self.submit(result, Some(source.to_string()))
    }

    fn submit(
        &self,
        result: DiscoveryResult,
        source: Option<String>,
    ) -> impl Future<Output = bool> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let thing_uid = result.thing_uid.clone();
        if self
            .tx
            .send(InboxCommand::Add(PendingResult::new(result, source, reply)))
            .is_err()
        {
            tracing::warn!("Inbox worker stopped, discovery result {} dropped", thing_uid);
        }
        async move { rx.await.unwrap_or(false) }
    }

    pub async fn remove(&self, thing_uid: ThingUID) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(InboxCommand::Remove(thing_uid, reply))?;
        Ok(rx.await?)
    }

    pub async fn remove_older_results(
        &self,
        source: String,
        timestamp: DateTime<Utc>,
        thing_type_uids: Vec<ThingTypeUID>,
        bridge_uid: Option<ThingUID>,
    ) -> Result<Vec<ThingUID>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(InboxCommand::RemoveOlder {
            source,
            timestamp,
            thing_type_uids,
            bridge_uid,
            reply,
        })?;
        Ok(rx.await?)
    }

    /// Remove results expired by `now`
    pub async fn expire(&self, now: DateTime<Utc>) -> Result<Vec<ThingUID>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(InboxCommand::Expire(now, reply))?;
        Ok(rx.await?)
    }

    /// Run one retry sweep over delayed results, returning how many still wait
    pub async fn retry(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(InboxCommand::Retry(reply))?;
        Ok(rx.await?)
    }

    /// Stop the worker; delayed results resolve as not added
    pub fn shutdown(&self) -> Result<()> {
        self.tx.send(InboxCommand::Shutdown)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::ThingKind;
    use crate::inbox::tests::{fixture, result, thing_type, uid};

    #[tokio::test]
    async fn test_add_resolves_true() {
        let f = fixture();
        let handle = InboxHandle::spawn(f.inbox.clone());

        assert!(handle.add(result("demo:dev:1")).await);
        assert_eq!(handle.inbox().get_all().len(), 1);
        assert!(handle.remove(uid("demo:dev:1")).await.unwrap());
        assert!(!handle.remove(uid("demo:dev:1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delayed_add_resolves_after_retry() {
        let f = fixture();
        let handle = InboxHandle::spawn(f.inbox.clone());

        let pending = tokio::spawn(handle.add(DiscoveryResult::builder(uid("late:dev:1")).build()));
        assert_eq!(handle.retry().await.unwrap(), 1);

        f.types.register(thing_type("late:dev", ThingKind::Thing));
        assert_eq!(handle.retry().await.unwrap(), 0);

        assert!(pending.await.unwrap());
        assert!(f.inbox.get(&uid("late:dev:1")).is_some());
    }

    #[tokio::test]
    async fn test_shutdown_fails_delayed_results() {
        let f = fixture();
        let handle = InboxHandle::spawn(f.inbox.clone());

        let pending = handle.add(DiscoveryResult::builder(uid("late:dev:1")).build());
        // the retry round trip guarantees the add was processed
        handle.retry().await.unwrap();
        handle.shutdown().unwrap();

        assert!(!pending.await);
        assert!(!handle.add(result("demo:dev:1")).await);
    }

    #[tokio::test]
    async fn test_expire_and_remove_older() {
        let f = fixture();
        let handle = InboxHandle::spawn(f.inbox.clone());
        let then = Utc::now() - chrono::Duration::minutes(10);

        let short_lived = DiscoveryResult::builder(uid("demo:dev:1"))
            .with_ttl(60)
            .with_timestamp(then)
            .build();
        assert!(handle.add(short_lived).await);
        let old = DiscoveryResult::builder(uid("demo:dev:2")).with_timestamp(then).build();
        assert!(handle.thing_discovered("scanner", old).await);

        assert_eq!(handle.expire(Utc::now()).await.unwrap(), vec![uid("demo:dev:1")]);

        let removed = handle
            .remove_older_results("scanner".to_string(), Utc::now(), vec!["demo:dev".parse().unwrap()], None)
            .await
            .unwrap();
        assert_eq!(removed, vec![uid("demo:dev:2")]);
        assert!(f.inbox.get_all().is_empty());
    }
}
