use std::{
    collections::{HashMap, VecDeque},
    mem,
    time::Duration,
};

use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use k8s_openapi::api::core::v1::Secret;
use kube::{
    Api, Client,
    runtime::{WatchStreamExt, reflector::ObjectRef, watcher},
};
use tokio::time::{Instant, sleep_until};
use tracing::{error, info, warn};

use crate::annotations::dockercfg_field_selector;

/// A feed of deleted dockercfg secrets, each carrying its last known state.
pub trait DeletionSource: Send + Sync + 'static {
    fn deletions(&self) -> BoxStream<'static, Secret>;
}

/// Local copy of the watched secrets.
///
/// A watcher that reconnects re-lists instead of replaying the deletes it
/// missed, so once a re-list finishes every cached secret absent from it is
/// reported as deleted.
#[derive(Default)]
pub struct SecretCache {
    secrets: HashMap<ObjectRef<Secret>, Secret>,
    relisting: Option<HashMap<ObjectRef<Secret>, Secret>>,
}

impl SecretCache {
    /// Folds in one watcher event and returns the deletions it implies.
    pub fn apply(&mut self, event: watcher::Event<Secret>) -> Vec<Secret> {
        match event {
            watcher::Event::Apply(secret) => {
                self.secrets.insert(ObjectRef::from_obj(&secret), secret);
                Vec::new()
            }
            watcher::Event::Delete(secret) => {
                self.secrets.remove(&ObjectRef::from_obj(&secret));
                vec![secret]
            }
            watcher::Event::Init => {
                self.relisting = Some(HashMap::new());
                Vec::new()
            }
            watcher::Event::InitApply(secret) => {
                let target = self.relisting.as_mut().unwrap_or(&mut self.secrets);
                target.insert(ObjectRef::from_obj(&secret), secret);
                Vec::new()
            }
            watcher::Event::InitDone => {
                let Some(listed) = self.relisting.take() else {
                    return Vec::new();
                };
                let previous = mem::replace(&mut self.secrets, listed);
                previous
                    .into_iter()
                    .filter(|(key, _)| !self.secrets.contains_key(key))
                    .map(|(_, secret)| secret)
                    .collect()
            }
        }
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<&Secret> {
        self.secrets
            .get(&ObjectRef::<Secret>::new(name).within(namespace))
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

type SecretEvents = BoxStream<'static, Result<watcher::Event<Secret>, watcher::Error>>;

fn secret_watcher(api: &Api<Secret>) -> SecretEvents {
    let config = watcher::Config::default().fields(&dockercfg_field_selector());
    watcher(api.clone(), config).default_backoff().boxed()
}

/// Watches dockercfg secrets across all namespaces.
pub struct KubeDeletionSource {
    api: Api<Secret>,
    resync: Option<Duration>,
}

impl KubeDeletionSource {
    /// `resync` recreates the watch on that period, forcing a full re-list.
    /// `None` keeps one watch for as long as the stream lives.
    pub fn new(client: Client, resync: Option<Duration>) -> Self {
        Self {
            api: Api::all(client),
            resync,
        }
    }
}

impl DeletionSource for KubeDeletionSource {
    fn deletions(&self) -> BoxStream<'static, Secret> {
        let api = self.api.clone();
        deletion_stream(move || secret_watcher(&api), self.resync)
    }
}

/// Turns watcher event streams opened by `open` into deleted secrets.
///
/// A new stream is opened every `resync` period and whenever the current one
/// ends. Watch errors are logged and skipped.
fn deletion_stream<F>(open: F, resync: Option<Duration>) -> BoxStream<'static, Secret>
where
    F: Fn() -> SecretEvents + Send + 'static,
{
    let state = WatchState {
        events: open(),
        open: Box::new(open),
        resync,
        next_resync: resync.map(|period| Instant::now() + period),
        cache: SecretCache::default(),
        pending: VecDeque::new(),
    };

    stream::unfold(state, |mut state| async move {
        let secret = state.next_deletion().await;
        Some((secret, state))
    })
    .boxed()
}

struct WatchState {
    open: Box<dyn Fn() -> SecretEvents + Send>,
    events: SecretEvents,
    resync: Option<Duration>,
    next_resync: Option<Instant>,
    cache: SecretCache,
    pending: VecDeque<Secret>,
}

impl WatchState {
    async fn next_deletion(&mut self) -> Secret {
        loop {
            if let Some(secret) = self.pending.pop_front() {
                return secret;
            }

            let deadline = self.next_resync;
            let resync = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = resync => {
                    info!(cached = self.cache.len(), "Resyncing dockercfg secrets");
                    self.restart();
                }

                event = self.events.next() => match event {
                    Some(Ok(event)) => self.pending.extend(self.cache.apply(event)),
                    Some(Err(e)) => error!("Secret watcher error: {}", e),
                    None => {
                        warn!("Secret watch ended, restarting");
                        self.restart();
                    }
                },
            }
        }
    }

    fn restart(&mut self) {
        self.events = (self.open)();
        self.next_resync = self.resync.map(|period| Instant::now() + period);
    }
}
