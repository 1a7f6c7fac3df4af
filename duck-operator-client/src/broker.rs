use std::collections::HashMap;
use std::sync::Arc;

use futures::{pin_mut, Stream, StreamExt, TryStreamExt};
use kube::api::Api;
use kube::core::{ApiResource, DynamicObject};
use kube::runtime::watcher::{self, Event};
use kube::Client;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use duck_operator_common::telemetry::{info, warn};
use duck_operator_controller::crd::v1::duck::{duck_api_resource, Duck};
use duck_operator_controller::crd::v1::duck_type::DuckType;

/// A member-kind event: the concrete object, delivered advisorily. Consumers
/// are level triggered and read current state rather than the payload, so a
/// dropped event only delays convergence until the next resync.
pub type DuckEvent = Arc<DynamicObject>;

const SUBSCRIBER_BUFFER: usize = 5;

/// Per-DuckType fanout of member-kind events.
///
/// The broker watches the DuckType's duck kind and, for every Ready duck,
/// the duck's member kind; each member event is published to every
/// subscriber. Delivery is non-blocking: a subscriber whose buffer is full
/// misses the event, a subscriber whose receiver is dropped is removed.
/// Implementations must not switch to blocking sends; a slow subscriber is
/// a fault, not a stall source.
pub struct Broker {
    name: String,
    publish_tx: mpsc::Sender<DuckEvent>,
    subscribe_tx: mpsc::Sender<mpsc::Sender<DuckEvent>>,
    cancel: CancellationToken,
}

impl Broker {
    /// Start a broker for all member kinds of the given duck type. The
    /// broker runs until `shutdown` is called or it is dropped.
    pub fn new(client: Client, duck_type: &DuckType) -> Self {
        let name = format!("{}Broker", duck_type.spec.kind);
        let (publish_tx, publish_rx) = mpsc::channel(1);
        let (subscribe_tx, subscribe_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        tokio::spawn(fanout(cancel.clone(), subscribe_rx, publish_rx));
        tokio::spawn(manage_watchers(
            client,
            duck_api_resource(duck_type),
            publish_tx.clone(),
            cancel.clone(),
            name.clone(),
        ));

        Broker {
            name,
            publish_tx,
            subscribe_tx,
            cancel,
        }
    }

    /// Register a subscriber. The subscription is removed once the returned
    /// receiver is dropped; events queued past its buffer are dropped.
    pub async fn subscribe(&self) -> mpsc::Receiver<DuckEvent> {
        info!(event = "Subscribe", broker = self.name.as_str());

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let _ = self.subscribe_tx.send(tx).await;
        rx
    }

    /// Subscribe as a stream of events.
    pub async fn stream(&self) -> impl Stream<Item = DuckEvent> {
        let rx = self.subscribe().await;
        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
    }

    /// Subscribe as a re-enqueue source: every member event yields the
    /// single logical owner handed in, whatever the event carried.
    pub async fn tracked_stream<T: Clone>(&self, owner: T) -> impl Stream<Item = T> {
        self.stream().await.map(move |_| owner.clone())
    }

    /// Publish an event to every subscriber.
    pub async fn publish(&self, event: DuckEvent) {
        let _ = self.publish_tx.send(event).await;
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The fanout loop is the sole owner of the subscriber set; registrations
/// and events only reach it over channels. Registrations are drained before
/// deliveries.
async fn fanout(
    cancel: CancellationToken,
    mut subscribe_rx: mpsc::Receiver<mpsc::Sender<DuckEvent>>,
    mut publish_rx: mpsc::Receiver<DuckEvent>,
) {
    let mut subscribers: Vec<mpsc::Sender<DuckEvent>> = vec![];

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            subscriber = subscribe_rx.recv() => match subscriber {
                Some(subscriber) => subscribers.push(subscriber),
                None => return,
            },
            event = publish_rx.recv() => match event {
                Some(event) => {
                    subscribers.retain(|subscriber| match subscriber.try_send(event.clone()) {
                        Ok(()) => true,
                        // buffer full: drop the event for this subscriber
                        Err(TrySendError::Full(_)) => true,
                        Err(TrySendError::Closed(_)) => false,
                    });
                }
                None => return,
            },
        }
    }
}

/// Watch the duck kind and maintain one member watcher per Ready duck,
/// keyed by duck name. The map is owned by this task alone; duck events
/// are the only thing that opens or closes member watchers.
async fn manage_watchers(
    client: Client,
    resource: ApiResource,
    publish: mpsc::Sender<DuckEvent>,
    cancel: CancellationToken,
    name: String,
) {
    info!(event = "Starting", broker = name.as_str());

    let api: Api<DynamicObject> = Api::all_with(client.clone(), &resource);
    let ducks = watcher::watcher(api, watcher::Config::default());
    pin_mut!(ducks);

    let mut members: HashMap<String, CancellationToken> = HashMap::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = ducks.try_next() => match event {
                Ok(Some(Event::Apply(obj) | Event::InitApply(obj))) => {
                    inform_on(&client, &publish, &cancel, &mut members, &obj, &name);
                }
                Ok(Some(Event::Delete(obj))) => {
                    let duck_name = obj.metadata.name.clone().unwrap_or_default();
                    if let Some(member) = members.remove(&duck_name) {
                        info!(
                            event = "StoppingDuckWatch",
                            broker = name.as_str(),
                            duck = duck_name.as_str()
                        );
                        member.cancel();
                    }
                }
                Ok(Some(Event::Init | Event::InitDone)) => {}
                Ok(None) => break,
                Err(err) => {
                    // the watcher restarts itself, the error is advisory
                    warn!(event = "DuckWatchError", broker = name.as_str(), error = %err);
                }
            },
        }
    }

    for (_, member) in members.drain() {
        member.cancel();
    }
    info!(event = "Stopped", broker = name.as_str());
}

/// Open a member watcher for a duck, unless one is already open for its
/// name or the duck is not Ready.
fn inform_on(
    client: &Client,
    publish: &mpsc::Sender<DuckEvent>,
    cancel: &CancellationToken,
    members: &mut HashMap<String, CancellationToken>,
    obj: &DynamicObject,
    broker: &str,
) {
    let duck = match Duck::from_dynamic(obj) {
        Ok(duck) => duck,
        Err(err) => {
            warn!(event = "MalformedDuck", broker = broker, error = %err);
            return;
        }
    };

    if members.contains_key(duck.name()) {
        // already watching
        return;
    }
    if !duck.is_ready() {
        // not ready
        return;
    }

    info!(event = "StartingDuckWatch", broker = broker, duck = duck.name());

    let member = cancel.child_token();
    members.insert(duck.name().to_string(), member.clone());
    tokio::spawn(watch_member(
        client.clone(),
        duck.member_api_resource(),
        publish.clone(),
        member,
    ));
}

/// Publish every add, update, and delete of a member kind until cancelled.
async fn watch_member(
    client: Client,
    resource: ApiResource,
    publish: mpsc::Sender<DuckEvent>,
    cancel: CancellationToken,
) {
    let api: Api<DynamicObject> = Api::all_with(client, &resource);
    let events = watcher::watcher(api, watcher::Config::default());
    pin_mut!(events);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.try_next() => match event {
                Ok(Some(Event::Apply(obj) | Event::InitApply(obj) | Event::Delete(obj))) => {
                    if publish.send(Arc::new(obj)).await.is_err() {
                        return;
                    }
                }
                Ok(Some(Event::Init | Event::InitDone)) => {}
                Ok(None) => return,
                Err(err) => warn!(event = "MemberWatchError", error = %err),
            },
        }
    }
}
