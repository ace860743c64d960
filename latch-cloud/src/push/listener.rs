use crate::push::{PUSH_TOPIC_PREFIX, PushConfig, PushMessage};
use rumqttc::{Client, ConnectReturnCode, ConnectionError, Event, MqttOptions, Packet, QoS};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Identifies one registered callback for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

type Callback = Box<dyn Fn(&PushMessage) + Send>;

#[derive(Default)]
struct ListenerRegistry {
    next_id: u64,
    callbacks: HashMap<u64, Callback>,
}

impl ListenerRegistry {
    fn add(&mut self, callback: Callback) -> ListenerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.callbacks.insert(id, callback);
        ListenerHandle(id)
    }

    fn remove(&mut self, handle: ListenerHandle) -> bool {
        self.callbacks.remove(&handle.0).is_some()
    }
}

/// Per-device push subscription
///
/// 每台设备一个后台线程, 负责保持 MQTT 订阅并把解码后的消息
/// 派发给注册的回调. Dropped connections are retried with exponential
/// backoff; a healthy connection is torn down and rebuilt on a fixed
/// period so the broker never sees a stale session.
pub struct PushListener {
    device_id: String,
    config: PushConfig,
    registry: Arc<Mutex<ListenerRegistry>>,
    running: Arc<AtomicBool>,
    live_client: Arc<Mutex<Option<Client>>>,
    stop_tx: Mutex<Option<Sender<()>>>,
}

impl PushListener {
    /// The device id doubles as the MQTT client id and completes the
    /// subscription topic.
    pub fn new(device_id: impl Into<String>, config: PushConfig) -> Self {
        Self {
            device_id: device_id.into(),
            config,
            registry: Arc::new(Mutex::new(ListenerRegistry::default())),
            running: Arc::new(AtomicBool::new(false)),
            live_client: Arc::new(Mutex::new(None)),
            stop_tx: Mutex::new(None),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Registers a callback for every decoded message of this device.
    /// The callback runs on the listener thread and must not block.
    pub fn add_listener(&self, callback: impl Fn(&PushMessage) + Send + 'static) -> ListenerHandle {
        lock_ignore_poison(&self.registry).add(Box::new(callback))
    }

    /// Removes a previously registered callback. Returns false when the
    /// handle was already removed.
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        lock_ignore_poison(&self.registry).remove(handle)
    }

    pub fn listener_count(&self) -> usize {
        lock_ignore_poison(&self.registry).callbacks.len()
    }

    /// Spawns the connection thread. Calling twice without an
    /// intervening [`stop`](Self::stop) is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!(device = %self.device_id, "push listener already running");
            return;
        }
        let (tx, rx) = channel();
        *lock_ignore_poison(&self.stop_tx) = Some(tx);
        let worker = PushWorker {
            device_id: self.device_id.clone(),
            config: self.config.clone(),
            registry: Arc::clone(&self.registry),
            running: Arc::clone(&self.running),
            live_client: Arc::clone(&self.live_client),
            stop_rx: rx,
        };
        thread::spawn(move || worker.run());
        tracing::info!(device = %self.device_id, "push listener started");
    }

    /// Stops the connection thread and drops every registered callback.
    ///
    /// Once this returns no callback will be invoked again: dispatch and
    /// the registry share one lock, so an in-flight batch has finished
    /// before the registry is cleared.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        lock_ignore_poison(&self.registry).callbacks.clear();
        if let Some(tx) = lock_ignore_poison(&self.stop_tx).take() {
            let _ = tx.send(());
        }
        if let Some(client) = lock_ignore_poison(&self.live_client).take() {
            let _ = client.disconnect();
        }
        tracing::info!(device = %self.device_id, "push listener stopped");
    }
}

/// How one connection cycle ended
enum CycleEnd {
    /// stop() was observed
    Stopped,
    /// Broker refused our credentials; reconnect right away
    AuthRejected,
    /// Healthy connection recycled on schedule
    Maintenance,
    /// Network or protocol failure
    Failed { was_connected: bool },
}

struct PushWorker {
    device_id: String,
    config: PushConfig,
    registry: Arc<Mutex<ListenerRegistry>>,
    running: Arc<AtomicBool>,
    live_client: Arc<Mutex<Option<Client>>>,
    stop_rx: Receiver<()>,
}

impl PushWorker {
    fn run(self) {
        let mut delay = self.config.reconnect_initial_delay;
        while self.running.load(Ordering::SeqCst) {
            match self.run_cycle() {
                CycleEnd::Stopped => break,
                CycleEnd::AuthRejected => {
                    tracing::warn!(
                        device = %self.device_id,
                        "push broker refused the connection, retrying with a fresh session"
                    );
                }
                CycleEnd::Maintenance => {
                    tracing::debug!(device = %self.device_id, "routine push reconnect");
                    delay = self.config.reconnect_initial_delay;
                }
                CycleEnd::Failed { was_connected } => {
                    if was_connected {
                        delay = self.config.reconnect_initial_delay;
                    }
                    tracing::warn!(
                        device = %self.device_id,
                        "push connection lost, retrying in {:?}", delay
                    );
                    if self.wait_or_stop(delay) {
                        break;
                    }
                    delay = next_backoff(delay, self.config.reconnect_max_delay);
                }
            }
        }
        tracing::debug!(device = %self.device_id, "push thread exiting");
    }

    /// Runs one connection from CONNECT to whatever ends it. A fresh
    /// client is built every cycle; the previous session is never reused.
    fn run_cycle(&self) -> CycleEnd {
        let mut options =
            MqttOptions::new(self.device_id.clone(), self.config.host.clone(), self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        options.set_credentials(self.config.username.clone(), self.config.password.clone());
        let (client, mut connection) = Client::new(options, 10);
        *lock_ignore_poison(&self.live_client) = Some(client.clone());

        let topic = format!("{}/{}", PUSH_TOPIC_PREFIX, self.device_id);
        let mut connected_at: Option<Instant> = None;
        let mut outcome = CycleEnd::Failed { was_connected: false };

        for event in connection.iter() {
            if !self.running.load(Ordering::SeqCst) {
                outcome = CycleEnd::Stopped;
                break;
            }
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::debug!(device = %self.device_id, topic = %topic, "push broker connected");
                    connected_at = Some(Instant::now());
                    if let Err(err) = client.subscribe(&topic, QoS::AtMostOnce) {
                        tracing::warn!(device = %self.device_id, "push subscribe failed: {err}");
                        outcome = CycleEnd::Failed { was_connected: true };
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    handle_payload(&self.registry, &self.device_id, &publish.payload);
                }
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(
                    code @ (ConnectReturnCode::NotAuthorized
                    | ConnectReturnCode::BadUserNamePassword),
                )) => {
                    tracing::warn!(device = %self.device_id, "push broker rejected auth: {code:?}");
                    outcome = CycleEnd::AuthRejected;
                    break;
                }
                Err(err) => {
                    tracing::warn!(device = %self.device_id, "push connection error: {err}");
                    outcome = CycleEnd::Failed {
                        was_connected: connected_at.is_some(),
                    };
                    break;
                }
            }
            if let Some(at) = connected_at
                && at.elapsed() >= self.config.maintenance_interval
            {
                outcome = CycleEnd::Maintenance;
                break;
            }
        }

        *lock_ignore_poison(&self.live_client) = None;
        let _ = client.disconnect();
        outcome
    }

    /// Sleeps for `delay`, cut short by stop(). Returns true to exit.
    fn wait_or_stop(&self, delay: Duration) -> bool {
        match self.stop_rx.recv_timeout(delay) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => !self.running.load(Ordering::SeqCst),
        }
    }
}

fn next_backoff(delay: Duration, max: Duration) -> Duration {
    (delay * 2).min(max)
}

/// Decodes a raw payload and dispatches it. Undecodable payloads and
/// messages without a data field are dropped. A panicking callback is
/// logged and does not stop the others.
fn handle_payload(registry: &Mutex<ListenerRegistry>, device_id: &str, payload: &[u8]) {
    let message: PushMessage = match serde_json::from_slice(payload) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(device = %device_id, "undecodable push payload: {err}");
            return;
        }
    };
    if message.data.is_none() {
        return;
    }
    tracing::debug!(device = %device_id, tag = %message.t, "push message received");
    let registry = lock_ignore_poison(registry);
    for (id, callback) in &registry.callbacks {
        if catch_unwind(AssertUnwindSafe(|| callback(&message))).is_err() {
            tracing::error!(device = %device_id, listener = id, "push listener panicked");
        }
    }
}

/// A panic inside a callback is caught before the guard drops, so a
/// poisoned registry still holds consistent data.
fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn collecting_listener(listener: &PushListener) -> Arc<Mutex<Vec<PushMessage>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        listener.add_listener(move |msg| sink.lock().unwrap().push(msg.clone()));
        seen
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let max = Duration::from_secs(60);
        let mut delay = Duration::from_secs(1);
        let mut sequence = Vec::new();
        for _ in 0..8 {
            sequence.push(delay.as_secs());
            delay = next_backoff(delay, max);
        }
        assert_eq!(sequence, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn dispatches_to_registered_listener() {
        let listener = PushListener::new("lock1", PushConfig::default());
        let seen = collecting_listener(&listener);
        handle_payload(
            &listener.registry,
            "lock1",
            br#"{"t":2,"data":{"battery":80,"unlocking":true}}"#,
        );
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let data = seen[0].data.as_ref().unwrap();
        assert_eq!(data.battery, Some(80));
        assert_eq!(data.unlocking, Some(true));
    }

    #[test]
    fn empty_data_and_garbage_are_dropped() {
        let listener = PushListener::new("lock1", PushConfig::default());
        let seen = collecting_listener(&listener);
        handle_payload(&listener.registry, "lock1", br#"{"t":2,"data":null}"#);
        handle_payload(&listener.registry, "lock1", br#"{"t":2}"#);
        handle_payload(&listener.registry, "lock1", b"not json");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn removed_listener_is_not_called() {
        let listener = PushListener::new("lock1", PushConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = listener.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(listener.remove_listener(handle));
        assert!(!listener.remove_listener(handle));
        handle_payload(&listener.registry, "lock1", br#"{"t":1,"data":{}}"#);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_listener_does_not_starve_the_rest() {
        let listener = PushListener::new("lock1", PushConfig::default());
        listener.add_listener(|_| panic!("boom"));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        listener.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle_payload(&listener.registry, "lock1", br#"{"t":1,"data":{}}"#);
        handle_payload(&listener.registry, "lock1", br#"{"t":1,"data":{}}"#);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stop_clears_listeners() {
        let listener = PushListener::new("lock1", PushConfig::default());
        let seen = collecting_listener(&listener);
        collecting_listener(&listener);
        assert_eq!(listener.listener_count(), 2);
        listener.stop();
        assert_eq!(listener.listener_count(), 0);
        handle_payload(&listener.registry, "lock1", br#"{"t":1,"data":{}}"#);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn stop_interrupts_a_listener_stuck_reconnecting() {
        // Port from a listener that is bound and immediately dropped, so
        // connects are refused and the worker sits in its backoff sleep.
        let port = {
            let sock = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            sock.local_addr().unwrap().port()
        };
        let config = PushConfig::default()
            .with_broker("127.0.0.1", port)
            .with_reconnect_delays(Duration::from_secs(30), Duration::from_secs(60));
        let listener = PushListener::new("lock1", config);
        listener.start();
        assert!(listener.is_running());
        thread::sleep(Duration::from_millis(200));
        let stopped_at = Instant::now();
        listener.stop();
        assert!(!listener.is_running());
        // stop() must not wait out the 30s backoff
        assert!(stopped_at.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn start_twice_is_a_no_op() {
        let port = {
            let sock = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            sock.local_addr().unwrap().port()
        };
        let listener =
            PushListener::new("lock1", PushConfig::default().with_broker("127.0.0.1", port));
        listener.start();
        listener.start();
        assert!(listener.is_running());
        listener.stop();
    }
}
