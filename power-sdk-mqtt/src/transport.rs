//! MQTT-over-TLS `Transport`. One physical device per instance; `send_frame`
//! serializes callers behind a request lock and hands the single in-flight
//! response off to whichever caller is waiting, via a `waiting`/`slot` pair
//! guarded by one mutex so the network thread's check-and-store is atomic
//! with respect to a caller's timeout or a concurrent disconnect.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use paho_mqtt as mqtt;
use power_sdk_core::error::TransportError;
use power_sdk_core::transport::Transport;

use crate::config::MqttConfig;
use crate::tls::{prepare_tls_material, TlsMaterial};

#[derive(Default)]
struct ResponseState {
    waiting: bool,
    slot: Option<Vec<u8>>,
    connected: bool,
}

/// State the message/disconnect callbacks need, kept behind an `Arc` so the
/// callbacks own a handle independent of `MqttTransport`'s address.
#[derive(Default)]
struct Shared {
    response: Mutex<ResponseState>,
    response_ready: Condvar,
}

impl Shared {
    /// The message callback's entire job: atomic check-and-store so a
    /// response can never land in the gap between a caller's timeout check
    /// and it clearing `waiting`.
    fn on_message(&self, payload: Vec<u8>) {
        let mut st = self.response.lock().expect("response state poisoned");
        if !st.waiting {
            return;
        }
        st.slot = Some(payload);
        self.response_ready.notify_all();
    }

    fn on_connection_lost(&self) {
        let mut st = self.response.lock().expect("response state poisoned");
        st.connected = false;
        self.response_ready.notify_all();
    }
}

pub struct MqttTransport {
    config: MqttConfig,
    client: Mutex<Option<mqtt::Client>>,
    request_lock: Mutex<()>,
    shared: Arc<Shared>,
    tls_material: Mutex<Option<TlsMaterial>>,
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        MqttTransport {
            config,
            client: Mutex::new(None),
            request_lock: Mutex::new(()),
            shared: Arc::new(Shared::default()),
            tls_material: Mutex::new(None),
        }
    }

    fn build_ssl_options(&self) -> Result<Option<(mqtt::SslOptions, TlsMaterial)>, TransportError> {
        match (&self.config.pfx_cert, &self.config.cert_password) {
            (Some(pfx_path), Some(password)) => {
                let material = prepare_tls_material(std::path::Path::new(pfx_path), password)?;
                let ssl_opts = mqtt::SslOptionsBuilder::new()
                    .key_store(material.cert_path())
                    .map_err(|e| TransportError::TlsSetupFailed(format!("key_store: {e}")))?
                    .private_key(material.key_path())
                    .map_err(|e| TransportError::TlsSetupFailed(format!("private_key: {e}")))?
                    .enable_server_cert_auth(true)
                    .finalize();
                Ok(Some((ssl_opts, material)))
            }
            _ if self.config.allow_insecure => {
                warn!("connecting without TLS (allow_insecure=true); do not use in production");
                Ok(None)
            }
            _ => Err(TransportError::TlsSetupFailed(
                "no TLS certificate provided; pass pfx_cert + cert_password or set allow_insecure=true".to_string(),
            )),
        }
    }

    fn scheme(&self) -> &'static str {
        if self.config.pfx_cert.is_some() {
            "ssl"
        } else {
            "tcp"
        }
    }
}

impl Transport for MqttTransport {
    fn connect(&self) -> Result<(), TransportError> {
        info!("connecting to mqtt broker {}:{}", self.config.broker, self.config.port);

        let ssl_setup = self.build_ssl_options()?;

        let create_opts = mqtt::CreateOptionsBuilder::new()
            .server_uri(format!("{}://{}:{}", self.scheme(), self.config.broker, self.config.port))
            .client_id(self.config.client_id())
            .finalize();
        let mut cli = mqtt::Client::new(create_opts)
            .map_err(|e| TransportError::ConnectFailed(format!("client init: {e}")))?;

        cli.set_message_callback({
            let shared = Arc::clone(&self.shared);
            move |_cli, msg| {
                let Some(msg) = msg else { return };
                debug!("received message on {}", msg.topic());
                shared.on_message(msg.payload().to_vec());
            }
        });

        cli.set_connection_lost_callback({
            let shared = Arc::clone(&self.shared);
            move |_cli| shared.on_connection_lost()
        });

        let mut conn_builder = mqtt::ConnectOptionsBuilder::new();
        conn_builder.keep_alive_interval(self.config.keepalive).clean_session(true);
        let (ssl_opts, material) = match ssl_setup {
            Some((opts, material)) => (Some(opts), Some(material)),
            None => (None, None),
        };
        if let Some(ssl_opts) = ssl_opts {
            conn_builder.ssl_options(ssl_opts);
        }
        let conn_opts = conn_builder.finalize();

        if let Err(e) = cli.connect(conn_opts) {
            return Err(TransportError::ConnectFailed(e.to_string()));
        }

        if let Err(e) = cli.subscribe(self.config.sub_topic(), 1) {
            let _ = cli.disconnect(None);
            return Err(TransportError::ConnectFailed(format!("subscribe failed: {e}")));
        }
        info!("subscribed to {}", self.config.sub_topic());

        {
            let mut st = self.shared.response.lock().expect("response state poisoned");
            st.connected = true;
            st.waiting = false;
            st.slot = None;
        }
        *self.client.lock().expect("client mutex poisoned") = Some(cli);
        *self.tls_material.lock().expect("tls material mutex poisoned") = material;

        info!("connected to mqtt broker");
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        info!("disconnecting from mqtt broker");
        // Serialize with any in-flight send_frame the same way the Python
        // transport does: a send_frame blocked in the response wait is woken
        // by the connection-lost callback firing `connected = false`, so it
        // fails fast here rather than deadlocking this call.
        let _guard = self.request_lock.lock().expect("request lock poisoned");

        if let Some(cli) = self.client.lock().expect("client mutex poisoned").take() {
            if cli.is_connected() {
                let _ = cli.unsubscribe(self.config.sub_topic());
                let _ = cli.disconnect(None);
            }
        }

        *self.tls_material.lock().expect("tls material mutex poisoned") = None;
        let mut st = self.shared.response.lock().expect("response state poisoned");
        st.connected = false;
        st.waiting = false;
        st.slot = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.response.lock().expect("response state poisoned").connected
    }

    fn send_frame(&self, frame: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let _request_guard = self.request_lock.lock().expect("request lock poisoned");

        {
            let mut st = self.shared.response.lock().expect("response state poisoned");
            if !st.connected {
                return Err(TransportError::NotConnected);
            }
            st.waiting = true;
            st.slot = None;
        }

        let result = self.send_and_wait(frame, timeout);

        // Always clear `waiting`, mirroring the Python transport's finally
        // block: a late response after this point is discarded by the
        // message callback instead of being attributed to a future caller.
        self.shared.response.lock().expect("response state poisoned").waiting = false;
        result
    }
}

impl MqttTransport {
    fn send_and_wait(&self, frame: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        {
            let client_guard = self.client.lock().expect("client mutex poisoned");
            let cli = client_guard.as_ref().ok_or(TransportError::NotConnected)?;
            let msg = mqtt::MessageBuilder::new()
                .topic(self.config.pub_topic())
                .payload(frame)
                .qos(1)
                .finalize();
            cli.publish(msg)
                .map_err(|e| TransportError::PublishRejected(e.to_string()))?;
        }
        debug!("published {} bytes to {}", frame.len(), self.config.pub_topic());

        let guard = self.shared.response.lock().expect("response state poisoned");
        let (mut guard, timeout_result) = self
            .shared
            .response_ready
            .wait_timeout_while(guard, timeout, |st| st.connected && st.slot.is_none())
            .expect("response state poisoned");

        if !guard.connected {
            return Err(TransportError::ConnectionLost);
        }
        if timeout_result.timed_out() && guard.slot.is_none() {
            return Err(TransportError::ResponseTimeout);
        }
        guard.slot.take().ok_or(TransportError::ResponseTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_is_rejected_before_publish() {
        let cfg = MqttConfig {
            broker: "broker.example".to_string(),
            port: 8883,
            device_sn: "SN1".to_string(),
            pfx_cert: None,
            cert_password: None,
            keepalive: Duration::from_secs(60),
            allow_insecure: true,
        };
        let transport = MqttTransport::new(cfg);
        assert!(!transport.is_connected());
        let err = transport.send_frame(&[1, 3, 0, 0, 0, 1], Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[test]
    fn response_filtering_discards_when_not_waiting() {
        let shared = Shared::default();
        {
            let mut st = shared.response.lock().unwrap();
            st.connected = true;
            st.waiting = false;
        }
        shared.on_message(vec![0xde, 0xad]);
        assert!(shared.response.lock().unwrap().slot.is_none());

        shared.response.lock().unwrap().waiting = true;
        shared.on_message(vec![0xbe, 0xef]);
        assert_eq!(shared.response.lock().unwrap().slot, Some(vec![0xbe, 0xef]));
    }

    /// Two callers never overlap: the second's request-lock acquisition (and
    /// hence its `waiting = true`) cannot happen until the first has cleared
    /// it, so a response can never be attributed to the wrong caller.
    #[test]
    fn single_in_flight_serializes_waiting_callers() {
        use std::thread;

        let shared = Arc::new(Shared::default());
        shared.response.lock().unwrap().connected = true;
        let request_lock = Arc::new(Mutex::new(()));
        let order = Arc::new(Mutex::new(Vec::new()));

        let run = |shared: Arc<Shared>, request_lock: Arc<Mutex<()>>, order: Arc<Mutex<Vec<&'static str>>>, who: &'static str, reply: u8| {
            move || {
                let _guard = request_lock.lock().unwrap();
                {
                    let mut st = shared.response.lock().unwrap();
                    st.waiting = true;
                    st.slot = None;
                }
                order.lock().unwrap().push(who);
                let guard = shared.response.lock().unwrap();
                let (mut guard, timed_out) = shared
                    .response_ready
                    .wait_timeout_while(guard, Duration::from_millis(500), |st| st.slot.is_none())
                    .unwrap();
                assert!(!timed_out.timed_out());
                assert_eq!(guard.slot.take(), Some(vec![reply]));
                guard.waiting = false;
            }
        };

        let t1 = thread::spawn(run(Arc::clone(&shared), Arc::clone(&request_lock), Arc::clone(&order), "a", 1));
        thread::sleep(Duration::from_millis(20));
        shared.on_message(vec![1]);
        t1.join().unwrap();

        let t2 = thread::spawn(run(Arc::clone(&shared), Arc::clone(&request_lock), Arc::clone(&order), "b", 2));
        thread::sleep(Duration::from_millis(20));
        shared.on_message(vec![2]);
        t2.join().unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn missing_tls_material_without_allow_insecure_is_fatal() {
        let cfg = MqttConfig {
            broker: "broker.example".to_string(),
            port: 8883,
            device_sn: "SN1".to_string(),
            pfx_cert: None,
            cert_password: None,
            keepalive: Duration::from_secs(60),
            allow_insecure: false,
        };
        let transport = MqttTransport::new(cfg);
        let err = transport.build_ssl_options().unwrap_err();
        assert!(matches!(err, TransportError::TlsSetupFailed(_)));
    }
}
