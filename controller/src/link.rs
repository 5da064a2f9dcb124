use std::time::Duration;

use irrigation_common::{
    error::LinkError,
    hal::{BrokerLink, ConnectOptions, LinkEvent},
};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, Incoming, LastWill, MqttOptions, QoS};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

const CLIENT_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const MAX_PACKET_BYTES: usize = 4 * 1024;

/// rumqttc-backed broker link. Each `connect` builds a fresh client and
/// event loop task; the task reports one terminal `Disconnected` and exits,
/// leaving reconnect pacing to the session.
pub struct RumqttLink {
    runtime: Handle,
    client: Option<AsyncClient>,
    task: Option<JoinHandle<()>>,
    events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
}

impl RumqttLink {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            client: None,
            task: None,
            events: None,
        }
    }

    fn client(&self) -> Result<&AsyncClient, LinkError> {
        self.client.as_ref().ok_or(LinkError::NotConnected)
    }
}

impl Drop for RumqttLink {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl BrokerLink for RumqttLink {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), LinkError> {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let mut mqtt_options =
            MqttOptions::new(options.client_id.clone(), options.host.clone(), options.port);
        mqtt_options.set_keep_alive(KEEP_ALIVE);
        mqtt_options.set_max_packet_size(MAX_PACKET_BYTES, MAX_PACKET_BYTES);
        if let Some(user) = &options.username {
            mqtt_options.set_credentials(
                user.clone(),
                options.password.clone().unwrap_or_default(),
            );
        }
        mqtt_options.set_last_will(LastWill::new(
            options.last_will.topic.clone(),
            options.last_will.payload.clone().into_bytes(),
            QoS::AtLeastOnce,
            options.last_will.retain,
        ));

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, CLIENT_CAPACITY);
        let (tx, rx) = mpsc::unbounded_channel();
        let target = format!("{}:{}", options.host, options.port);

        let task = self.runtime.spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            info!("mqtt connected to {target}");
                            let _ = tx.send(LinkEvent::Connected);
                        } else {
                            let _ = tx.send(LinkEvent::Disconnected(format!(
                                "connection refused: {:?}",
                                ack.code
                            )));
                            break;
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(message))) => {
                        let _ = tx.send(LinkEvent::Message {
                            topic: message.topic,
                            payload: message.payload.to_vec(),
                        });
                    }
                    Ok(Event::Incoming(Incoming::Disconnect)) => {
                        let _ = tx.send(LinkEvent::Disconnected("broker disconnect".to_string()));
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("mqtt poll error: {err}");
                        let _ = tx.send(LinkEvent::Disconnected(err.to_string()));
                        break;
                    }
                }
            }
        });

        self.client = Some(client);
        self.task = Some(task);
        self.events = Some(rx);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), LinkError> {
        self.client()?
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
            .map_err(|err| LinkError::Transport(err.to_string()))
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), LinkError> {
        debug!("subscribing to {topic}");
        self.client()?
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|err| LinkError::Transport(err.to_string()))
    }

    fn poll(&mut self) -> Option<LinkEvent> {
        self.events.as_mut()?.try_recv().ok()
    }
}
