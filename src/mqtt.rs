use crate::prelude::*;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Publish, QoS};

/// Topic devices publish their scrambled frames on.
pub const DEVICE_UPLINK: &str = "c/#";

/// Topic prefix the bridge accepts plaintext commands on.
pub const COMMAND_PREFIX: &str = "growatt/cmd";

/// Topic prefix for decoded state published by the bridge.
pub const STATE_PREFIX: &str = "growatt";

// Message {{{

/// One MQTT publish in either direction. Device frames are binary, so the
/// payload is raw bytes; command and state payloads happen to be UTF-8.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: String, payload: Vec<u8>) -> Self {
        Self {
            topic,
            retain: false,
            payload,
        }
    }

    pub fn retained(topic: String, payload: Vec<u8>) -> Self {
        Self {
            topic,
            retain: true,
            payload,
        }
    }

    /// True for frames arriving straight from a device.
    pub fn is_device_uplink(&self) -> bool {
        self.topic.starts_with("c/")
    }

    pub fn is_command(&self) -> bool {
        self.topic.starts_with(COMMAND_PREFIX)
    }

    /// Command topic split into its parts after the prefix, e.g.
    /// `growatt/cmd/QMN.../output_power_limit` -> (device, ["output_power_limit"]).
    pub fn split_cmd_topic(&self) -> Result<(&str, Vec<&str>)> {
        let parts: Vec<&str> = self.topic.split('/').collect();
        if parts.len() < 4 {
            bail!("ignoring badly formed command topic: {}", self.topic);
        }
        Ok((parts[2], parts[3..].to_vec()))
    }

    pub fn payload_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|_| anyhow!("payload on {} is not UTF-8", self.topic))
    }

    pub fn payload_u16(&self) -> Result<u16> {
        self.payload_str()?
            .trim()
            .parse()
            .map_err(|err| anyhow!("payload_u16: {}", err))
    }

    pub fn payload_i32(&self) -> Result<i32> {
        self.payload_str()?
            .trim()
            .parse()
            .map_err(|err| anyhow!("payload_i32: {}", err))
    }
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

pub type Sender = broadcast::Sender<ChannelData>;

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    channels: Channels,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        let c = self.config.mqtt();

        let mut options = MqttOptions::new(&c.client_id, &c.host, c.port);

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);
        options.set_keep_alive(std::time::Duration::from_secs(60));
        // scrambled register dumps can exceed the default limits
        options.set_max_packet_size(1024 * 1024, 1024 * 1024);

        if let (Some(u), Some(p)) = (&c.username, &c.password) {
            options.set_credentials(u, p);
        }

        info!("initializing mqtt at {}:{}", c.host, c.port);

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(
            self.setup(client.clone()),
            self.receiver(eventloop),
            self.sender(client)
        )?;

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("stopping mqtt client");
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
        Ok(())
    }

    fn lwt_topic(&self) -> String {
        format!("{}/bridge/status", STATE_PREFIX)
    }

    async fn setup(&self, client: AsyncClient) -> Result<()> {
        client
            .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
            .await?;

        client.subscribe(DEVICE_UPLINK, QoS::AtMostOnce).await?;
        client
            .subscribe(format!("{}/#", COMMAND_PREFIX), QoS::AtMostOnce)
            .await?;

        Ok(())
    }

    // mqtt -> coordinator
    async fn receiver(&self, mut eventloop: EventLoop) -> Result<()> {
        let mut shutdown_rx = self.channels.to_mqtt.subscribe();

        loop {
            tokio::select! {
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            self.handle_message(publish)?;
                        }
                        Err(e) => {
                            error!("{}", e);
                            info!("reconnecting in 5s");
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                        _ => {} // keepalives etc
                    }
                }
                channel_data = shutdown_rx.recv() => {
                    if let Ok(ChannelData::Shutdown) = channel_data {
                        info!("mqtt receiver shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_message(&self, publish: Publish) -> Result<()> {
        let message = Message {
            topic: publish.topic,
            retain: publish.retain,
            payload: publish.payload.to_vec(),
        };
        debug!("RX: {} ({} bytes)", message.topic, message.payload.len());

        if self
            .channels
            .from_mqtt
            .send(ChannelData::Message(message))
            .is_err()
        {
            bail!("send(from_mqtt) failed - channel closed?");
        }

        Ok(())
    }

    // coordinator -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        let mut receiver = self.channels.to_mqtt.subscribe();

        loop {
            match receiver.recv().await? {
                ChannelData::Shutdown => {
                    let _ = client.disconnect().await;
                    break;
                }
                ChannelData::Message(message) => {
                    let payload_len = message.payload.len();
                    match client
                        .publish(
                            &message.topic,
                            QoS::AtLeastOnce,
                            message.retain,
                            message.payload,
                        )
                        .await
                    {
                        Ok(_) => debug!("TX: {} ({} bytes)", message.topic, payload_len),
                        Err(err) => error!("publish {} failed: {:?}", message.topic, err),
                    }
                }
            }
        }

        Ok(())
    }
}
