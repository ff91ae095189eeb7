use crate::prelude::*;
use crate::growatt::registers::{DeviceFamily, RegisterCatalog};

use serde::Serialize;

/// Discovery message generator for one device. Entities come straight
/// from the register catalog's metadata; nothing here is hardcoded per
/// model.
pub struct Config<'a> {
    device_id: &'a str,
    family: DeviceFamily,
    catalog: &'a RegisterCatalog,
    prefix: String,
}

#[derive(Serialize)]
struct Device {
    identifiers: [String; 1],
    manufacturer: String,
    model: String,
    name: String,
}

#[derive(Serialize)]
struct Availability {
    topic: String,
}

#[derive(Serialize)]
struct Sensor {
    name: String,
    state_topic: String,
    unique_id: String,
    device: Device,
    availability: Availability,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
}

#[derive(Serialize)]
struct Number {
    name: String,
    state_topic: String,
    command_topic: String,
    unique_id: String,
    device: Device,
    availability: Availability,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
}

#[derive(Serialize)]
struct Switch {
    name: String,
    state_topic: String,
    command_topic: String,
    payload_on: String,
    payload_off: String,
    unique_id: String,
    device: Device,
    availability: Availability,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
}

#[derive(Serialize)]
struct Button {
    name: String,
    command_topic: String,
    payload_press: String,
    unique_id: String,
    device: Device,
    availability: Availability,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
}

impl<'a> Config<'a> {
    pub fn new(
        device_id: &'a str,
        family: DeviceFamily,
        catalog: &'a RegisterCatalog,
        prefix: &str,
    ) -> Self {
        Self {
            device_id,
            family,
            catalog,
            prefix: prefix.to_string(),
        }
    }

    /// All discovery messages for this device, retained so HA picks them
    /// up after restarts.
    pub fn all(&self) -> Result<Vec<mqtt::Message>> {
        let mut r = Vec::new();

        for (key, reg) in &self.catalog.input_registers {
            if !reg.homeassistant.publish {
                continue;
            }
            r.push(self.sensor(key, &reg.homeassistant)?);
        }

        for (key, reg) in &self.catalog.holding_registers {
            if !reg.homeassistant.publish {
                continue;
            }
            let ha = &reg.homeassistant;
            match ha.r#type.as_str() {
                "number" => r.push(self.number(key, ha)?),
                "switch" => r.push(self.switch(key, ha)?),
                "button" => r.push(self.button(key, ha)?),
                other => warn!("unsupported holding entity type {} for {}", other, key),
            }
        }

        Ok(r)
    }

    fn device(&self) -> Device {
        Device {
            identifiers: [format!("growatt_{}", self.device_id)],
            manufacturer: "Growatt".to_string(),
            model: self.family.name().to_uppercase(),
            name: format!("Growatt {}", self.device_id),
        }
    }

    fn availability(&self) -> Availability {
        Availability {
            topic: format!("{}/bridge/status", mqtt::STATE_PREFIX),
        }
    }

    fn config_topic(&self, component: &str, key: &str) -> String {
        format!(
            "{}/{}/growatt_{}/{}/config",
            self.prefix, component, self.device_id, key
        )
    }

    fn sensor(&self, key: &str, ha: &crate::growatt::registers::InputEntity) -> Result<mqtt::Message> {
        let payload = Sensor {
            name: ha.name.clone(),
            state_topic: format!("{}/{}/input/{}", mqtt::STATE_PREFIX, self.device_id, key),
            unique_id: format!("growatt_{}_{}", self.device_id, key),
            device: self.device(),
            availability: self.availability(),
            unit_of_measurement: ha.unit_of_measurement.clone(),
            device_class: ha.device_class.clone(),
            state_class: ha.state_class.clone(),
            icon: ha.icon.clone(),
        };
        Ok(mqtt::Message::retained(
            self.config_topic("sensor", key),
            serde_json::to_vec(&payload)?,
        ))
    }

    fn number(&self, key: &str, ha: &crate::growatt::registers::HoldingEntity) -> Result<mqtt::Message> {
        let payload = Number {
            name: ha.name.clone(),
            state_topic: format!("{}/{}/holding/{}", mqtt::STATE_PREFIX, self.device_id, key),
            command_topic: format!("{}/{}/holding/{}", mqtt::COMMAND_PREFIX, self.device_id, key),
            unique_id: format!("growatt_{}_{}", self.device_id, key),
            device: self.device(),
            availability: self.availability(),
            min: ha.min,
            max: ha.max,
            step: ha.step,
            unit_of_measurement: ha.unit_of_measurement.clone(),
            device_class: ha.device_class.clone(),
            icon: ha.icon.clone(),
        };
        Ok(mqtt::Message::retained(
            self.config_topic("number", key),
            serde_json::to_vec(&payload)?,
        ))
    }

    fn switch(&self, key: &str, ha: &crate::growatt::registers::HoldingEntity) -> Result<mqtt::Message> {
        let payload = Switch {
            name: ha.name.clone(),
            state_topic: format!("{}/{}/holding/{}", mqtt::STATE_PREFIX, self.device_id, key),
            command_topic: format!("{}/{}/holding/{}", mqtt::COMMAND_PREFIX, self.device_id, key),
            payload_on: "1".to_string(),
            payload_off: "0".to_string(),
            unique_id: format!("growatt_{}_{}", self.device_id, key),
            device: self.device(),
            availability: self.availability(),
            icon: ha.icon.clone(),
        };
        Ok(mqtt::Message::retained(
            self.config_topic("switch", key),
            serde_json::to_vec(&payload)?,
        ))
    }

    fn button(&self, key: &str, ha: &crate::growatt::registers::HoldingEntity) -> Result<mqtt::Message> {
        let payload = Button {
            name: ha.name.clone(),
            command_topic: format!("{}/{}/read/{}", mqtt::COMMAND_PREFIX, self.device_id, key),
            payload_press: "1".to_string(),
            unique_id: format!("growatt_{}_{}", self.device_id, key),
            device: self.device(),
            availability: self.availability(),
            icon: ha.icon.clone(),
        };
        Ok(mqtt::Message::retained(
            self.config_topic("button", key),
            serde_json::to_vec(&payload)?,
        ))
    }
}
