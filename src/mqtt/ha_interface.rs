use serde::Serialize;
use super::TOPIC_BASE;

#[derive(Serialize)]
pub struct HaDevice {
    ids: String,
    name: String,
    manufacturer: String,
    model: String,
}

#[derive(Serialize)]
pub struct HaOrigin {
    pub name: String,
    pub sw_version: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub support_url: String,
}

fn is_none_str(value: &String) -> bool {
    if value.is_empty() || value == "NONE" {
        return true;
    }
    return false;
}

#[derive(Serialize)]
pub struct HaComponent {
    pub p: String,
    pub name: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub device_class: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub unit_of_measurement: String,
    pub value_template: String,
    pub unique_id: String,
    pub object_id: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub state_class: String,
}

impl HaComponent {
    /// Sensor reading `name` from the device state topic. Pass "NONE" to leave out an attribute.
    pub fn new(device: String, dclass: String, uof: String, proto: String, name: String, state_class: String) -> Self {

        let safe_name = name.replace(" ", "_");

        return HaComponent {
            p: "sensor".to_string(),
            name: name.clone(),
            device_class: dclass,
            unit_of_measurement: uof,
            value_template: format!("{{{{ value_json.{name} }}}}"),
            unique_id: format!("k2m_{proto}_{device}_{safe_name}").to_lowercase(),
            object_id: format!("{device}_{safe_name}").to_lowercase(),
            state_class: state_class,
        }
    }

    /// For values the device sends multiplied by `scale`.
    pub fn set_scale(&mut self, scale: u32) {
        if scale > 1 {
            self.value_template = format!("{{{{ value_json.{} / {} }}}}", self.name, scale);
        }
    }
}

#[derive(Serialize)]
pub struct HaDiscover {
    pub dev: HaDevice,
    pub o: HaOrigin,
    pub cmps: serde_json::Map<String, serde_json::Value>,
    pub state_topic: String,
    pub qos: u32,
    #[serde(skip_serializing)]
    pub discover_topic: String,
}

impl HaDiscover {
    pub fn new(name: String, manu: String, model: String, proto: String) -> Self {
        return HaDiscover {
            discover_topic: format!("homeassistant/device/k2m_{}-{}/config", proto, name),
            dev: HaDevice {
                ids: format!("k2m_{}_{}", proto, name),
                name: name.clone(),
                manufacturer: manu,
                model: model,
            },
            o: HaOrigin {
                name: "kaco2mqtt".to_string(),
                sw_version: env!("CARGO_PKG_VERSION").to_string(),
                support_url: env!("CARGO_PKG_HOMEPAGE").to_string()
            },
            cmps: serde_json::Map::new(),
            state_topic: format!("{}/devs/{}/{}", TOPIC_BASE, proto, name),
            qos: 2
        }
    }

    pub fn get_dev_id(&self) -> String {
        return self.dev.ids.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_skips_none() {
        let cmp = HaComponent::new("roof_1".to_string(), "NONE".to_string(), "NONE".to_string(),
                                   "Kaco".to_string(), "status".to_string(), "measurement".to_string());
        let v = serde_json::to_value(&cmp).unwrap();
        assert!(v.get("device_class").is_none());
        assert!(v.get("unit_of_measurement").is_none());
        assert_eq!(v["state_class"], serde_json::json!("measurement"));
        assert_eq!(v["value_template"], serde_json::json!("{{ value_json.status }}"));
        assert_eq!(v["unique_id"], serde_json::json!("k2m_kaco_roof_1_status"));
    }

    #[test]
    fn test_component_scale() {
        let mut cmp = HaComponent::new("roof_1".to_string(), "voltage".to_string(), "V".to_string(),
                                       "Kaco".to_string(), "u_dc".to_string(), "measurement".to_string());
        cmp.set_scale(1);
        assert_eq!(cmp.value_template, "{{ value_json.u_dc }}");
        cmp.set_scale(10);
        assert_eq!(cmp.value_template, "{{ value_json.u_dc / 10 }}");
    }

    #[test]
    fn test_discover_topics() {
        let disc = HaDiscover::new("roof_1".to_string(), "Kaco".to_string(), "Powador".to_string(), "Kaco".to_string());
        assert_eq!(disc.discover_topic, "homeassistant/device/k2m_Kaco-roof_1/config");
        assert_eq!(disc.state_topic, "kaco2mqtt/devs/Kaco/roof_1");
        assert_eq!(disc.get_dev_id(), "k2m_Kaco_roof_1");

        let v = serde_json::to_value(&disc).unwrap();
        assert!(v.get("discover_topic").is_none());
        assert_eq!(v["dev"]["manufacturer"], serde_json::json!("Kaco"));
    }
}
