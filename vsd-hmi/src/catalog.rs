use serde::{Deserialize, Serialize};

/// Mapping from a semantic process-variable name to the backend register key
/// it reads and the unit it is displayed with. Entries are defined at startup
/// and never change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub key: String,

    #[serde(default)]
    pub unit: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagCatalog {
    tags: Vec<Tag>,
}

impl TagCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<N, K, U>(&mut self, name: N, key: K, unit: U)
    where
        N: Into<String>,
        K: Into<String>,
        U: Into<String>,
    {
        self.tags.push(Tag {
            name: name.into(),
            key: key.into(),
            unit: unit.into(),
        });
    }

    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name == name)
    }

    pub fn key_for(&self, name: &str) -> Option<&str> {
        self.get(name).map(|t| t.key.as_str())
    }

    /// Display unit for a tag; empty when the tag has none (or is unknown).
    pub fn unit_for(&self, name: &str) -> &str {
        self.get(name).map(|t| t.unit.as_str()).unwrap_or("")
    }

    /// Reverse lookup used when mapping batch-read responses back to tags.
    pub fn name_for_key(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// The register map shipped with the VSD gateway.
    pub fn vsd_default() -> Self {
        let mut catalog = Self::new();

        catalog.insert("firmware_version", "fw_ver_code", "");
        catalog.insert("firmware_release", "fw_rel_code", "");

        catalog.insert("overcurrent", "vsd_ol_setpoint_0", "A");
        catalog.insert("undercurrent", "vsd_ul_setpoint", "A");

        catalog.insert("supply_voltage", "vsd_supply_voltage", "V");
        catalog.insert("temperature", "vsd_temperature", "°C");

        catalog.insert("motor_rpm", "vsd_motor_rpm", "RPM");
        catalog.insert("target_frequency", "vsd_target_freq", "Hz");
        catalog.insert("maximum_speed", "vsd_max_speed", "Hz");
        catalog.insert("output_frequency", "vsd_frequency_out", "Hz");
        catalog.insert("output_voltage", "vsd_volts_out", "V");
        catalog.insert("output_current", "vsd_current", "A");
        catalog.insert("motor_current", "vsd_motor_current", "A");

        catalog.insert("intake_pressure", "dht_intake_pressure", "psi");
        catalog.insert("discharge_pressure", "dht_discharge_pressure", "psi");
        catalog.insert("intake_temperature", "dht_intake_temp", "°C");
        catalog.insert("motor_temperature", "dht_motor_temp", "°C");
        catalog.insert("vibration", "dht_vibration", "g");

        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_work_both_ways() {
        let catalog = TagCatalog::vsd_default();
        assert_eq!(catalog.key_for("temperature"), Some("vsd_temperature"));
        assert_eq!(catalog.name_for_key("vsd_temperature"), Some("temperature"));
        assert_eq!(catalog.unit_for("temperature"), "°C");
        assert_eq!(catalog.key_for("nonexistent"), None);
    }

    #[test]
    fn unit_defaults_to_empty() {
        let catalog = TagCatalog::vsd_default();
        assert_eq!(catalog.unit_for("firmware_version"), "");
        assert_eq!(catalog.unit_for("nonexistent"), "");
    }

    #[test]
    fn deserializes_with_optional_unit() {
        let json = r#"[{"name": "temperature", "key": "vsd_temperature", "unit": "°C"},
                       {"name": "status_word", "key": "vsd_status"}]"#;
        let catalog: TagCatalog = serde_json::from_str(json).unwrap();
        assert_eq!(catalog.unit_for("temperature"), "°C");
        assert_eq!(catalog.unit_for("status_word"), "");
    }
}
