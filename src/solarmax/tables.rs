use serde::Deserialize;
use std::collections::BTreeMap;

/// Shown instead of an empty alarm list.
pub const NO_ALARMS: &str = "no further information";

/// Reported when an inverter does not answer a status query.
pub const OFFLINE: &str = "Offline";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Model {
    pub type_code: u64,
    pub description: String,
    pub max_watts: u32,
}

/// Lookup tables for device types, status codes and alarm bits.
///
/// Built once and handed to the client; nothing mutates them at runtime.
#[derive(Clone, Debug)]
pub struct Tables {
    models: BTreeMap<u64, Model>,
    status: BTreeMap<u32, &'static str>,
    alarms: BTreeMap<u32, &'static str>,
}

impl Default for Tables {
    fn default() -> Self {
        let models = [
            (20010, "SolarMax 2000S", 2000),
            (20020, "SolarMax 3000S", 3000),
            (20030, "SolarMax 4200S", 4200),
            (20040, "SolarMax 6000S", 6000),
        ]
        .into_iter()
        .map(|(type_code, description, max_watts)| {
            (
                type_code,
                Model {
                    type_code,
                    description: description.to_string(),
                    max_watts,
                },
            )
        })
        .collect();

        let status = BTreeMap::from([
            (20000, "No communication"),
            (20001, "Running"),
            (20002, "Irradiance too low"),
            (20003, "Starting up"),
            (20004, "MPP operation"),
            (20005, "Fan running"),
            (20006, "Maximum power operation"),
            (20007, "Temperature limiting"),
            (20008, "Mains operation"),
        ]);

        let alarms = BTreeMap::from([
            (1, "External fault 1"),
            (2, "Insulation fault DC side"),
            (4, "Earth fault current too high"),
            (8, "Midpoint earth fuse blown"),
            (16, "External alarm 2"),
            (32, "Long-term temperature limit"),
            (64, "AC feed-in fault"),
            (128, "External alarm 4"),
            (256, "Fan defective"),
            (512, "Fuse blown"),
            (1024, "Temperature sensor failure"),
            (2048, "Alarm 12"),
            (4096, "Alarm 13"),
            (8192, "Alarm 14"),
            (16384, "Alarm 15"),
            (32768, "Alarm 16"),
            (65536, "Alarm 17"),
        ]);

        Self {
            models,
            status,
            alarms,
        }
    }
}

impl Tables {
    /// Default tables extended (or overridden) by configured models.
    pub fn with_models(models: &[Model]) -> Self {
        let mut tables = Self::default();
        for model in models {
            tables.models.insert(model.type_code, model.clone());
        }
        tables
    }

    pub fn model(&self, type_code: u64) -> Option<&Model> {
        self.models.get(&type_code)
    }

    pub fn status(&self, code: u32) -> String {
        self.status
            .get(&code)
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("Unknown status {}", code))
    }

    /// One description per set bit, lowest bit first.
    pub fn alarms(&self, mask: u64) -> Vec<String> {
        if mask == 0 {
            return vec![NO_ALARMS.to_string()];
        }

        (0..u64::BITS)
            .map(|bit| 1u64 << bit)
            .filter(|value| mask & value != 0)
            .map(|value| {
                u32::try_from(value)
                    .ok()
                    .and_then(|v| self.alarms.get(&v))
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("Unknown alarm {:#X}", value))
            })
            .collect()
    }
}
