use crate::prelude::*;
use crate::solarmax::tables::Tables;

use serde::Serialize;
use std::collections::BTreeMap;

/// Fields queried to identify an inverter.
pub const DETECTION_FIELDS: [Field; 3] = [Field::Adr, Field::Typ, Field::Pin];

/// A detected inverter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InverterInfo {
    pub id: u8,
    pub description: String,
    pub rated_max_watts: u32,
    pub installed_watts: u32,
}

/// Configured inverter ids and the subset confirmed present.
///
/// The known map only ever holds the result of the latest detection pass; it
/// is cleared at the start of every pass rather than merged.
#[derive(Debug, Default)]
pub struct InverterRegistry {
    configured: Vec<u8>,
    known: BTreeMap<u8, InverterInfo>,
    detection_in_progress: bool,
}

impl InverterRegistry {
    pub fn new(configured: Vec<u8>) -> Self {
        Self {
            configured,
            ..Default::default()
        }
    }

    pub fn configured(&self) -> &[u8] {
        &self.configured
    }

    pub fn set_configured(&mut self, ids: Vec<u8>) {
        self.configured = ids;
    }

    pub fn known(&self) -> &BTreeMap<u8, InverterInfo> {
        &self.known
    }

    pub fn is_detecting(&self) -> bool {
        self.detection_in_progress
    }

    /// Start a pass. Returns false if one is already running.
    pub fn begin_detection(&mut self) -> bool {
        if self.detection_in_progress {
            return false;
        }
        self.known.clear();
        self.detection_in_progress = true;
        true
    }

    pub fn record(&mut self, info: InverterInfo) {
        self.known.insert(info.id, info);
    }

    /// End a pass. Returns true if every configured id was found.
    pub fn finish_detection(&mut self) -> bool {
        self.detection_in_progress = false;
        self.configured.iter().all(|id| self.known.contains_key(id))
    }

    /// Turn the reply to a `DETECTION_FIELDS` query into an `InverterInfo`.
    pub fn identify(tables: &Tables, requested: u8, response: &Response) -> Result<InverterInfo> {
        if response.inverter != requested {
            bail!(
                "inverter #{} answered as #{}",
                requested,
                response.inverter
            );
        }

        let type_code = response
            .get(Field::Typ)
            .and_then(FieldValue::as_integer)
            .ok_or_else(|| anyhow!("inverter #{} sent no usable TYP", requested))?;

        let Some(model) = tables.model(type_code) else {
            bail!("unknown inverter type {} (ID #{})", type_code, requested);
        };

        let installed = response
            .get(Field::Pin)
            .and_then(FieldValue::as_f64)
            .ok_or_else(|| anyhow!("inverter #{} sent no usable PIN", requested))?;

        Ok(InverterInfo {
            id: requested,
            description: model.description.clone(),
            rated_max_watts: model.max_watts,
            installed_watts: installed.round() as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: u8) -> InverterInfo {
        InverterInfo {
            id,
            description: "SolarMax 3000S".to_string(),
            rated_max_watts: 3000,
            installed_watts: 3200,
        }
    }

    #[test]
    fn detection_pass_replaces_known_map() {
        let mut registry = InverterRegistry::new(vec![1, 2]);

        assert!(registry.begin_detection());
        registry.record(info(1));
        registry.record(info(2));
        assert!(registry.finish_detection());

        assert!(registry.begin_detection());
        assert!(registry.known().is_empty());
        registry.record(info(2));
        assert!(!registry.finish_detection());
        assert_eq!(registry.known().keys().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn refuses_reentrant_detection() {
        let mut registry = InverterRegistry::new(vec![1]);

        assert!(registry.begin_detection());
        registry.record(info(1));
        assert!(!registry.begin_detection());
        assert_eq!(registry.known().len(), 1);
        assert!(registry.is_detecting());
    }
}
