use crate::prelude::*;
use crate::solarmax::{
    connection::Connection,
    frame,
    registry::{InverterRegistry, DETECTION_FIELDS},
    tables::{Tables, OFFLINE},
};

use serde::Serialize;
use std::collections::BTreeMap;

// Late replies to earlier, timed-out requests skipped before giving up.
const MAX_STRAY_REPLIES: usize = 4;

/// Operating state and active alarms of one inverter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InverterStatus {
    pub inverter: u8,
    pub online: bool,
    /// Raw `SYS` (status code, sub code), when the inverter sent one.
    pub code: Option<(u32, u32)>,
    pub description: String,
    pub alarms: Vec<String>,
}

impl InverterStatus {
    fn offline(inverter: u8) -> Self {
        Self {
            inverter,
            online: false,
            code: None,
            description: OFFLINE.to_string(),
            alarms: vec![OFFLINE.to_string()],
        }
    }
}

/// Client for one SolarMax bus: a single TCP connection shared by every
/// inverter id on it.
///
/// The protocol is strictly request/response, so all methods take `&mut self`;
/// share a client between tasks only behind a mutex.
pub struct SolarMax {
    connection: Connection,
    registry: InverterRegistry,
    tables: Tables,
}

impl SolarMax {
    /// Build a client. Nothing is dialed until `connect` or the first query.
    pub fn new(settings: ConnectionSettings, tables: Tables) -> Self {
        Self {
            connection: Connection::new(settings),
            registry: InverterRegistry::default(),
            tables,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn registry(&self) -> &InverterRegistry {
        &self.registry
    }

    pub async fn connect(&mut self) -> Result<(), Error> {
        self.connection.connect().await
    }

    /// Close the connection. Call on every exit path; never fails.
    pub async fn close(&mut self) {
        self.connection.disconnect().await;
    }

    // query {{{
    /// Query `fields` from `inverter`.
    pub async fn query_fields(
        &mut self,
        inverter: u8,
        fields: &[Field],
    ) -> Result<Option<Response>, Error> {
        self.query(inverter, &Request::from(fields), CommandType::Get)
            .await
    }

    /// Query with a pre-encoded field body, e.g. `KDY;KT0`. Unknown field
    /// names are rejected before anything is sent.
    pub async fn query_raw(&mut self, inverter: u8, body: &str) -> Result<Option<Response>, Error> {
        let request = Request::raw(body)?;
        self.query(inverter, &request, CommandType::Get).await
    }

    /// Send one request and decode the reply.
    ///
    /// `Ok(None)` means the inverter stayed silent and a recovery step
    /// (re-detection or reconnect) was taken. `Err(Error::Timeout)` means the
    /// bus is connected, every inverter was known, and it still did not
    /// answer. Frame errors abort this response only. Replies from any other
    /// inverter are discarded.
    pub async fn query(
        &mut self,
        inverter: u8,
        request: &Request,
        command: CommandType,
    ) -> Result<Option<Response>, Error> {
        if let Some(reply) = self.transact(inverter, request, command).await {
            if let Some(response) = self.reply_from(inverter, reply).await? {
                return Ok(Some(response));
            }
        }

        self.recover_from_silence(inverter).await?;
        Ok(None)
    }

    // Decode `reply`, skipping frames some other inverter sent after its
    // own request timed out. None if no frame from `inverter` turned up.
    async fn reply_from(
        &mut self,
        inverter: u8,
        mut reply: Vec<u8>,
    ) -> Result<Option<Response>, Error> {
        for _ in 0..MAX_STRAY_REPLIES {
            let response = Self::decode(&reply)?;
            if response.inverter == inverter {
                return Ok(Some(response));
            }

            warn!(
                "discarding stray reply from inverter {} while waiting for {}",
                response.inverter, inverter
            );
            reply = self.connection.receive_frame().await;
            if reply.is_empty() {
                return Ok(None);
            }
        }

        Ok(None)
    }

    // encode, send, receive; None if nothing came back
    async fn transact(
        &mut self,
        inverter: u8,
        request: &Request,
        command: CommandType,
    ) -> Option<Vec<u8>> {
        let frame = frame::encode(inverter, request, command);

        if let Err(e) = self.connection.send(&frame).await {
            debug!("inverter {}: send failed: {}", inverter, e);
            return None;
        }

        let reply = self.connection.receive_frame().await;
        if reply.is_empty() {
            None
        } else {
            Some(reply)
        }
    }

    fn decode(reply: &[u8]) -> Result<Response, Error> {
        let raw = frame::decode(reply).map_err(|e| {
            warn!("rejected reply {:?}: {}", String::from_utf8_lossy(reply), e);
            e
        })?;

        let response = Response::from_raw(raw);
        for error in response.errors.values() {
            warn!("inverter {}: {}", response.inverter, error);
        }

        Ok(response)
    }

    // Most silences are one misbehaving inverter rather than a dead
    // transport, so re-detect first and only then reconnect.
    async fn recover_from_silence(&mut self, inverter: u8) -> Result<(), Error> {
        self.connection.set_all_inverters_present(false);

        if !self.connection.all_inverters_present() && !self.registry.is_detecting() {
            warn!("inverter {} did not answer, re-detecting inverters", inverter);
            self.detect_inverters().await;
            Ok(())
        } else {
            self.reconnect_or_timeout(inverter).await
        }
    }

    async fn reconnect_or_timeout(&mut self, inverter: u8) -> Result<(), Error> {
        if !self.connection.is_connected() {
            if let Err(e) = self.connection.connect().await {
                warn!("{}: reconnect failed: {}", self.connection.settings(), e);
            }
            Ok(())
        } else {
            Err(Error::Timeout(inverter))
        }
    } // }}}

    // detection {{{
    /// Replace the configured id list and detect immediately.
    pub async fn use_inverters(&mut self, ids: Vec<u8>) -> Vec<u8> {
        self.registry.set_configured(ids);
        self.detect_inverters().await
    }

    /// Query every configured id and rebuild the known-inverter map.
    ///
    /// Always completes; ids that do not answer or report an unknown model
    /// are skipped. If any id is missing afterwards the connection is reset,
    /// as a partial table usually means the bus got out of sync. Returns the
    /// ids found.
    pub async fn detect_inverters(&mut self) -> Vec<u8> {
        if !self.registry.begin_detection() {
            warn!("detection already running");
            return self.registry.known().keys().copied().collect();
        }

        if !self.connection.is_connected() {
            if let Err(e) = self.connection.connect().await {
                warn!("{}: {}", self.connection.settings(), e);
            }
        }

        let request = Request::from(&DETECTION_FIELDS[..]);
        for id in self.registry.configured().to_vec() {
            debug!("searching for inverter #{}", id);
            match self.identify_one(id, &request).await {
                Ok(info) => {
                    info!(
                        "found inverter #{}: {} ({}W installed)",
                        id, info.description, info.installed_watts
                    );
                    self.registry.record(info);
                }
                Err(e) => {
                    warn!("inverter #{} not found: {}", id, e);
                    self.connection.set_all_inverters_present(false);
                }
            }
        }

        if self.registry.finish_detection() {
            self.connection.set_all_inverters_present(true);
            info!(
                "found all inverters: {:?}",
                self.registry.known().values().collect::<Vec<_>>()
            );
        } else {
            warn!("not all inverters found, reconnecting");
            if let Err(e) = self.connection.connect().await {
                warn!("{}: {}", self.connection.settings(), e);
            }
        }

        self.registry.known().keys().copied().collect()
    }

    async fn identify_one(&mut self, id: u8, request: &Request) -> Result<InverterInfo> {
        let Some(reply) = self.transact(id, request, CommandType::Get).await else {
            self.connection.set_all_inverters_present(false);
            self.reconnect_or_timeout(id).await?;
            bail!("no reply");
        };

        let Some(response) = self.reply_from(id, reply).await? else {
            self.connection.set_all_inverters_present(false);
            bail!("no reply, only stray frames");
        };
        InverterRegistry::identify(&self.tables, id, &response)
    }

    /// Known inverters, re-detecting first unless the last pass found them all.
    pub async fn inverters(&mut self) -> &BTreeMap<u8, InverterInfo> {
        if !self.connection.all_inverters_present() {
            self.detect_inverters().await;
        }
        self.registry.known()
    } // }}}

    /// Write settings, e.g. `[("PAC", 100)]`. Keys are case-insensitive and
    /// all validated before anything is sent.
    ///
    /// Returns whether the inverter acknowledged; the acknowledgment itself
    /// is only logged.
    pub async fn write_setting<K: AsRef<str>>(
        &mut self,
        inverter: u8,
        settings: &[(K, u64)],
    ) -> Result<bool, Error> {
        if settings.is_empty() {
            return Err(Error::Protocol("nothing to write".to_string()));
        }

        let body = settings
            .iter()
            .map(|(key, value)| -> Result<String, Error> {
                let field = key.as_ref().to_uppercase().parse::<Field>()?;
                Ok(format!("{}={:X}", field, value))
            })
            .collect::<Result<Vec<_>, Error>>()?
            .join(";");

        let request = Request::raw(body)?;
        match self.transact(inverter, &request, CommandType::Set).await {
            Some(ack) => {
                info!(
                    "inverter {} acknowledged write: {}",
                    inverter,
                    String::from_utf8_lossy(&ack)
                );
                Ok(true)
            }
            None => {
                self.recover_from_silence(inverter).await?;
                Ok(false)
            }
        }
    }

    /// Operating status and alarm list, or an offline marker if the inverter
    /// cannot be queried.
    pub async fn status(&mut self, inverter: u8) -> InverterStatus {
        let response = match self.query_fields(inverter, &[Field::Sys, Field::Sal]).await {
            Ok(Some(response)) => response,
            Ok(None) => return InverterStatus::offline(inverter),
            Err(e) => {
                warn!("inverter {}: status query failed: {}", inverter, e);
                return InverterStatus::offline(inverter);
            }
        };

        // a SYS or SAL that did not decode is reported, never read as healthy
        let code = response.get(Field::Sys).and_then(FieldValue::as_status);
        let description = match (code, response.error(Field::Sys)) {
            (Some((status, _)), _) => self.tables.status(status),
            (None, Some(e)) => e.to_string(),
            (None, None) => format!("{} missing from reply", Field::Sys),
        };

        let mask = response.get(Field::Sal).and_then(FieldValue::as_integer);
        let alarms = match (mask, response.error(Field::Sal)) {
            (Some(mask), _) => self.tables.alarms(mask),
            (None, Some(e)) => vec![e.to_string()],
            (None, None) => vec![format!("{} missing from reply", Field::Sal)],
        };

        InverterStatus {
            inverter,
            online: true,
            code,
            description,
            alarms,
        }
    }
}

impl std::fmt::Display for SolarMax {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SolarMax[{} / connected={} / inverters={:?}]",
            self.connection.settings(),
            self.connection.is_connected(),
            self.registry.known().keys().collect::<Vec<_>>()
        )
    }
}
