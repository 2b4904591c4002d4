use crate::prelude::*;
use crate::solarmax::Tables;

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Fields read from every detected inverter on each round.
pub const POLL_FIELDS: [Field; 9] = [
    Field::Pac,
    Field::Kdy,
    Field::Kt0,
    Field::Udc,
    Field::Idc,
    Field::Ul1,
    Field::Il1,
    Field::Tkk,
    Field::Sys,
];

/// One line of output per inverter per round.
#[derive(Debug, Serialize)]
pub struct Reading<'a> {
    pub time: String,
    pub bus: String,
    pub inverter: &'a InverterInfo,
    pub values: &'a BTreeMap<Field, FieldValue>,
    pub status: &'a InverterStatus,
}

/// Drives one bus: owns its client and polls it on an interval.
pub struct Poller {
    bus: config::Bus,
    client: SolarMax,
    interval: Duration,
}

impl Poller {
    pub fn new(bus: config::Bus, tables: Tables, interval: Duration) -> Self {
        let client = SolarMax::new(bus.settings(), tables);
        Self {
            bus,
            client,
            interval,
        }
    }

    pub fn client(&self) -> &SolarMax {
        &self.client
    }

    /// Detect, then poll until shutdown (or after one round with `once`).
    /// The connection is closed on every exit path.
    pub async fn start(&mut self, shutdown: broadcast::Receiver<()>, once: bool) -> Result<()> {
        let result = self.run(shutdown, once).await;
        self.client.close().await;
        info!("{}: poller stopped", self.client);
        result
    }

    async fn run(&mut self, mut shutdown: broadcast::Receiver<()>, once: bool) -> Result<()> {
        let found = self.client.use_inverters(self.bus.inverters().to_vec()).await;
        info!("{}: detected inverters {:?}", self.client, found);

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let mut stdout = std::io::stdout();
                    let count = self.poll_round(&mut stdout).await;
                    debug!("{}: polled {} inverters", self.client, count);
                    if once {
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    info!("{}: shutdown signal received", self.client);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Query every known inverter once and write one JSON line each.
    /// Returns the number of lines written; output errors are only logged.
    pub async fn poll_round<W: std::io::Write>(&mut self, out: &mut W) -> usize {
        let inverters: Vec<InverterInfo> = self.client.inverters().await.values().cloned().collect();
        let mut written = 0;

        for info in &inverters {
            let response = match self.client.query_fields(info.id, &POLL_FIELDS).await {
                Ok(Some(response)) => response,
                Ok(None) => {
                    warn!("inverter {}: no data this round", info.id);
                    continue;
                }
                Err(e) => {
                    warn!("inverter {}: {}", info.id, e);
                    continue;
                }
            };
            let status = self.client.status(info.id).await;

            let reading = Reading {
                time: chrono::Local::now().to_rfc3339(),
                bus: self.client.connection().settings().to_string(),
                inverter: info,
                values: &response.values,
                status: &status,
            };
            let line = match serde_json::to_string(&reading) {
                Ok(line) => line,
                Err(e) => {
                    warn!("inverter {}: cannot serialize reading: {}", info.id, e);
                    continue;
                }
            };
            if let Err(e) = writeln!(out, "{}", line) {
                warn!("inverter {}: cannot write reading: {}", info.id, e);
                continue;
            }
            written += 1;
        }

        written
    }
}
