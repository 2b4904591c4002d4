#![allow(dead_code)]

use solarmax_bridge::prelude::*;
use solarmax_bridge::solarmax::frame::{Address, Frame};
use solarmax_bridge::solarmax::Tables;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Decides what the fake bus answers to a request; `None` means stay silent.
pub type Responder = Arc<dyn Fn(&Frame) -> Option<Vec<u8>> + Send + Sync>;

/// A TCP listener that behaves like a bus of SolarMax inverters.
pub struct FakeBus {
    port: u16,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Frame>>>,
    task: JoinHandle<()>,
}

impl FakeBus {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&Frame) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let responder: Responder = Arc::new(responder);
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let connections = connections.clone();
            let requests = requests.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(socket, responder.clone(), requests.clone()));
                }
            })
        };

        Self {
            port,
            connections,
            requests,
            task,
        }
    }

    /// A bus with the given (id, type code) inverters answering every query.
    pub async fn with_inverters(inverters: &[(u8, u64)]) -> Self {
        Self::start(Factory::inverters(inverters)).await
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn settings(&self) -> ConnectionSettings {
        Factory::settings(self.port)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Frame> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, id: u8) -> Vec<Frame> {
        self.requests()
            .into_iter()
            .filter(|f| f.destination == Address::Device(id))
            .collect()
    }
}

impl Drop for FakeBus {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut socket: TcpStream, responder: Responder, requests: Arc<Mutex<Vec<Frame>>>) {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        match socket.read(&mut byte).await {
            Ok(0) | Err(_) => return,
            Ok(_) => buf.push(byte[0]),
        }
        if byte[0] != b'}' {
            continue;
        }

        let raw = std::mem::take(&mut buf);
        let Ok(frame) = Frame::parse(&raw) else {
            continue;
        };
        requests.lock().unwrap().push(frame.clone());

        if let Some(reply) = responder(&frame) {
            if socket.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

pub struct Factory;

impl Factory {
    /// Short timeouts and backoff so recovery paths run quickly.
    pub fn settings(port: u16) -> ConnectionSettings {
        ConnectionSettings {
            connect_timeout: Duration::from_millis(500),
            io_timeout: Duration::from_millis(200),
            reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(40),
            ..ConnectionSettings::new("127.0.0.1", port)
        }
    }

    pub fn client(port: u16) -> SolarMax {
        SolarMax::new(Self::settings(port), Tables::default())
    }

    /// Raw hex value a healthy inverter reports for `field`.
    pub fn value(id: u8, type_code: u64, field: Field) -> String {
        match field {
            Field::Adr => format!("{:X}", id),
            Field::Typ => format!("{:X}", type_code),
            Field::Pin => "1900".to_string(), // 3200 W
            Field::Kdy => "82".to_string(),
            Field::Kt0 => "2A0".to_string(),
            Field::Pac => "64".to_string(),
            Field::Udc => "BB8".to_string(),
            Field::Idc => "1F4".to_string(),
            Field::Ul1 => "910".to_string(),
            Field::Il1 => "C8".to_string(),
            Field::Tkk => "2A".to_string(),
            Field::Sys => "4E24,0".to_string(),
            Field::Sal => "0".to_string(),
            Field::Sdat => "7DA0A1F,B3B0".to_string(),
            _ => "0".to_string(),
        }
    }

    /// Reply to `request` the way inverter `type_code` would.
    pub fn reply(request: &Frame, type_code: u64) -> Option<Vec<u8>> {
        let Address::Device(id) = request.destination else {
            return None;
        };

        let items = request
            .items
            .iter()
            .map(|(field, value)| match value {
                // writes are acknowledged by echoing them back
                Some(value) => (*field, Some(value.clone())),
                None => (*field, Some(Self::value(id, type_code, *field))),
            })
            .collect();

        Some(
            Frame {
                source: Address::Device(id),
                destination: Address::Master,
                command: request.command,
                items,
            }
            .to_bytes(),
        )
    }

    /// Responder for a bus of healthy inverters; any other id stays silent.
    pub fn inverters(
        inverters: &[(u8, u64)],
    ) -> impl Fn(&Frame) -> Option<Vec<u8>> + Send + Sync + 'static {
        let types: HashMap<u8, u64> = inverters.iter().copied().collect();
        move |request: &Frame| match request.destination {
            Address::Device(id) => types
                .get(&id)
                .and_then(|type_code| Self::reply(request, *type_code)),
            Address::Master => None,
        }
    }

    pub fn config_yaml(port: u16, inverters: &[u8]) -> String {
        format!(
            "buses:\n  - host: 127.0.0.1\n    port: {}\n    inverters: {:?}\n    connect_timeout: 1\n    read_timeout: 1\n    reconnect_delay_ms: 10\n    max_reconnect_delay_ms: 40\npoll_interval: 1\n",
            port, inverters
        )
    }
}

/// Type code of the SolarMax 3000S.
pub const TYPE_3000S: u64 = 20020;
/// Type code of the SolarMax 6000S.
pub const TYPE_6000S: u64 = 20040;
