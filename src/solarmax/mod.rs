//! SolarMax MaxTalk protocol engine.

pub mod client;
pub mod connection;
pub mod field;
pub mod frame;
pub mod registry;
pub mod tables;
pub mod value;

pub use client::{InverterStatus, SolarMax};
pub use connection::{Connection, ConnectionSettings, ConnectionState};
pub use field::{CommandType, Field};
pub use frame::{Frame, RawReply, Request};
pub use registry::{InverterInfo, InverterRegistry};
pub use tables::{Model, Tables};
pub use value::{normalize, FieldValue, Response};
