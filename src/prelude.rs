pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};

pub use std::io::Write as _;
pub use std::str::FromStr;

pub use tokio::sync::broadcast;

pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::error::{Error, NormalizeError};
pub use crate::options::Options;
pub use crate::solarmax::{
    self, CommandType, ConnectionSettings, Field, FieldValue, InverterInfo, InverterStatus,
    Request, Response, SolarMax,
};
