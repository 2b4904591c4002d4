use crate::prelude::*;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Serialize, Serializer};

/// Command type carried in the frame body, rendered as uppercase hex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum CommandType {
    Get = 100,
    Set = 200,
}

impl CommandType {
    pub fn hex(self) -> String {
        format!("{:X}", u16::from(self))
    }

    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let code = u16::from_str_radix(s, 16)
            .map_err(|_| Error::Protocol(format!("command type {:?} is not hex", s)))?;

        Self::try_from(code).map_err(|_| Error::Protocol(format!("unknown command type {:?}", s)))
    }
}

impl Default for CommandType {
    fn default() -> Self {
        Self::Get
    }
}

// Field {{{
macro_rules! fields {
    ($($variant:ident => $name:literal,)+) => {
        /// Every data item an inverter understands.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum Field {
            $($variant,)+
        }

        impl Field {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Field::$variant => $name,)+
                }
            }

            /// Look up a wire identifier. Matching is exact (uppercase).
            pub fn lookup(name: &str) -> Option<Field> {
                match name {
                    $($name => Some(Field::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

fields! {
    Kdy => "KDY",   // energy today, 0.1 kWh
    Kyr => "KYR",
    Kmt => "KMT",
    Kt0 => "KT0",   // energy total
    Il1 => "IL1",
    Idc => "IDC",
    Pac => "PAC",
    Prl => "PRL",
    Sys => "SYS",
    Sal => "SAL",
    Tnf => "TNF",
    Tkk => "TKK",
    Ul1 => "UL1",
    Udc => "UDC",
    Adr => "ADR",
    Typ => "TYP",
    Pin => "PIN",
    Mac => "MAC",
    Cac => "CAC",
    Khr => "KHR",
    Ec00 => "EC00",
    Ec01 => "EC01",
    Ec02 => "EC02",
    Ec03 => "EC03",
    Ec04 => "EC04",
    Ec05 => "EC05",
    Ec06 => "EC06",
    Ec07 => "EC07",
    Ec08 => "EC08",
    Bdn => "BDN",
    Swv => "SWV",
    Din => "DIN",
    Lan => "LAN",
    Sdat => "SDAT",
    Fdat => "FDAT",
}

impl Field {
    /// Validate a list of names before any of them is used.
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<Vec<Field>, Error> {
        names.iter().map(|n| n.as_ref().parse()).collect()
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::lookup(s).ok_or_else(|| Error::UnknownField(s.to_string()))
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Field {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
} // }}}
