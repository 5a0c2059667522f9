use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use strum_macros::{Display as StrumDisplay, EnumString};
use url::Url;

use crate::error::{MeterError, Result};

/// Link framing selected by the endpoint URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, StrumDisplay)]
pub enum Scheme {
    /// Serial RTU on a local port, e.g. `rtu:///dev/ttyUSB0`.
    #[strum(serialize = "rtu")]
    Rtu,
    /// Modbus TCP (MBAP framing).
    #[strum(serialize = "tcp")]
    Tcp,
    /// RTU frames tunnelled through a raw TCP socket by a serial bridge.
    #[strum(serialize = "rtuovertcp")]
    RtuOverTcp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Serial { path: String },
    Socket { host: String, port: u16 },
}

/// Where the gateway lives and how to talk to it.
///
/// Two endpoints compare equal only when address, baud rate and timeout all match;
/// any difference forces the gateway to tear its link down and build a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    address: String,
    scheme: Scheme,
    target: Target,
    baud_rate: u32,
    timeout: Duration,
}

impl Endpoint {
    pub const DEFAULT_BAUD_RATE: u32 = 9600;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_TCP_PORT: u16 = 502;

    pub fn new(address: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let url = Url::parse(address)
            .map_err(|e| MeterError::configuration(format!("bad endpoint {address:?}: {e}")))?;
        let scheme = Scheme::from_str(url.scheme()).map_err(|_| {
            MeterError::configuration(format!("unsupported endpoint scheme {:?}", url.scheme()))
        })?;
        if baud_rate == 0 {
            return Err(MeterError::configuration("baud rate must not be zero"));
        }
        if timeout.is_zero() {
            return Err(MeterError::configuration("timeout must not be zero"));
        }

        let host = url.host_str().unwrap_or_default();
        let target = match scheme {
            Scheme::Rtu => {
                // `rtu:///dev/ttyUSB0` has an empty host, `rtu://COM3` has no path
                let path = format!("{}{}", host, url.path());
                if path.is_empty() || path == "/" {
                    return Err(MeterError::configuration(format!(
                        "endpoint {address:?} names no serial device"
                    )));
                }
                Target::Serial { path }
            }
            Scheme::Tcp | Scheme::RtuOverTcp => {
                if host.is_empty() {
                    return Err(MeterError::configuration(format!(
                        "endpoint {address:?} has no host"
                    )));
                }
                let port = match (scheme, url.port()) {
                    (_, Some(port)) => port,
                    (Scheme::Tcp, None) => Self::DEFAULT_TCP_PORT,
                    _ => {
                        return Err(MeterError::configuration(format!(
                            "endpoint {address:?} has no port"
                        )))
                    }
                };
                Target::Socket {
                    host: host.to_owned(),
                    port,
                }
            }
        };

        Ok(Self {
            address: address.to_owned(),
            scheme,
            target,
            baud_rate,
            timeout,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl FromStr for Endpoint {
    type Err = MeterError;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::new(s, Self::DEFAULT_BAUD_RATE, Self::DEFAULT_TIMEOUT)
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} baud, timeout {} ms)",
            self.address,
            self.baud_rate,
            self.timeout.as_millis()
        )
    }
}
