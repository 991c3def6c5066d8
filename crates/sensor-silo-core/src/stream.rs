//! Raw signal streams and their addresses.
//!
//! A stream is the hardware channel a sensor is wired to. The engine only
//! needs to connect it, ask it for a fresh conversion and read the result;
//! drivers live outside this crate and register a constructor in [`Streams`].

use crate::quantity::Quantity;
use crate::{Error, Result, NOT_DEPLOYED};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

/// A raw signal source.
#[async_trait]
pub trait Stream: Send {
    /// Registered type name of this stream.
    fn stream_type(&self) -> &str;

    /// Opens the channel at `address`.
    fn connect(&mut self, address: &str) -> Result<()>;

    /// Address passed to the last successful `connect`.
    fn address(&self) -> Option<&str>;

    /// Completes one conversion; may wait for the hardware.
    async fn update(&mut self) -> Result<()>;

    /// Result of the last `update`.
    fn raw_value(&self) -> f64;

    fn raw_units(&self) -> &str;

    /// Checks an address before it is stored on a sensor.
    fn validate_address(&self, address: &str) -> Result<()> {
        address.parse::<ChannelAddress>().map(|_| ())
    }

    /// Latest raw sample as a quantity.
    fn measured_quantity(&self) -> Quantity {
        Quantity::new("Measured", self.raw_units(), self.raw_value())
    }
}

/// Builds a fresh stream instance.
pub type StreamConstructor = Box<dyn Fn() -> Box<dyn Stream> + Send + Sync>;

/// Stream constructors keyed by stream type.
#[derive(Default)]
pub struct Streams {
    constructors: BTreeMap<String, StreamConstructor>,
}

impl Streams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor, replacing any previous one for the type.
    pub fn register<F>(&mut self, stream_type: &str, constructor: F)
    where
        F: Fn() -> Box<dyn Stream> + Send + Sync + 'static,
    {
        debug!("Registering stream type {}", stream_type);
        self.constructors
            .insert(stream_type.to_string(), Box::new(constructor));
    }

    /// Creates a new, unconnected stream of the given type.
    pub fn create(&self, stream_type: &str) -> Result<Box<dyn Stream>> {
        let constructor = self
            .constructors
            .get(stream_type)
            .ok_or_else(|| Error::UnknownStreamType(stream_type.to_string()))?;
        Ok(constructor())
    }

    pub fn stream_types(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for Streams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}

/// Board/channel address of a converter input, or not deployed.
///
/// Boards are lettered `a`-`g`, channels numbered `1`-`4` (e.g. `b3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAddress {
    Channel { board: char, channel: u8 },
    NotDeployed,
}

impl ChannelAddress {
    pub fn is_deployed(&self) -> bool {
        !matches!(self, ChannelAddress::NotDeployed)
    }
}

impl FromStr for ChannelAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().to_lowercase();
        if trimmed == NOT_DEPLOYED.to_lowercase() {
            return Ok(ChannelAddress::NotDeployed);
        }

        let mut chars = trimmed.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some(board @ 'a'..='g'), Some(channel @ '1'..='4'), None) => {
                Ok(ChannelAddress::Channel {
                    board,
                    channel: channel as u8 - b'0',
                })
            }
            _ => Err(Error::InvalidAddress(s.to_string())),
        }
    }
}

impl std::fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelAddress::Channel { board, channel } => write!(f, "{}{}", board, channel),
            ChannelAddress::NotDeployed => write!(f, "{}", NOT_DEPLOYED),
        }
    }
}
