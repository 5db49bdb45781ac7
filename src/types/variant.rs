//! The fourteen terminal variants and their classification (spec §3).

use core::fmt;

/// Which of the three publish-direction shapes a variant carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishDirection {
    /// `DeafMute`: carries no payload traffic at all.
    None,
    /// Producer → Consumer, Publish → Subscribe: payload flows one way.
    OneWay,
    /// Master ↔ Slave: each side publishes its own schema, both receive.
    Bidirectional,
    /// Client → Service → Client: request, then exactly one response.
    RequestResponse,
}

/// How a terminal acquires its remote counterpart(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Symmetric; needs an explicit [`crate::terminal::binding::TerminalBinding`]
    /// naming the remote path.
    Primitive,
    /// Paired by name + signature with its counterpart variant; binds
    /// implicitly, no explicit `Binding` object.
    Convenience,
}

/// One of the fourteen terminal variants (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TerminalVariant {
    DeafMute = 0,
    PublishSubscribe = 1,
    CachedPublishSubscribe = 2,
    ScatterGather = 3,
    Producer = 4,
    Consumer = 5,
    CachedProducer = 6,
    CachedConsumer = 7,
    Master = 8,
    Slave = 9,
    CachedMaster = 10,
    CachedSlave = 11,
    Service = 12,
    Client = 13,
}

impl TerminalVariant {
    /// The one-byte tag used in terminal-discovery frames (spec §6).
    #[must_use]
    pub const fn wire_tag(self) -> u8 {
        self as u8
    }

    /// Decodes a discovery-frame variant tag. Returns `None` for an
    /// out-of-range byte (a `DeserializeMsg` failure at the call site).
    #[must_use]
    pub const fn from_wire_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::DeafMute,
            1 => Self::PublishSubscribe,
            2 => Self::CachedPublishSubscribe,
            3 => Self::ScatterGather,
            4 => Self::Producer,
            5 => Self::Consumer,
            6 => Self::CachedProducer,
            7 => Self::CachedConsumer,
            8 => Self::Master,
            9 => Self::Slave,
            10 => Self::CachedMaster,
            11 => Self::CachedSlave,
            12 => Self::Service,
            13 => Self::Client,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn binding(self) -> Binding {
        match self {
            Self::DeafMute | Self::PublishSubscribe | Self::CachedPublishSubscribe | Self::ScatterGather => {
                Binding::Primitive
            }
            _ => Binding::Convenience,
        }
    }

    #[must_use]
    pub const fn is_primitive(self) -> bool {
        matches!(self.binding(), Binding::Primitive)
    }

    #[must_use]
    pub const fn is_cached(self) -> bool {
        matches!(
            self,
            Self::CachedPublishSubscribe
                | Self::CachedProducer
                | Self::CachedConsumer
                | Self::CachedMaster
                | Self::CachedSlave
        )
    }

    #[must_use]
    pub const fn publish_direction(self) -> PublishDirection {
        match self {
            Self::DeafMute => PublishDirection::None,
            Self::PublishSubscribe
            | Self::CachedPublishSubscribe
            | Self::Producer
            | Self::Consumer
            | Self::CachedProducer
            | Self::CachedConsumer => PublishDirection::OneWay,
            Self::ScatterGather => PublishDirection::RequestResponse,
            Self::Master | Self::Slave | Self::CachedMaster | Self::CachedSlave => {
                PublishDirection::Bidirectional
            }
            Self::Service | Self::Client => PublishDirection::RequestResponse,
        }
    }

    /// The convenience counterpart this variant binds to by name, if any
    /// (e.g. `Producer` pairs with `Consumer`). Primitives return `None`.
    #[must_use]
    pub const fn counterpart(self) -> Option<Self> {
        Some(match self {
            Self::Producer => Self::Consumer,
            Self::Consumer => Self::Producer,
            Self::CachedProducer => Self::CachedConsumer,
            Self::CachedConsumer => Self::CachedProducer,
            Self::Master => Self::Slave,
            Self::Slave => Self::Master,
            Self::CachedMaster => Self::CachedSlave,
            Self::CachedSlave => Self::CachedMaster,
            Self::Service => Self::Client,
            Self::Client => Self::Service,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DeafMute => "DeafMute",
            Self::PublishSubscribe => "PublishSubscribe",
            Self::CachedPublishSubscribe => "CachedPublishSubscribe",
            Self::ScatterGather => "ScatterGather",
            Self::Producer => "Producer",
            Self::Consumer => "Consumer",
            Self::CachedProducer => "CachedProducer",
            Self::CachedConsumer => "CachedConsumer",
            Self::Master => "Master",
            Self::Slave => "Slave",
            Self::CachedMaster => "CachedMaster",
            Self::CachedSlave => "CachedSlave",
            Self::Service => "Service",
            Self::Client => "Client",
        }
    }
}

impl fmt::Display for TerminalVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observable binding state of a terminal (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingState {
    #[default]
    Released,
    Established,
}

/// Observable subscription state of a terminal (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    #[default]
    Unsubscribed,
    Subscribed,
}
