//! # dbot-slack
//!
//! Slack RTM connectivity: `rtm.start` bootstrap, the websocket session ([`RtmConnection`]),
//! outbound frame validation, inbound dispatch to a [`dbot_core::MessageHandler`], and the
//! user → DM channel mapping. No message interpretation and no persistence.

mod adapters;
mod api;
mod config;
mod im_mapping;
mod inbound;
mod outbound;
mod rtm;
mod transport;

pub use adapters::{SlackChannel, SlackChannelWrapper, SlackIm, SlackUser, SlackUserWrapper};
pub use api::{Directory, SlackApi, TeamSnapshot};
pub use config::{ErrorPolicy, SlackConfig, TransportOptions, DEFAULT_API_URL};
pub use im_mapping::ImMapping;
pub use inbound::InboundDispatcher;
pub use outbound::{encode_message, OutboundFrame, OutboundSender, MAX_PAYLOAD_BYTES};
pub use rtm::{Collaborators, ConnectionState, OnOpen, RtmConnection, RtmHandle};
pub use transport::{
    Frame, OpenRequest, Transport, TransportEvent, TransportLink, WebSocketTransport,
    KEEPALIVE_INTERVAL,
};
