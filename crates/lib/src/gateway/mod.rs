//! Gateway: HTTP webhook endpoints, web chat, and the admin API on one port.
//!
//! The webhook handlers only translate HTTP to registry calls and back; all protocol work
//! (handshake, signature, parsing) happens in the channels.

mod protocol;
mod server;

pub use protocol::{
    ChannelsResponse, ChatRequest, ChatResponse, ErrorBody, SendRequest, SettingsResponse,
    WelcomeResponse,
};
pub use server::{build_app, run_gateway, GatewayState};
