//! Centralized configuration for the bridge.
//!
//! Wire constants, meta-schema names and server defaults live here so the
//! client and server sides cannot drift apart.

use std::time::Duration;

/// Transport framing and HTTP settings.
pub struct TransportConfig;

impl TransportConfig {
    pub const CONTENT_TYPE: &'static str = "application/grpc-web+proto";
    pub const FRAME_HEADER_LEN: usize = 5;
    pub const FLAG_MESSAGE: u8 = 0x00;
    pub const FLAG_TRAILER: u8 = 0x80;
    pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024; // 4MB
    pub const STATUS_HEADER: &'static str = "grpc-status";
    pub const MESSAGE_HEADER: &'static str = "grpc-message";
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const USER_AGENT: &'static str = "treerpc/0.1";
}

/// Names of the fixed bootstrap schema.
pub struct MetaSchemaConfig;

impl MetaSchemaConfig {
    /// Call path segment of the meta service.
    pub const SERVICE: &'static str = "_q";
    /// Call path segment of the meta method.
    pub const METHOD: &'static str = "_p";
    pub const REQUEST_TYPE: &'static str = "req";
    pub const RESPONSE_TYPE: &'static str = "res";
    pub const REQUEST_FIELD: &'static str = "entry";
    pub const RESPONSE_FIELD: &'static str = "result";
}

/// Server defaults.
pub struct ServerConfig;

impl ServerConfig {
    pub const DEFAULT_HOST: &'static str = "0.0.0.0";
    pub const DEFAULT_PORT: u16 = 5000;
    pub const HEALTH_PATH: &'static str = "/health";
}
