//! Upbit Adapters
//!
//! - **Session**: the single upstream ticker WebSocket (chunked subscribe,
//!   binary JSON frames, fixed-delay reconnect)
//! - **Market API**: REST market list used as reference data

pub mod codec;
pub mod market_api;
pub mod reconnect;
pub mod session;
pub mod subscription;

pub use codec::{BinaryJsonCodec, CodecError};
pub use market_api::{MarketEntry, UpbitMarketCatalog};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use session::{UpstreamError, UpstreamEvent, UpstreamSession, UpstreamSessionConfig};
pub use subscription::{SubscriptionFrame, build_frames};
