pub mod auth;
pub mod http_api;
pub mod protocol;
pub mod session;
pub mod state;
pub mod ws;

pub use http_api::router;
pub use session::{BridgeDispatch, SessionRegistry};
pub use state::BridgeState;
