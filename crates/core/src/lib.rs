pub mod config_loader;
pub mod error;
pub mod traits;
pub mod types;

pub use config_loader::ConfigLoader;
pub use error::{ErrorClass, GatewayError};
pub use traits::{FairValueSource, MarketGateway, NoFairValue};
pub use types::{Action, OrderKind, OrderRequest, OrderState, OrderStatus, Quote, Side};
