//! Runtime side: discover environment processes and control them

mod attach;
mod error;
mod guard;
mod hotspot;
mod info;
mod registry;
mod shutdown;

pub use attach::*;
pub use error::*;
pub use guard::*;
pub use hotspot::{parse_properties, HotSpotAttacher, LOCAL_CONNECTOR_ADDRESS};
pub use info::*;
pub use registry::*;
pub use shutdown::*;
