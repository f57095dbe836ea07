pub mod events;
pub mod lot;
pub mod market;
pub mod order;
pub mod session;

pub use events::*;
pub use lot::*;
pub use market::*;
pub use order::*;
pub use session::*;
