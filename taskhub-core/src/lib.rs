pub mod errors;
pub mod models;
pub mod protocol;
pub mod reconcile;

pub use errors::*;
pub use models::*;
pub use protocol::*;
pub use reconcile::*;
