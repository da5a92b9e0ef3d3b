pub mod journal;
pub mod rule;
pub mod settings;
pub mod status;
pub mod trade;

pub use journal::*;
pub use rule::*;
pub use settings::*;
pub use status::*;
pub use trade::*;
