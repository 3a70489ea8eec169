pub mod diff;
pub mod qualifier;
pub mod schema;
pub mod statistics;
pub mod value;

pub use diff::*;
pub use qualifier::*;
pub use schema::*;
pub use statistics::*;
pub use value::*;
