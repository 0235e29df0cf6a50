pub mod errors;
pub mod options;
pub mod problem;
pub mod result;
pub mod space;
pub mod value;

pub use errors::*;
pub use options::*;
pub use problem::*;
pub use result::*;
pub use space::*;
pub use value::*;
