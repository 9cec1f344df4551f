pub mod fake;
pub mod utils;
