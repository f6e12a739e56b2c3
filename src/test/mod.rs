mod api;
mod utils;
mod whitelist;

pub use utils::test_utils;
