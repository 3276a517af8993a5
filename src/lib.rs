pub mod import;
pub mod logging;
pub mod parser;
pub mod store;
