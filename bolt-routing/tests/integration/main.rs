mod multi_database;
mod routing;
pub(crate) mod utils;
