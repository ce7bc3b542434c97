pub mod api;
pub mod catalog;
pub mod config;
pub mod db;
pub mod schema;

use catalog::Catalog;
use config::Config;

pub struct AppState {
    pub config: Config,
    pub catalog: Catalog,
}

impl AppState {
    pub fn new(config: Config, catalog: Catalog) -> Self {
        Self { config, catalog }
    }
}
