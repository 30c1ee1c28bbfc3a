pub mod server;

use crate::cli::globals::SecurityConfig;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        config: SecurityConfig,
    },
}
