//! Process entry point: parse configuration, wire logging and the
//! database pool, and hand off to the reactor.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use hearth::config::Config;
use hearth::db::{InMemoryStore, MySqlStore, SqlConnPool, UserStore};
use hearth::logging;
use hearth::parser::response::ResponseBuilder;
use hearth::reactor::Reactor;
use hearth::worker::RequestContext;

fn main() {
    let config = Config::parse();
    let _log_guard = logging::init_logging(&config.log_dir, &config.log_level, config.open_log, config.log_queue_size);

    info!(port = config.port, doc_root = ?config.doc_root, "starting server");

    let users: Arc<dyn UserStore> = match &config.database_url {
        Some(url) => match SqlConnPool::new(url, config.db_pool_size) {
            Ok(pool) => Arc::new(MySqlStore::new(pool)),
            Err(e) => {
                error!(error = %e, "failed to establish database connection pool");
                std::process::exit(1);
            }
        },
        None => {
            info!("no --database-url configured, using in-memory credential store");
            Arc::new(InMemoryStore::default())
        }
    };

    let responses = match ResponseBuilder::new(&config.doc_root) {
        Ok(responses) => responses,
        Err(e) => {
            error!(error = %e, doc_root = ?config.doc_root, "failed to open document root");
            std::process::exit(1);
        }
    };

    let context = RequestContext { responses, users };

    let reactor = match Reactor::bind(&config, context) {
        Ok(reactor) => reactor,
        Err(e) => {
            error!(error = %e, "failed to bind reactor");
            std::process::exit(1);
        }
    };
    reactor.run();
}
