//! Binary entry point: wires up logging, a backend pool, and the UCI
//! adapter, then serves GUI commands until `quit`.

use firecastle::config::EngineOptions;
use firecastle::inference::{InferenceManager, RandomBackend};
use firecastle::uci;
use std::process::exit;
use std::sync::Arc;

fn main() {
    env_logger::Builder::from_default_env().target(env_logger::Target::Stderr).init();

    let options = EngineOptions::default();
    let inference = Arc::new(InferenceManager::new(vec![Arc::new(RandomBackend)]));

    exit(match uci::run(inference, options) {
        Ok(()) => 0,
        Err(err) => {
            log::error!("uci session ended with error: {err}");
            1
        }
    })
}
