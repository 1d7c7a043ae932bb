mod codec;
mod config;
mod error;
mod transport;

use config::Config;
use little_raft::Replica;
use std::process::ExitCode;
use transport::UdpCluster;

fn main() -> ExitCode {
    env_logger::init();

    let config = match Config::from_args(std::env::args()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("usage: kvraft <simulator-port> <replica-id> <peer-id>...");
            return ExitCode::FAILURE;
        }
    };

    let cluster = match UdpCluster::bind(config.port, config.id.clone(), config.peers.clone()) {
        Ok(cluster) => cluster,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    log::info!(
        "{} starting, simulator on port {}, peers {:?}",
        config.id, config.port, config.peers
    );

    let mut replica = Replica::new(config.id, config.peers, cluster);

    // The event loop: a single-threaded cooperative loop per §5. The only
    // suspension point is the bounded socket poll inside `tick`; nothing
    // here yields partway through a batch.
    loop {
        replica.tick();
    }
}
