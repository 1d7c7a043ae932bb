use crate::error::RaftError;

/// spec.md §6 CLI: one process takes three positional arguments — a numeric
/// simulator port, this replica's id, and the remaining peer ids. No flags,
/// no environment variables, so this is plain positional `env::args`
/// parsing rather than a `clap` surface.
pub struct Config {
    pub port: u16,
    pub id: String,
    pub peers: Vec<String>,
}

impl Config {
    pub fn from_args(mut args: impl Iterator<Item = String>) -> Result<Config, RaftError> {
        args.next(); // argv[0]
        let port_str = args
            .next()
            .ok_or_else(|| RaftError::Args("missing simulator port".into()))?;
        let port: u16 = port_str
            .parse()
            .map_err(|_| RaftError::Args(format!("simulator port is not numeric: {}", port_str)))?;
        let id = args
            .next()
            .ok_or_else(|| RaftError::Args("missing replica id".into()))?;
        let peers: Vec<String> = args.collect();
        if peers.is_empty() {
            return Err(RaftError::Args("no peer ids given".into()));
        }
        Ok(Config { port, id, peers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_id_and_peers() {
        let args = vec!["kvraft", "9000", "A", "B", "C"]
            .into_iter()
            .map(String::from);
        let cfg = Config::from_args(args).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.id, "A");
        assert_eq!(cfg.peers, vec!["B", "C"]);
    }

    #[test]
    fn rejects_non_numeric_port() {
        let args = vec!["kvraft", "nope", "A", "B"].into_iter().map(String::from);
        assert!(Config::from_args(args).is_err());
    }

    #[test]
    fn rejects_missing_peers() {
        let args = vec!["kvraft", "9000", "A"].into_iter().map(String::from);
        assert!(Config::from_args(args).is_err());
    }
}
