use cid::Cid;
use clap::{Args, Parser, Subcommand};
use libp2p::Multiaddr;
use libretrieval::TokenAmount;
use std::path::PathBuf;

/// Paid retrieval of content-addressed data.
///
/// Identity management, a provider query server and a query client for retrieval peers.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Path to the configuration file. The default is `$HOME/.retrieval/config.yml`.
    #[arg(long = "config-file", short = 'c', env = "RETRIEVAL_CONFIG")]
    pub config_file: Option<PathBuf>,
    /// Peer id name to use. If omitted, the first peer record in the configuration file is used.
    #[arg(long = "id")]
    pub id_name: Option<String>,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add, list or delete local peer identities.
    #[command(subcommand, name = "id")]
    Id(IdCommand),
    /// Answer retrieval queries from other peers.
    #[command(name = "serve", alias = "start")]
    Serve(ServerCommand),
    /// Ask a provider whether it holds a payload, and on what terms it will serve it.
    #[command(name = "query")]
    Query(QueryCommand),
    /// Show or change the terms this node asks for.
    #[command(subcommand, name = "ask")]
    Ask(AskCommand),
    /// Manage the index of payloads this node serves.
    #[command(subcommand, name = "piece")]
    Piece(PieceCommand),
}

#[derive(Debug, Subcommand)]
pub enum IdCommand {
    /// Create a new peer identity.
    #[command(name = "new", alias = "create")]
    Create {
        /// The name of the new peer identity. If omitted, a random name is generated.
        name: Option<String>,
    },
    /// List all peer identities.
    #[command(name = "list", alias = "ls")]
    List,
    /// Delete a peer identity.
    #[command(name = "delete", alias = "del", alias = "rm")]
    Delete {
        /// The name of the peer identity to delete.
        id: String,
    },
}

#[derive(Debug, Args)]
pub struct ServerCommand {
    /// The address to listen to. The default is `/ip4/127.0.0.1/tcp/7740`.
    #[arg(long = "listen-address", short = 'a', default_value = "/ip4/127.0.0.1/tcp/7740")]
    pub listen_address: Multiaddr,
}

#[derive(Debug, Args)]
pub struct QueryCommand {
    /// The provider's address, including its peer id, e.g. `/ip4/127.0.0.1/tcp/7740/p2p/12D3KooW...`
    #[arg(long = "provider", short = 'p')]
    pub provider: Multiaddr,
    /// The root CID of the payload.
    pub payload: Cid,
    /// Only consider this piece.
    #[arg(long = "piece")]
    pub piece: Option<Cid>,
}

#[derive(Debug, Subcommand)]
pub enum AskCommand {
    /// Print the current ask.
    #[command(name = "show")]
    Show,
    /// Change parts of the ask. Omitted values are left as they are.
    #[command(name = "set")]
    Set(AskUpdate),
}

#[derive(Debug, Args)]
pub struct AskUpdate {
    /// Minimum price per byte.
    #[arg(long = "price")]
    pub price_per_byte: Option<TokenAmount>,
    /// Flat price charged before any data is sent.
    #[arg(long = "unseal-price")]
    pub unseal_price: Option<TokenAmount>,
    /// Bytes that may be sent before the first payment is due.
    #[arg(long = "interval")]
    pub payment_interval: Option<u64>,
    /// Growth of the payment interval after every payment.
    #[arg(long = "interval-increase")]
    pub payment_interval_increase: Option<u64>,
    /// The address payments are made to.
    #[arg(long = "payment-address")]
    pub payment_address: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum PieceCommand {
    /// Record that a payload can be served from a piece.
    #[command(name = "add")]
    Add {
        /// The root CID of the payload.
        payload: Cid,
        /// The piece the payload lives in.
        piece: Cid,
        /// The size of the piece in bytes.
        size: u64,
    },
    /// List the indexed payloads.
    #[command(name = "list", alias = "ls")]
    List,
    /// Remove a payload from the index.
    #[command(name = "delete", alias = "del", alias = "rm")]
    Delete {
        /// The root CID of the payload.
        payload: Cid,
    },
}

pub struct GlobalOptions {
    pub config_file: Option<PathBuf>,
    pub id_name: Option<String>,
}

impl Config {
    pub fn to_parts(self) -> (GlobalOptions, CliCommand) {
        let global = GlobalOptions { config_file: self.config_file, id_name: self.id_name };
        (global, self.command)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn query_arguments_parse() {
        let payload = libretrieval::helpers::raw_cid(b"payload");
        let args = [
            "retrieval",
            "--id",
            "alice",
            "query",
            "--provider",
            "/ip4/127.0.0.1/tcp/7740",
            payload.to_string().as_str(),
        ]
        .map(String::from);
        let (global, command) = Config::parse_from(args).to_parts();
        assert_eq!(global.id_name.as_deref(), Some("alice"));
        let CliCommand::Query(query) = command else { panic!("expected a query command") };
        assert_eq!(query.payload, payload);
        assert!(query.piece.is_none());
    }

    #[test]
    fn ask_updates_take_token_amounts() {
        let args = ["retrieval", "ask", "set", "--price", "12", "--interval", "4096"];
        let (_, command) = Config::parse_from(args).to_parts();
        let CliCommand::Ask(AskCommand::Set(update)) = command else { panic!("expected ask set") };
        assert_eq!(update.price_per_byte, Some(TokenAmount::from(12)));
        assert_eq!(update.payment_interval, Some(4096));
        assert!(update.unseal_price.is_none());
    }
}
