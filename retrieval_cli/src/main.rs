use anyhow::anyhow;
use clap::Parser;
use libretrieval::messages::Query;
use libretrieval::node::PieceInfo;
use libretrieval::payment::Address;
use log::*;
use retrieval_cli::config::{
    AskCommand, AskUpdate, CliCommand, Config, GlobalOptions, IdCommand, PieceCommand, QueryCommand, ServerCommand,
};
use retrieval_cli::error::SettingsError;
use retrieval_cli::query_service::QueryService;
use retrieval_cli::settings::{default_config_path, LocalSettings};
use retrieval_p2p::{new_network, serve_queries, PeerIdentity};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::init();
    let config: Config = Config::parse();
    let (global_options, command) = config.to_parts();

    let result = match command {
        CliCommand::Id(id_command) => exec_id_command(id_command, global_options),
        CliCommand::Serve(serve_command) => start_server(serve_command, global_options).await,
        CliCommand::Query(query_command) => exec_query_command(query_command, global_options).await,
        CliCommand::Ask(ask_command) => exec_ask_command(ask_command, global_options),
        CliCommand::Piece(piece_command) => exec_piece_command(piece_command, global_options),
    };

    match result {
        Ok(()) => {
            println!("Bye :)")
        }
        Err(err) => {
            eprintln!("** Error ** \n {err}");
            std::process::exit(1);
        }
    }
}

fn config_path(options: &GlobalOptions) -> PathBuf {
    options.config_file.as_ref().cloned().unwrap_or_else(default_config_path)
}

fn exec_id_command(cmd: IdCommand, config: GlobalOptions) -> Result<(), anyhow::Error> {
    let path = config_path(&config);
    let mut settings = load_or_create_settings(&path)?;
    match cmd {
        IdCommand::Create { name } => {
            let identity = match name {
                Some(name) => PeerIdentity::random_with_name(name),
                None => PeerIdentity::random(),
            };
            if settings.contains(identity.name()) {
                return Err(anyhow!("Identity with id {} already exists.", identity.name()));
            }
            println!("Identity created: {identity}");
            settings.insert(identity);
            println!("Saving identities to {}", path.display());
            settings.save(&path)?;
        }
        IdCommand::List => {
            println!("{} Local identities found.", settings.identities.len());
            for id in settings.identities.values() {
                println!("{id}");
            }
        }
        IdCommand::Delete { id } => match settings.remove(&id) {
            Some(identity) => {
                println!("Identity deleted: {identity}");
                settings.save(&path)?;
            }
            None => {
                return Err(anyhow!("Identity with id {} not found.", id));
            }
        },
    }
    Ok(())
}

fn exec_ask_command(cmd: AskCommand, config: GlobalOptions) -> Result<(), anyhow::Error> {
    let path = config_path(&config);
    let mut settings = load_or_create_settings(&path)?;
    if let AskCommand::Set(update) = cmd {
        apply_ask_update(&mut settings, update);
        settings.save(&path)?;
    }
    let ask = &settings.ask;
    println!("Price per byte:            {}", ask.price_per_byte);
    println!("Unseal price:              {}", ask.unseal_price);
    println!("Payment interval:          {}", ask.payment_interval);
    println!("Payment interval increase: {}", ask.payment_interval_increase);
    println!("Payment address:           {}", settings.payment_address);
    Ok(())
}

fn apply_ask_update(settings: &mut LocalSettings, update: AskUpdate) {
    if let Some(price) = update.price_per_byte {
        settings.ask.price_per_byte = price;
    }
    if let Some(price) = update.unseal_price {
        settings.ask.unseal_price = price;
    }
    if let Some(interval) = update.payment_interval {
        settings.ask.payment_interval = interval;
    }
    if let Some(increase) = update.payment_interval_increase {
        settings.ask.payment_interval_increase = increase;
    }
    if let Some(address) = update.payment_address {
        settings.payment_address = Address::new(address);
    }
}

fn exec_piece_command(cmd: PieceCommand, config: GlobalOptions) -> Result<(), anyhow::Error> {
    let path = config_path(&config);
    let mut settings = load_or_create_settings(&path)?;
    match cmd {
        PieceCommand::Add { payload, piece, size } => {
            if let Some(old) = settings.pieces.insert(payload, PieceInfo { piece_cid: piece, size }) {
                println!("{payload} was previously served from {}", old.piece_cid);
            }
            println!("{payload} is served from {piece} ({size} bytes)");
            settings.save(&path)?;
        }
        PieceCommand::List => {
            for (payload, piece) in settings.pieces.iter() {
                println!("{payload}  {}  {} bytes", piece.piece_cid, piece.size);
            }
        }
        PieceCommand::Delete { payload } => match settings.pieces.remove(&payload) {
            Some(_) => {
                println!("{payload} removed from the index");
                settings.save(&path)?;
            }
            None => return Err(anyhow!("{payload} is not in the index.")),
        },
    }
    Ok(())
}

fn load_or_create_settings(path: &PathBuf) -> Result<LocalSettings, anyhow::Error> {
    match LocalSettings::try_load(Some(path)) {
        Ok(settings) => Ok(settings),
        Err(SettingsError::IoError(err)) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                println!("No configuration file found at {}", path.display());
                Ok(LocalSettings::default())
            } else {
                Err(anyhow!("Error reading configuration file: {err}"))
            }
        }
        Err(err) => Err(anyhow!("Configuration error: {err}")),
    }
}

fn assign_identity(settings: &LocalSettings, id_name: Option<&String>) -> Result<PeerIdentity, anyhow::Error> {
    if !settings.has_identities() {
        return Err(anyhow!("No identities found. Use `retrieval id new` to create one."));
    }
    settings
        .select_identity(id_name.map(String::as_str))
        .cloned()
        .ok_or_else(|| anyhow!("Identity not found: {}", id_name.map(String::as_str).unwrap_or_default()))
}

async fn start_server(cmd: ServerCommand, config: GlobalOptions) -> Result<(), anyhow::Error> {
    info!("Starting server");
    let path = config_path(&config);
    let settings = load_or_create_settings(&path)?;
    let identity = assign_identity(&settings, config.id_name.as_ref())?;
    let dial_address = identity.dial_address(&cmd.listen_address);
    let (mut network_client, network_events, network_event_loop) = new_network(identity.take_keypair())?;
    tokio::spawn(network_event_loop.run());
    let bound = network_client.start_listening(cmd.listen_address).await?;
    println!("Serving queries at {dial_address} (bound to {bound})");

    let service = Arc::new(QueryService::new(&settings));
    tokio::select! {
        _ = serve_queries(network_client.clone(), Box::pin(network_events), service) => {
            info!("Network stopped.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted. Shutting down.");
            network_client.shutdown().await?;
        }
    }
    info!("Server has shut down.");
    Ok(())
}

async fn exec_query_command(cmd: QueryCommand, options: GlobalOptions) -> Result<(), anyhow::Error> {
    let path = config_path(&options);
    let settings = load_or_create_settings(&path)?;
    let identity = assign_identity(&settings, options.id_name.as_ref())?;
    let (mut network_client, _network_events, network_event_loop) = new_network(identity.take_keypair())?;
    tokio::spawn(network_event_loop.run());
    info!("Dialing provider");
    let peer_id = network_client.dial(cmd.provider).await?;
    info!("Provider {peer_id} connected");
    let query = Query { payload_cid: cmd.payload, piece_cid: cmd.piece };
    let response = network_client.query(peer_id, query).await?;
    println!("{response}");
    println!("Total price for the piece: {}", response.piece_retrieval_price());
    network_client.shutdown().await?;
    Ok(())
}
