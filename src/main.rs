use clap::{Parser, Subcommand};
use hashledger::chain::{Chain, DEFAULT_GENESIS_PAYLOAD};
use hashledger::logging::{init_logging, LogFormat};
use hashledger::storage::FileStore;
use hashledger::Block;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "hashledger",
    version,
    about = "Tamper-evident append-only message ledger"
)]
struct Cli {
    /// Ledger directory (default: ./ledger.db)
    #[arg(long, env = "HASHLEDGER_DB", default_value = "ledger.db")]
    db: PathBuf,

    /// Payload of the genesis block when creating a new ledger
    #[arg(long, env = "HASHLEDGER_GENESIS", default_value = DEFAULT_GENESIS_PAYLOAD)]
    genesis: String,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append a message as a new block
    Append { payload: String },
    /// List all blocks, newest first
    Blocks {
        /// Max entries to show
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Show the block at a height (1 = genesis)
    Block {
        height: u64,
        #[arg(long)]
        json: bool,
    },
    /// Print the chain height
    Height,
    /// Check every link from head to genesis
    Verify,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_level, cli.log_format) {
        eprintln!("warning: logging disabled: {}", e);
    }

    let result = open_chain(&cli).and_then(|chain| match cli.command {
        Commands::Append { payload } => cmd_append(&chain, payload),
        Commands::Blocks { limit, json } => cmd_blocks(&chain, limit, json),
        Commands::Block { height, json } => cmd_block(&chain, height, json),
        Commands::Height => cmd_height(&chain),
        Commands::Verify => cmd_verify(&chain),
    });

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

type CmdResult = Result<(), Box<dyn std::error::Error>>;

fn open_chain(cli: &Cli) -> Result<Chain<FileStore>, Box<dyn std::error::Error>> {
    Ok(Chain::open(&cli.db)?.with_genesis_payload(cli.genesis.clone()))
}

fn print_block(block: &Block) {
    println!(
        "#{} {} {}",
        block.height(),
        &block.digest()[..8],
        block.payload()
    );
}

fn cmd_append(chain: &Chain<FileStore>, payload: String) -> CmdResult {
    let block = chain.append(payload)?;
    print_block(&block);
    Ok(())
}

fn cmd_blocks(chain: &Chain<FileStore>, limit: Option<usize>, json: bool) -> CmdResult {
    let blocks = chain.get_all_blocks()?;
    let shown = &blocks[..limit.unwrap_or(blocks.len()).min(blocks.len())];
    if json {
        println!("{}", serde_json::to_string_pretty(shown)?);
    } else {
        for block in shown {
            print_block(block);
        }
    }
    Ok(())
}

fn cmd_block(chain: &Chain<FileStore>, height: u64, json: bool) -> CmdResult {
    let block = chain.get_block(height)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&block)?);
    } else {
        println!("height:      {}", block.height());
        println!("digest:      {}", block.digest());
        println!("predecessor: {}", block.predecessor_digest());
        println!("payload:     {}", block.payload());
    }
    Ok(())
}

fn cmd_height(chain: &Chain<FileStore>) -> CmdResult {
    println!("{}", chain.height()?);
    Ok(())
}

fn cmd_verify(chain: &Chain<FileStore>) -> CmdResult {
    let checked = chain.verify()?;
    println!("OK: {} blocks verified", checked);
    Ok(())
}
