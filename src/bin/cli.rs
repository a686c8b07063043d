//! Accord CLI tool
//!
//! A command-line interface for creating two-party agreements, editing
//! their content, and approving them. Every change is signed with the
//! local identity and applied to a state file on disk.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use accord::agreement::{Agreement, Approval, MessageParams, PauseState, Side};
use accord::clock::SystemClock;
use accord::config::Config;
use accord::processor::{Answer, Notification, Outcome, ProcessorState, Receipt};
use accord::registry::RegistryEvent;
use accord::snapshot::StateFile;
use accord::{
    service, AgreementId, Command, ContentHash, PartyId, Processor, Query, SignedCommand, Signer,
};
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Accord: two-party agreements with dual approval
#[derive(Parser)]
#[command(name = "accord")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.accord/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to identity file (overrides config)
    #[arg(short, long)]
    identity: Option<PathBuf>,

    /// Path to state file (overrides config)
    #[arg(short, long)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new identity keypair
    Init {
        /// Force overwrite existing identity
        #[arg(short, long)]
        force: bool,
    },

    /// Display your party id
    Identity,

    /// Create an agreement between you and a peer
    Create {
        /// Peer's party id (hex)
        #[arg(short, long)]
        peer: PartyId,

        /// Unix time after which the agreement is no longer valid
        #[arg(short, long)]
        expiry: u64,
    },

    /// Find the agreement for a party pair and expiry
    Lookup {
        /// Peer's party id (hex)
        #[arg(short, long)]
        peer: PartyId,

        /// Expiry the agreement was created with
        #[arg(short, long)]
        expiry: u64,

        /// Other side of the pair (default: your own id)
        #[arg(long)]
        party: Option<PartyId>,
    },

    /// Store the first batch of messages
    Initialize {
        /// Agreement id (hex)
        #[arg(short, long)]
        agreement: AgreementId,

        /// Message as section:sub_section:hash, repeatable
        #[arg(
            short,
            long = "message",
            required = true,
            num_args = 1..,
            value_parser = parse_message
        )]
        messages: Vec<MessageParams>,
    },

    /// Append a message
    Add {
        /// Agreement id (hex)
        #[arg(short, long)]
        agreement: AgreementId,

        /// Message as section:sub_section:hash
        #[arg(short, long, value_parser = parse_message)]
        message: MessageParams,
    },

    /// Replace the body of an existing message
    Update {
        /// Agreement id (hex)
        #[arg(short, long)]
        agreement: AgreementId,

        /// Message as section:sub_section:hash
        #[arg(short, long, value_parser = parse_message)]
        message: MessageParams,
    },

    /// Remove a message
    Remove {
        /// Agreement id (hex)
        #[arg(short, long)]
        agreement: AgreementId,

        /// Exact message as section:sub_section:hash
        #[arg(short, long, value_parser = parse_message)]
        message: MessageParams,
    },

    /// Toggle your pause flag
    Review {
        /// Agreement id (hex)
        #[arg(short, long)]
        agreement: AgreementId,
    },

    /// Approve the agreement
    Approve {
        /// Agreement id (hex)
        #[arg(short, long)]
        agreement: AgreementId,
    },

    /// Print an agreement's content and status
    Show {
        /// Agreement id (hex)
        #[arg(short, long)]
        agreement: AgreementId,
    },

    /// Check that a stored message is the hash of some text
    Check {
        /// Agreement id (hex)
        #[arg(short, long)]
        agreement: AgreementId,

        /// Section number
        #[arg(short, long)]
        section: u32,

        /// Sub-section number
        #[arg(short = 'k', long)]
        sub_section: u32,

        /// Text the message should commit to
        text: String,
    },

    /// Compute the content hash of some text
    Hash {
        /// Text to hash
        text: String,
    },

    /// Hand registry administration to another party
    SetOwner {
        /// New owner's party id (hex)
        new_owner: PartyId,
    },
}

fn parse_message(s: &str) -> Result<MessageParams, String> {
    MessageParams::parse(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config =
        Config::load(cli.config.as_deref()).unwrap_or_else(|e| fail("Error loading config", e));
    if let Some(identity) = cli.identity {
        config.identity_file = identity;
    }
    if let Some(state) = cli.state {
        config.state_file = state;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { force } => cmd_init(&config.identity_file, force),
        Commands::Identity => cmd_identity(&config.identity_file),
        Commands::Hash { text } => cmd_hash(&text),
        Commands::Create { peer, expiry } => {
            let me = load_identity(&config.identity_file).party_id();
            execute(
                &config,
                Command::CreateContract {
                    party_a: me,
                    party_b: peer,
                    expiry,
                },
            )
            .await;
        }
        Commands::Lookup {
            peer,
            expiry,
            party,
        } => {
            let party_a = party.unwrap_or_else(|| load_identity(&config.identity_file).party_id());
            let query = Query::GetAgreement {
                party_a,
                party_b: peer,
                expiry,
            };
            match ask(&config, query).await {
                Answer::Agreement(Some(id)) => println!("{}", id),
                _ => {
                    eprintln!("No agreement for that pair and expiry.");
                    std::process::exit(1);
                }
            }
        }
        Commands::Initialize {
            agreement,
            messages,
        } => execute(&config, Command::Initialize { agreement, messages }).await,
        Commands::Add { agreement, message } => {
            execute(&config, Command::AddMessage { agreement, message }).await
        }
        Commands::Update { agreement, message } => {
            execute(&config, Command::UpdateMessage { agreement, message }).await
        }
        Commands::Remove { agreement, message } => {
            execute(&config, Command::Remove { agreement, message }).await
        }
        Commands::Review { agreement } => {
            execute(&config, Command::ManageReviewStatus { agreement }).await
        }
        Commands::Approve { agreement } => execute(&config, Command::Approve { agreement }).await,
        Commands::Show { agreement } => cmd_show(&config, agreement).await,
        Commands::Check {
            agreement,
            section,
            sub_section,
            text,
        } => cmd_check(&config, agreement, section, sub_section, &text).await,
        Commands::SetOwner { new_owner } => execute(&config, Command::SetOwner { new_owner }).await,
    }
}

fn fail(context: &str, err: impl Display) -> ! {
    eprintln!("{}: {}", context, err);
    std::process::exit(1);
}

fn load_identity(path: &Path) -> Signer {
    let bytes = fs::read(path).unwrap_or_else(|_| {
        eprintln!("Error: No identity found at {:?}", path);
        eprintln!("Run 'accord init' to create one.");
        std::process::exit(1);
    });

    Signer::from_bytes(&bytes).unwrap_or_else(|e| fail("Error: Invalid identity file", e))
}

fn save_identity(signer: &Signer, path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap_or_else(|e| fail("Error creating directory", e));
    }
    fs::write(path, signer.to_bytes()).unwrap_or_else(|e| fail("Error saving identity", e));
}

fn cmd_init(path: &Path, force: bool) {
    if path.exists() && !force {
        eprintln!("Identity already exists at {:?}", path);
        eprintln!("Use --force to overwrite.");
        std::process::exit(1);
    }

    let signer = Signer::generate();
    save_identity(&signer, path);

    println!("Identity created successfully!");
    println!();
    println!("Your party id (share this with peers):");
    println!("{}", signer.party_id());
    println!();
    println!("Identity saved to: {:?}", path);
}

fn cmd_identity(path: &Path) {
    let signer = load_identity(path);
    println!("Your party id:");
    println!("{}", signer.party_id());
}

fn cmd_hash(text: &str) {
    println!("{}", ContentHash::digest(text.as_bytes()));
}

/// Open the processor over the state file; a fresh state is owned by `owner`
fn open_processor(state_file: &StateFile, owner: PartyId) -> Processor {
    let state = state_file
        .load()
        .unwrap_or_else(|e| fail("Error reading state", e))
        .unwrap_or_else(|| ProcessorState::new(owner));
    Processor::from_state(state, Arc::new(SystemClock))
}

async fn execute(config: &Config, command: Command) {
    let signer = load_identity(&config.identity_file);
    let state_file = StateFile::new(&config.state_file);
    let processor = open_processor(&state_file, signer.party_id());
    let (handle, task) = service::spawn(processor, config.queue_depth);

    let result = match handle.next_nonce(signer.party_id()).await {
        Ok(nonce) => match SignedCommand::sign(&signer, nonce, command) {
            Ok(signed) => handle.submit(signed).await,
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };

    let processor = stop(handle, task).await;

    match result {
        Ok(receipt) => {
            state_file
                .save(processor.state())
                .unwrap_or_else(|e| fail("Error saving state", e));
            print_receipt(&receipt);
        }
        Err(e) => fail("Error", e),
    }
}

async fn ask(config: &Config, query: Query) -> Answer {
    let owner = load_identity(&config.identity_file).party_id();
    let processor = open_processor(&StateFile::new(&config.state_file), owner);
    let (handle, task) = service::spawn(processor, config.queue_depth);

    let answer = handle.query(query).await;
    stop(handle, task).await;

    answer.unwrap_or_else(|e| fail("Error", e))
}

/// Shut the service down and take the processor back
async fn stop(handle: service::ServiceHandle, task: JoinHandle<()>) -> Processor {
    let processor = handle
        .shutdown()
        .await
        .unwrap_or_else(|e| fail("Error stopping service", e));
    task.await.unwrap_or_else(|e| fail("Error: service task failed", e));
    processor
}

fn print_receipt(receipt: &Receipt) {
    match &receipt.outcome {
        Outcome::Created(id) => {
            println!("Agreement created: {}", id);
        }
        Outcome::Initialized(messages) => {
            println!("Stored {} messages.", messages.len());
        }
        Outcome::Added(message) => {
            println!(
                "Added {}.{} at index {}",
                message.section, message.sub_section, message.index
            );
        }
        Outcome::Updated(previous) => {
            println!(
                "Updated {}.{} (was {})",
                previous.section, previous.sub_section, previous.body
            );
        }
        Outcome::Removed(message) => {
            println!("Removed {}.{}", message.section, message.sub_section);
        }
        Outcome::ReviewStatus(PauseState::Paused) => println!("You have paused the agreement."),
        Outcome::ReviewStatus(PauseState::Unpaused) => println!("Your pause is lifted."),
        Outcome::Approved(verification) => {
            println!("Approval recorded. Agreement is {:?}.", verification);
        }
        Outcome::OwnerSet => println!("Registry owner changed."),
    }

    for notification in &receipt.notifications {
        println!("  event: {}", describe(notification));
    }
}

fn describe(notification: &Notification) -> String {
    match notification {
        Notification::Agreement { agreement, event } => {
            format!("{} {}", &agreement.to_string()[..16], event)
        }
        Notification::Registry {
            event: RegistryEvent::Created { id, expiry, .. },
        } => format!("created {} expiring at {}", id, expiry),
        Notification::Registry {
            event: RegistryEvent::OwnerChanged { previous, new },
        } => format!("owner {} -> {}", previous.short(), new.short()),
    }
}

async fn cmd_check(config: &Config, id: AgreementId, section: u32, sub_section: u32, text: &str) {
    let query = Query::GetMessage {
        agreement: id,
        section,
        sub_section,
    };
    let Answer::Message(message) = ask(config, query).await else {
        fail("Error", "unexpected answer");
    };

    if message.is_tombstone() {
        println!("{}.{} has been removed.", section, sub_section);
        std::process::exit(1);
    }
    if message.body.matches(text.as_bytes()) {
        println!("[MATCH] {}.{} commits to this text.", section, sub_section);
    } else {
        println!("[MISMATCH] {}.{} holds {}", section, sub_section, message.body);
        std::process::exit(1);
    }
}

async fn cmd_show(config: &Config, id: AgreementId) {
    let Answer::Record(agreement) = ask(config, Query::Describe { agreement: id }).await else {
        fail("Error", "unexpected answer");
    };
    let valid = matches!(
        ask(config, Query::IsValid { agreement: id }).await,
        Answer::Valid(true)
    );
    print_agreement(&id, &agreement, valid);
}

fn print_agreement(id: &AgreementId, agreement: &Agreement, valid: bool) {
    println!("=== Agreement {} ===", id);
    println!();
    for (side, party) in [(Side::A, agreement.party_a()), (Side::B, agreement.party_b())] {
        let approved = match agreement.approval(side) {
            Approval::Approved => "[APPROVED]",
            Approval::Unapproved => "[PENDING]",
        };
        let paused = match agreement.pause_state(side) {
            PauseState::Paused => " [PAUSED]",
            PauseState::Unpaused => "",
        };
        println!("  Party {:?}: {}... {}{}", side, party.short(), approved, paused);
    }
    let pending: Vec<String> = agreement
        .pending_approvals()
        .iter()
        .map(|party| format!("{}...", party.short()))
        .collect();
    if !pending.is_empty() {
        println!("  Awaiting approval from: {}", pending.join(", "));
    }
    println!("  Expiry: {}", agreement.expiry());
    println!("  Status: {:?}", agreement.verification());
    println!("  Valid now: {}", if valid { "yes" } else { "no" });
    println!();
    println!("--- Sections ---");

    let store = agreement.store();
    for section in store.section_numbers() {
        for (slot, message) in store.get_section(section).iter().enumerate() {
            if message.is_tombstone() {
                println!("  {}.{}  <removed>", section, slot);
            } else {
                println!(
                    "  {}.{}  {}  (index {})",
                    message.section, message.sub_section, message.body, message.index
                );
            }
        }
    }
}
